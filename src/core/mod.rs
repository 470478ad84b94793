//! Core foundation layer.
//!
//! This is the bottom layer of the estimator stack with no internal
//! dependencies. All other layers depend on core.
//!
//! # Contents
//!
//! - [`types`]: Core data types (poses, detections, covariances)
//! - [`math`]: Mathematical primitives (angle normalization, line geometry)

pub mod math;
pub mod types;
