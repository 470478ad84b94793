//! Estimation engine layer.
//!
//! # Contents
//!
//! - [`graph`]: Variables, constraints, landmark registry and the incremental estimator
//! - [`association`]: Detection-to-landmark association
//! - [`batching`]: Rope detection batching
//! - [`offline`]: Whole-survey batch solve with clustering association
//! - [`metrics`]: Trajectory and map error metrics
//! - [`slam`]: Session orchestration and the estimator thread

pub mod association;
pub mod batching;
pub mod graph;
pub mod metrics;
pub mod offline;
pub mod slam;
