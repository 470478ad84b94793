//! JalaSLAM - Incremental factor-graph SLAM for underwater vehicles
//!
//! Estimates the vehicle trajectory together with a sparse map of buoys
//! (points) and ropes or pipes (line segments) from dead-reckoning odometry
//! and camera/sonar detections.
//!
//! # Architecture
//!
//! The crate is organized into 3 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      bin/                           │  ← Simulator
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    config/                          │  ← YAML/TOML loading
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Estimation
//! │   (graph, association, batching, slam session)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │                (types, math)                        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use jala_slam::{JalaConfig, SensorEvent, SlamSession};
//!
//! let config = JalaConfig::load_default()?.to_session_config()?;
//! let mut session = SlamSession::new(config);
//!
//! for event in events {
//!     session.handle(event)?;
//! }
//! session.finish()?;
//! println!("{}", session.snapshot().to_json()?);
//! ```
//!
//! # Coordinate System
//!
//! - X: Forward (positive ahead of the vehicle)
//! - Y: Left (positive to port)
//! - Theta: Heading in radians, CCW positive from +X, normalized to (-π, π]

#![warn(missing_docs)]

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Estimation engine (depends on core)
// ============================================================================
pub mod engine;

// ============================================================================
// Layer 3: Configuration (depends on core, engine)
// ============================================================================
pub mod config;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use core::math;
pub use core::types::{
    Covariance, Detection, DetectionTarget, LandmarkKind, OdometryTick, Point2D, Pose2D,
    RelativePosition, SensorSource,
};

// Engine - Graph
pub use engine::graph::{
    Constraint, ConstraintFactory, Estimate, EstimatorConfig, EstimatorError,
    IncrementalEstimator, LandmarkGeometry, LandmarkNode, LandmarkRegistry, NoiseSigmas,
    OptimizationResult, PoseNode, StaticLine, StaticMap, TerminationReason, TrajectoryStore,
    UpdateReport, VariableKey, VariableValue,
};

// Engine - Association
pub use engine::association::{
    AssociationConfig, AssociationDecision, AssociationEngine, AssociationOutcome, SeqTable,
    SwathTable,
};

// Engine - Batching
pub use engine::batching::{Batch, BatchingConfig, FlushReason, RopeBatcher};

// Engine - Offline and metrics
pub use engine::metrics::{Correspondence, ErrorSummary, TrajectoryComparison};
pub use engine::offline::{BuoySighting, OfflineConfig, OfflineError, OfflineSolution, OfflineSolver};

// Engine - Session
pub use engine::slam::{
    Diagnostic, SensorEvent, SessionConfig, SessionError, SessionSnapshot, SessionWorker,
    SlamSession, Verbosity,
};

// Configuration
pub use config::{ConfigError, JalaConfig};
