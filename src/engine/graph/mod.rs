//! Factor graph backend.
//!
//! Holds the vehicle trajectory, the landmark map and the incremental
//! estimator that keeps both consistent with every accepted measurement.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      FACTOR GRAPH                           │
//! │                                                             │
//! │  Variables: poses x_i, buoys b_j, lines l_k                 │
//! │                                                             │
//! │  [x0] ──odom──▶ [x1] ──odom──▶ [x2] ──odom──▶ [x3]           │
//! │   │prior         │ bearing/range │ along/cross               │
//! │                  ▼               ▼                           │
//! │                [b0]◀─prior     [l0]◀─prior (static/naive)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  INCREMENTAL ESTIMATION                     │
//! │                                                             │
//! │  Local window around new factors, Levenberg-Marquardt,      │
//! │  marginals from the window's information matrix             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TrajectoryStore`]: append-only pose sequence
//! - [`LandmarkRegistry`]: buoys and lines, static priors, seeding
//! - [`ConstraintFactory`]: measurement and prior constraints
//! - [`IncrementalEstimator`]: commits constraints and solves

mod constraint;
mod estimator;
mod factory;
mod landmarks;
mod linear;
mod trajectory;
mod variables;

pub use constraint::{Constraint, ConstraintKind, Linearization};
pub use estimator::{Estimate, EstimatorConfig, EstimatorError, IncrementalEstimator, UpdateReport};
pub use factory::{ConstraintFactory, NoiseSigmas};
pub use landmarks::{
    LandmarkCandidate, LandmarkEntry, LandmarkGeometry, LandmarkNode, LandmarkOrigin,
    LandmarkRegistry, StaticLine, StaticMap,
};
pub(crate) use linear::LocalProblem;
pub use linear::{OptimizationResult, SolveError, TerminationReason};
pub use trajectory::{PoseNode, PoseSource, TrajectoryError, TrajectoryStore};
pub use variables::{Values, VariableKey, VariableValue};
