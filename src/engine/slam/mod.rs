//! Estimation session.
//!
//! Wires trajectory, landmarks, association, batching and the estimator
//! into one event-driven pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SlamSession                           │
//! │                                                              │
//! │  Detection ──▶ ReorderBuffer (bounded, sorted by time)       │
//! │                     │ released when odometry catches up      │
//! │                     ▼                                        │
//! │  Odometry ──▶ TrajectoryStore ──▶ IncrementalEstimator       │
//! │                     │                   ▲                    │
//! │                     ▼                   │                    │
//! │        AssociationEngine ──▶ LandmarkRegistry                │
//! │                     │                   │                    │
//! │                     ▼                   │                    │
//! │              RopeBatcher ──▶ ConstraintFactory               │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!             SessionSnapshot / Diagnostic / PerformanceRecord
//! ```
//!
//! # Components
//!
//! - [`SlamSession`]: Single-threaded pipeline
//! - [`SessionWorker`]: The same pipeline on a dedicated thread
//! - [`ReorderBuffer`]: Bounded timestamp reordering of detections
//! - [`Diagnostic`]: Operator-facing records, gated by [`Verbosity`]

mod diagnostics;
mod reorder;
mod session;
mod snapshot;
mod worker;

pub use diagnostics::{BuoyAssociationRecord, Diagnostic, PerformanceRecord, UpdateState, Verbosity};
pub use reorder::{prioritize_points, ReorderBuffer};
pub use session::{SensorEvent, SessionConfig, SessionError, SlamSession};
pub use snapshot::{SessionCounters, SessionSnapshot};
pub use worker::SessionWorker;
