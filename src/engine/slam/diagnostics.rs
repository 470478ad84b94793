//! Diagnostic records produced by the session.

use serde::{Deserialize, Serialize};

use crate::engine::association::AssociationDecision;
use crate::engine::batching::FlushReason;
use crate::engine::graph::VariableKey;

/// Per-category diagnostic toggles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Verbosity {
    /// Estimator update summaries.
    #[serde(default)]
    pub verbose_graph_update: bool,

    /// Incoming rope detections.
    #[serde(default)]
    pub verbose_graph_rope_detections: bool,

    /// Rope batch flushes.
    #[serde(default)]
    pub verbose_graph_rope_batching: bool,

    /// Incoming buoy detections.
    #[serde(default)]
    pub verbose_graph_buoy_detections: bool,

    /// Rope association decisions.
    #[serde(default)]
    pub verbose_graph_rope_associations: bool,

    /// Buoy association decisions.
    #[serde(default)]
    pub verbose_graph_buoy_associations: bool,
}

/// Something the session wants an operator to know about.
///
/// Rejections, deferrals, drops, evictions, discarded batches and stale
/// detections are always recorded. Association, batch and update records
/// follow [`Verbosity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    /// A detection was resolved.
    Association {
        /// The decision
        decision: AssociationDecision,
    },

    /// A rope batch was turned into constraints.
    BatchFlushed {
        /// Line id
        line_id: u64,
        /// Detections in the batch
        members: usize,
        /// Flush trigger
        reason: FlushReason,
        /// Constraints produced
        constraints: usize,
    },

    /// A rope batch produced no constraints because its poses were unknown.
    BatchDiscarded {
        /// Line id
        line_id: u64,
        /// Detections lost
        members: usize,
    },

    /// An estimator update completed.
    Update {
        /// Newest pose at the time
        pose_id: u64,
        /// Constraints committed
        committed: usize,
        /// Variables re-solved
        updated: usize,
        /// Solver iterations
        iterations: u32,
        /// Final chi-squared
        final_error: f64,
    },

    /// A landmark group could not be solved yet.
    Deferred {
        /// Landmark variable
        landmark: VariableKey,
        /// Failed attempts so far
        attempts: u32,
    },

    /// A landmark group was abandoned.
    Dropped {
        /// Landmark variable
        landmark: VariableKey,
    },

    /// An update was rejected; the estimate is unchanged.
    IllConditioned {
        /// Solver diagnosis
        reason: String,
    },

    /// The reorder buffer was full and dropped its oldest detection.
    Evicted {
        /// Detection sequence id
        seq_id: u64,
        /// Detection timestamp
        timestamp_us: u64,
    },

    /// A detection predates the trajectory.
    Stale {
        /// Detection sequence id
        seq_id: u64,
        /// Detection timestamp
        timestamp_us: u64,
    },
}

/// Which measurements an update carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// Odometry only.
    Odometry,
    /// Buoy measurements.
    Buoy,
    /// Rope measurements.
    Rope,
    /// Buoy and rope measurements.
    Mixed,
}

impl UpdateState {
    /// Classify by measurement counts.
    pub fn from_counts(buoys: usize, ropes: usize) -> Self {
        match (buoys > 0, ropes > 0) {
            (false, false) => UpdateState::Odometry,
            (true, false) => UpdateState::Buoy,
            (false, true) => UpdateState::Rope,
            (true, true) => UpdateState::Mixed,
        }
    }
}

/// Timing and size of one estimator update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Newest pose at the time.
    pub pose_id: u64,
    /// Measurements carried.
    pub state: UpdateState,
    /// Wall time of the update (microseconds).
    pub wall_time_us: u64,
    /// Factors in the final solve.
    pub factors: usize,
    /// Constraints committed.
    pub constraints: usize,
    /// Prior constraints among the submitted ones.
    pub priors: usize,
    /// Estimate revision afterwards.
    pub revision: u64,
}

/// Audit entry for one buoy detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuoyAssociationRecord {
    /// Detection sequence id.
    pub seq_id: u64,
    /// Buoy id, or `-1` when rejected.
    pub buoy_id: i64,
    /// Euclidean distance to the buoy, when it existed.
    pub distance: Option<f64>,
    /// Mahalanobis distance to the buoy, when it existed.
    pub mahalanobis: Option<f64>,
}

impl From<&AssociationDecision> for BuoyAssociationRecord {
    fn from(decision: &AssociationDecision) -> Self {
        Self {
            seq_id: decision.seq_id,
            buoy_id: decision.landmark_id().map_or(-1, |id| id as i64),
            distance: decision.distance,
            mahalanobis: decision.mahalanobis,
        }
    }
}
