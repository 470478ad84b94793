//! Exported estimate.

use serde::{Deserialize, Serialize};

use crate::engine::graph::{LandmarkNode, PoseNode};

/// Running totals of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCounters {
    /// Odometry ticks appended.
    pub odometry_ticks: u64,
    /// Detections received.
    pub detections_received: u64,
    /// Detections rejected by association.
    pub detections_rejected: u64,
    /// Detections evicted from the full reorder buffer.
    pub detections_evicted: u64,
    /// Detections older than the first pose.
    pub detections_stale: u64,
    /// Rope batches flushed.
    pub batches_flushed: u64,
    /// Constraints committed to the graph.
    pub constraints_committed: u64,
    /// Landmark groups dropped after repeated failures.
    pub groups_dropped: u64,
    /// Updates rejected as ill-conditioned.
    pub updates_rejected: u64,
}

/// Trajectory and map as of one estimate revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Estimate revision.
    pub revision: u64,
    /// Poses in order, with covariance once solved.
    pub trajectory: Vec<PoseNode>,
    /// Buoys in the graph.
    pub points: Vec<LandmarkNode>,
    /// Lines in the graph.
    pub lines: Vec<LandmarkNode>,
    /// Session totals.
    pub counters: SessionCounters,
}

impl SessionSnapshot {
    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
