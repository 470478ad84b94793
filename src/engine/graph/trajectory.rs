//! Trajectory store.
//!
//! Ordered, append-only sequence of pose nodes. Each append produces the
//! constraint that ties the new pose into the graph: an anchor prior for the
//! first pose, an odometry edge for every later one. Estimates are written
//! back after each solve; identities never change.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constraint::Constraint;
use super::estimator::Estimate;
use super::factory::ConstraintFactory;
use super::variables::VariableKey;
use crate::core::types::{Covariance, Pose2D};

/// Where a pose came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseSource {
    /// Integrated odometry.
    DeadReckoning,
    /// Ground-truth feed (simulation or external positioning).
    GroundTruth,
}

/// A pose node in the trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseNode {
    /// Monotonic sequence index.
    pub id: u64,

    /// Timestamp in microseconds.
    pub timestamp_us: u64,

    /// Source flag.
    pub source: PoseSource,

    /// Current estimate.
    pub estimate: Pose2D,

    /// Pure odometry integration, kept for comparison.
    pub dead_reckoning: Pose2D,

    /// Marginal covariance once solved.
    pub covariance: Option<Covariance>,
}

/// Trajectory contract violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrajectoryError {
    /// Timestamp not after the previous pose.
    #[error("non-monotonic timestamp {timestamp_us} us (last pose at {last_us} us)")]
    NonMonotonicTimestamp {
        /// Rejected timestamp
        timestamp_us: u64,
        /// Timestamp of the newest pose
        last_us: u64,
    },
}

/// Append-only pose sequence.
#[derive(Debug, Clone)]
pub struct TrajectoryStore {
    nodes: Vec<PoseNode>,
    factory: ConstraintFactory,
    record_ground_truth: bool,
}

impl TrajectoryStore {
    /// Create an empty store.
    ///
    /// With `record_ground_truth` off every pose is tagged dead reckoning.
    pub fn new(factory: ConstraintFactory, record_ground_truth: bool) -> Self {
        Self {
            nodes: Vec::new(),
            factory,
            record_ground_truth,
        }
    }

    /// Append a pose.
    ///
    /// The first call places pose 0 at `odometry_delta` (composed onto the
    /// origin) and returns its anchor prior. Later calls compose the delta
    /// onto the newest estimate and return the odometry edge.
    pub fn append_pose(
        &mut self,
        odometry_delta: &Pose2D,
        timestamp_us: u64,
        is_ground_truth: bool,
    ) -> Result<(PoseNode, Constraint), TrajectoryError> {
        let source = if is_ground_truth && self.record_ground_truth {
            PoseSource::GroundTruth
        } else {
            PoseSource::DeadReckoning
        };

        let (node, constraint) = match self.nodes.last() {
            None => {
                let start = Pose2D::identity().compose(odometry_delta);
                let node = PoseNode {
                    id: 0,
                    timestamp_us,
                    source,
                    estimate: start,
                    dead_reckoning: start,
                    covariance: None,
                };
                (node, self.factory.pose_prior(0, start))
            }
            Some(last) => {
                if timestamp_us <= last.timestamp_us {
                    return Err(TrajectoryError::NonMonotonicTimestamp {
                        timestamp_us,
                        last_us: last.timestamp_us,
                    });
                }
                let id = last.id + 1;
                let node = PoseNode {
                    id,
                    timestamp_us,
                    source,
                    estimate: last.estimate.compose(odometry_delta),
                    dead_reckoning: last.dead_reckoning.compose(odometry_delta),
                    covariance: None,
                };
                (node, self.factory.odometry(last.id, id, *odometry_delta))
            }
        };

        self.nodes.push(node.clone());
        Ok((node, constraint))
    }

    /// Pose node by id.
    #[inline]
    pub fn get(&self, id: u64) -> Option<&PoseNode> {
        // Ids are dense indices.
        self.nodes.get(usize::try_from(id).ok()?)
    }

    /// Current estimate of a pose.
    #[inline]
    pub fn estimate_of(&self, id: u64) -> Option<Pose2D> {
        self.get(id).map(|n| n.estimate)
    }

    /// Newest pose.
    #[inline]
    pub fn latest(&self) -> Option<&PoseNode> {
        self.nodes.last()
    }

    /// Newest pose with `timestamp_us <= t`.
    pub fn pose_at_or_before(&self, t: u64) -> Option<&PoseNode> {
        let idx = self.nodes.partition_point(|n| n.timestamp_us <= t);
        idx.checked_sub(1).map(|i| &self.nodes[i])
    }

    /// Write back solved poses.
    pub fn apply_estimate(&mut self, estimate: &Estimate, updated: &[VariableKey]) {
        for key in updated {
            let VariableKey::Pose(id) = *key else {
                continue;
            };
            let Some(pose) = estimate.pose(id) else {
                continue;
            };
            if let Some(node) = usize::try_from(id).ok().and_then(|i| self.nodes.get_mut(i)) {
                node.estimate = pose;
                node.covariance = estimate.covariance(key).cloned();
            }
        }
    }

    /// All poses in order.
    pub fn nodes(&self) -> &[PoseNode] {
        &self.nodes
    }

    /// Number of poses.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no pose has been appended.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
