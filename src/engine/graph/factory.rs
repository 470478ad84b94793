//! Constraint factory.
//!
//! Pure conversions from odometry ticks, associated detections, static
//! priors and flushed rope batches into typed [`Constraint`] values. All
//! noise comes from one [`NoiseSigmas`] set; angular sigmas are already in
//! radians here.

use super::constraint::Constraint;
use super::trajectory::TrajectoryStore;
use crate::core::math::line_along_sigma;
use crate::core::types::{Point2D, Pose2D, RelativePosition};
use crate::engine::batching::Batch;

/// Runtime noise sigmas (angles in radians, distances in meters).
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSigmas {
    /// Anchor prior (x, y, θ).
    pub prior: [f64; 3],
    /// Odometry step (x, y, θ).
    pub odometry: [f64; 3],
    /// Buoy detection (bearing, range).
    pub buoy_detection: [f64; 2],
    /// Rope along-track sigma; `<= 0` scales with line length.
    pub rope_along: f64,
    /// Rope cross-track sigma.
    pub rope_cross: f64,
    /// Static buoy prior.
    pub buoy_prior: f64,
    /// Static and naive rope endpoint prior.
    pub rope_prior: f64,
}

impl Default for NoiseSigmas {
    fn default() -> Self {
        Self {
            prior: [1.0, 1.0, 1.0_f64.to_radians()],
            odometry: [0.1, 0.1, 0.1_f64.to_radians()],
            buoy_detection: [1.0_f64.to_radians(), 0.1],
            rope_along: 15.0,
            rope_cross: 2.0,
            buoy_prior: 1.0,
            rope_prior: 15.0,
        }
    }
}

impl NoiseSigmas {
    /// Along/cross sigmas for a line of the given length.
    ///
    /// A non-positive `rope_along` scales with the length, see
    /// [`line_along_sigma`].
    pub fn line_sigmas(&self, line_length: f64) -> [f64; 2] {
        [
            line_along_sigma(self.rope_along, self.rope_cross, line_length),
            self.rope_cross,
        ]
    }
}

/// Builds constraints with the configured noise.
#[derive(Debug, Clone)]
pub struct ConstraintFactory {
    sigmas: NoiseSigmas,
    individual_rope_detections: bool,
}

impl ConstraintFactory {
    /// Create a factory.
    pub fn new(sigmas: NoiseSigmas, individual_rope_detections: bool) -> Self {
        Self {
            sigmas,
            individual_rope_detections,
        }
    }

    /// Configured sigmas.
    pub fn sigmas(&self) -> &NoiseSigmas {
        &self.sigmas
    }

    /// Anchor prior on the first pose.
    pub fn pose_prior(&self, pose: u64, mean: Pose2D) -> Constraint {
        Constraint::PosePrior {
            pose,
            mean,
            sigmas: self.sigmas.prior,
        }
    }

    /// Odometry edge between consecutive poses.
    pub fn odometry(&self, from: u64, to: u64, delta: Pose2D) -> Constraint {
        Constraint::Odometry {
            from,
            to,
            delta,
            sigmas: self.sigmas.odometry,
        }
    }

    /// Bearing/range edge from a pose to a buoy.
    pub fn point_landmark(&self, pose: u64, landmark: u64, relative: &RelativePosition) -> Constraint {
        let (bearing, range) = relative.bearing_range();
        Constraint::PointLandmark {
            pose,
            landmark,
            bearing,
            range,
            sigmas: self.sigmas.buoy_detection,
        }
    }

    /// Along/cross edge from a pose to a line.
    ///
    /// `line_length` is the line's current estimated length, used when the
    /// along-track sigma scales with length.
    pub fn line_landmark(&self, pose: u64, line: u64, offset: Point2D, line_length: f64) -> Constraint {
        Constraint::LineLandmark {
            pose,
            line,
            offset,
            sigmas: self.sigmas.line_sigmas(line_length),
        }
    }

    /// Static buoy prior.
    pub fn point_prior(&self, landmark: u64, mean: Point2D) -> Constraint {
        Constraint::PointPrior {
            landmark,
            mean,
            sigma: self.sigmas.buoy_prior,
        }
    }

    /// Static or naive rope endpoint prior.
    pub fn line_prior(&self, line: u64, start: Point2D, end: Point2D) -> Constraint {
        Constraint::LinePrior {
            line,
            start,
            end,
            sigma: self.sigmas.rope_prior,
        }
    }

    /// Reduce a flushed rope batch to line constraints.
    ///
    /// With individual detections every member becomes its own edge.
    /// Otherwise the batch becomes one edge anchored at the last member's
    /// pose: each member's detected point is moved to the world frame with
    /// its own pose estimate, re-expressed in the anchor frame and averaged.
    /// Both sigmas shrink by `√N`.
    pub fn reduce_batch(
        &self,
        batch: &Batch,
        trajectory: &TrajectoryStore,
        line_length: f64,
    ) -> Vec<Constraint> {
        if self.individual_rope_detections {
            return batch
                .members
                .iter()
                .map(|m| {
                    self.line_landmark(m.pose_id, batch.line_id, m.detection.relative.offset(), line_length)
                })
                .collect();
        }

        let Some(anchor) = batch.members.last() else {
            return Vec::new();
        };
        let Some(anchor_pose) = trajectory.estimate_of(anchor.pose_id) else {
            log::warn!(
                "Rope batch for line {} discarded: anchor pose {} has no estimate",
                batch.line_id,
                anchor.pose_id
            );
            return Vec::new();
        };

        let local: Vec<Point2D> = batch
            .members
            .iter()
            .filter_map(|m| {
                let pose = trajectory.estimate_of(m.pose_id)?;
                let world = pose.transform_point(&m.detection.relative.offset());
                Some(anchor_pose.inverse_transform_point(&world))
            })
            .collect();

        if local.len() < batch.members.len() {
            log::warn!(
                "Rope batch for line {}: {} of {} detections have no pose estimate",
                batch.line_id,
                batch.members.len() - local.len(),
                batch.members.len()
            );
        }

        let n = local.len() as f64;
        let mean = Point2D::new(
            local.iter().map(|p| p.x).sum::<f64>() / n,
            local.iter().map(|p| p.y).sum::<f64>() / n,
        );
        let [along, cross] = self.sigmas.line_sigmas(line_length);
        let scale = n.sqrt();

        vec![Constraint::LineLandmark {
            pose: anchor.pose_id,
            line: batch.line_id,
            offset: mean,
            sigmas: [along / scale, cross / scale],
        }]
    }
}
