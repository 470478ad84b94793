//! Trajectory and map error metrics.
//!
//! Compares estimated trajectories against a reference (ground truth, or a
//! batch solution when no truth exists) and measures how far rope
//! detections land from the rope segments of a solved map.

use serde::{Deserialize, Serialize};

use crate::core::math::{angle_diff, closest_point_on_segment};
use crate::core::types::{Point2D, Pose2D};
use crate::engine::graph::StaticLine;

/// Position error of each pose against its reference, in meters.
///
/// Sequences are compared index by index up to the shorter length.
pub fn position_errors(estimate: &[Pose2D], reference: &[Pose2D]) -> Vec<f64> {
    estimate
        .iter()
        .zip(reference)
        .map(|(e, r)| e.position().distance(&r.position()))
        .collect()
}

/// Absolute `[x, y, θ]` error of each pose against its reference.
///
/// Heading error is the wrapped angular difference.
pub fn pose_errors(estimate: &[Pose2D], reference: &[Pose2D]) -> Vec<[f64; 3]> {
    estimate
        .iter()
        .zip(reference)
        .map(|(e, r)| {
            [
                (e.x - r.x).abs(),
                (e.y - r.y).abs(),
                angle_diff(r.theta, e.theta).abs(),
            ]
        })
        .collect()
}

/// Root mean square of `errors`; zero when empty.
pub fn rmse(errors: &[f64]) -> f64 {
    if errors.is_empty() {
        return 0.0;
    }
    (errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64).sqrt()
}

/// Error statistics of one trajectory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Poses compared.
    pub poses: usize,
    /// Position RMSE (m).
    pub rmse: f64,
    /// Mean position error (m).
    pub mean: f64,
    /// Largest position error (m).
    pub max: f64,
    /// Heading RMSE (rad).
    pub heading_rmse: f64,
}

impl ErrorSummary {
    /// Summarize `estimate` against `reference`.
    pub fn between(estimate: &[Pose2D], reference: &[Pose2D]) -> Self {
        let positions = position_errors(estimate, reference);
        if positions.is_empty() {
            return Self::default();
        }
        let headings: Vec<f64> = pose_errors(estimate, reference).iter().map(|e| e[2]).collect();

        Self {
            poses: positions.len(),
            rmse: rmse(&positions),
            mean: positions.iter().sum::<f64>() / positions.len() as f64,
            max: positions.iter().copied().fold(0.0, f64::max),
            heading_rmse: rmse(&headings),
        }
    }
}

/// Dead reckoning, online and offline trajectories scored against one
/// reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryComparison {
    /// Pure odometry integration.
    pub dead_reckoning: ErrorSummary,
    /// Incremental estimate.
    pub online: ErrorSummary,
    /// Batch estimate, if one was computed.
    pub offline: Option<ErrorSummary>,
}

impl TrajectoryComparison {
    /// Score each trajectory against `reference`.
    pub fn new(
        reference: &[Pose2D],
        dead_reckoning: &[Pose2D],
        online: &[Pose2D],
        offline: Option<&[Pose2D]>,
    ) -> Self {
        Self {
            dead_reckoning: ErrorSummary::between(dead_reckoning, reference),
            online: ErrorSummary::between(online, reference),
            offline: offline.map(|poses| ErrorSummary::between(poses, reference)),
        }
    }

    /// Print one line per trajectory at info level.
    pub fn log(&self) {
        let rows = [
            ("dead reckoning", Some(&self.dead_reckoning)),
            ("online", Some(&self.online)),
            ("offline", self.offline.as_ref()),
        ];
        for (name, summary) in rows {
            if let Some(s) = summary {
                log::info!(
                    "{:>14}: rmse {:.3} m, mean {:.3} m, max {:.3} m, heading {:.2} deg",
                    name,
                    s.rmse,
                    s.mean,
                    s.max,
                    s.heading_rmse.to_degrees()
                );
            }
        }
    }
}

/// Closest rope point to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Index of the nearest segment.
    pub segment: usize,
    /// Closest point on that segment.
    pub point: Point2D,
    /// Distance from the detection (m).
    pub distance: f64,
}

/// Rope segments of a map, using solved buoy positions where a rope is
/// strung between buoys.
///
/// Lines without buoy indices, or whose indices are out of range, keep
/// their own endpoints.
pub fn rope_segments(lines: &[StaticLine], buoys: &[Point2D]) -> Vec<(Point2D, Point2D)> {
    lines
        .iter()
        .map(|line| match line.buoy_indices {
            Some([a, b]) if a < buoys.len() && b < buoys.len() => (buoys[a], buoys[b]),
            _ => (line.start, line.end),
        })
        .collect()
}

/// Nearest segment point for each world-frame detection.
///
/// Empty when there are no segments.
pub fn corresponding_points(
    detections: &[Point2D],
    segments: &[(Point2D, Point2D)],
) -> Vec<Correspondence> {
    if segments.is_empty() {
        return Vec::new();
    }
    detections
        .iter()
        .filter_map(|p| {
            segments
                .iter()
                .enumerate()
                .map(|(segment, (a, b))| {
                    let point = closest_point_on_segment(p, a, b);
                    Correspondence {
                        segment,
                        point,
                        distance: p.distance(&point),
                    }
                })
                .min_by(|x, y| x.distance.total_cmp(&y.distance))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_pose_errors_wrap_heading() {
        let estimate = [Pose2D::new(1.0, 2.0, PI - 0.05)];
        let reference = [Pose2D::new(0.0, 0.0, -PI + 0.05)];

        let errors = pose_errors(&estimate, &reference);
        assert_relative_eq!(errors[0][0], 1.0);
        assert_relative_eq!(errors[0][1], 2.0);
        assert_relative_eq!(errors[0][2], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_summary_of_offset_trajectory() {
        let reference: Vec<Pose2D> = (0..4).map(|i| Pose2D::new(i as f64, 0.0, 0.0)).collect();
        let estimate: Vec<Pose2D> = (0..4)
            .map(|i| Pose2D::new(i as f64, if i < 2 { 0.0 } else { 2.0 }, 0.0))
            .collect();

        let summary = ErrorSummary::between(&estimate, &reference);
        assert_eq!(summary.poses, 4);
        assert_relative_eq!(summary.rmse, 2.0_f64.sqrt());
        assert_relative_eq!(summary.mean, 1.0);
        assert_relative_eq!(summary.max, 2.0);
        assert_relative_eq!(summary.heading_rmse, 0.0);
    }

    #[test]
    fn test_shorter_sequence_bounds_comparison() {
        let reference = vec![Pose2D::identity(); 5];
        let estimate = vec![Pose2D::new(3.0, 4.0, 0.0); 2];

        assert_eq!(position_errors(&estimate, &reference), vec![5.0, 5.0]);
        assert_eq!(ErrorSummary::between(&[], &reference), ErrorSummary::default());
        assert_eq!(rmse(&[]), 0.0);
    }

    #[test]
    fn test_comparison_without_offline() {
        let reference = vec![Pose2D::identity(); 3];
        let drift = vec![Pose2D::new(1.0, 0.0, 0.0); 3];

        let comparison = TrajectoryComparison::new(&reference, &drift, &reference, None);
        assert_relative_eq!(comparison.dead_reckoning.rmse, 1.0);
        assert_relative_eq!(comparison.online.rmse, 0.0);
        assert!(comparison.offline.is_none());
    }

    #[test]
    fn test_rope_segments_follow_solved_buoys() {
        let lines = vec![
            StaticLine {
                start: Point2D::new(0.0, 0.0),
                end: Point2D::new(10.0, 0.0),
                buoy_indices: Some([0, 1]),
            },
            StaticLine {
                start: Point2D::new(0.0, 5.0),
                end: Point2D::new(10.0, 5.0),
                buoy_indices: Some([0, 9]),
            },
        ];
        let buoys = vec![Point2D::new(0.5, 0.5), Point2D::new(10.5, 0.5)];

        let segments = rope_segments(&lines, &buoys);
        assert_eq!(segments[0], (buoys[0], buoys[1]));
        assert_eq!(segments[1], (lines[1].start, lines[1].end));
    }

    #[test]
    fn test_corresponding_points_pick_nearest_segment() {
        let segments = vec![
            (Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0)),
            (Point2D::new(0.0, 5.0), Point2D::new(10.0, 5.0)),
        ];
        let detections = vec![Point2D::new(3.0, 1.0), Point2D::new(12.0, 4.0)];

        let found = corresponding_points(&detections, &segments);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].segment, 0);
        assert_eq!(found[0].point, Point2D::new(3.0, 0.0));
        assert_relative_eq!(found[0].distance, 1.0);
        assert_eq!(found[1].segment, 1);
        assert_eq!(found[1].point, Point2D::new(10.0, 5.0));
        assert_relative_eq!(found[1].distance, 5.0_f64.sqrt());

        assert!(corresponding_points(&detections, &[]).is_empty());
    }
}
