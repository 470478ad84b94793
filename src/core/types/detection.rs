//! Sensor input records consumed by the estimator.
//!
//! Detections arrive already extracted by an upstream detector (camera or
//! sonar). The estimator only sees a timestamped relative position, the
//! kind of structure that was detected and optional identity hints.

use serde::{Deserialize, Serialize};

use super::pose::{Point2D, Pose2D};

/// Sensor that produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorSource {
    /// Forward or down looking camera.
    Camera,
    /// Side-scan sonar.
    Sonar,
}

/// Kind of landmark geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    /// Single position (buoys).
    Point,
    /// Endpoint pair (ropes, pipelines).
    Line,
}

/// Physical structure a detection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTarget {
    /// Moored buoy.
    Buoy,
    /// Rope strung between buoys.
    Rope,
    /// Seabed pipeline.
    Pipe,
}

impl DetectionTarget {
    /// Landmark geometry this target maps to.
    #[inline]
    pub fn landmark_kind(&self) -> LandmarkKind {
        match self {
            DetectionTarget::Buoy => LandmarkKind::Point,
            DetectionTarget::Rope | DetectionTarget::Pipe => LandmarkKind::Line,
        }
    }
}

/// Observed position relative to the vehicle body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativePosition {
    /// Cartesian offset (x forward, y left) in meters.
    Offset(Point2D),
    /// Range in meters and bearing in radians relative to the heading.
    RangeBearing {
        /// Range in meters
        range: f64,
        /// Bearing in radians
        bearing: f64,
    },
}

impl RelativePosition {
    /// Cartesian body-frame offset.
    pub fn offset(&self) -> Point2D {
        match *self {
            RelativePosition::Offset(p) => p,
            RelativePosition::RangeBearing { range, bearing } => {
                Point2D::new(range * bearing.cos(), range * bearing.sin())
            }
        }
    }

    /// Bearing and range form.
    pub fn bearing_range(&self) -> (f64, f64) {
        match *self {
            RelativePosition::Offset(p) => (p.y.atan2(p.x), p.x.hypot(p.y)),
            RelativePosition::RangeBearing { range, bearing } => (bearing, range),
        }
    }
}

/// A single landmark detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Detector sequence number, used by manual association tables.
    pub seq_id: u64,
    /// Timestamp in microseconds.
    pub timestamp_us: u64,
    /// Producing sensor.
    pub sensor: SensorSource,
    /// Detected structure.
    pub target: DetectionTarget,
    /// Observed relative position.
    pub relative: RelativePosition,
    /// Detector confidence, if reported.
    #[serde(default)]
    pub score: Option<f64>,
    /// Identity proposed by the detector.
    #[serde(default)]
    pub identity_hint: Option<u64>,
    /// Operator supplied line id, overrides any association.
    #[serde(default)]
    pub line_override: Option<u64>,
}

impl Detection {
    /// Create a detection with no hints.
    pub fn new(
        seq_id: u64,
        timestamp_us: u64,
        sensor: SensorSource,
        target: DetectionTarget,
        relative: RelativePosition,
    ) -> Self {
        Self {
            seq_id,
            timestamp_us,
            sensor,
            target,
            relative,
            score: None,
            identity_hint: None,
            line_override: None,
        }
    }

    /// Attach an identity hint.
    pub fn with_hint(mut self, id: u64) -> Self {
        self.identity_hint = Some(id);
        self
    }

    /// Attach a manual line override.
    pub fn with_line_override(mut self, line_id: u64) -> Self {
        self.line_override = Some(line_id);
        self
    }

    /// Landmark kind this detection refers to.
    #[inline]
    pub fn kind(&self) -> LandmarkKind {
        self.target.landmark_kind()
    }
}

/// Odometry increment reported by the dead-reckoning feed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometryTick {
    /// Motion since the previous tick, in the previous body frame.
    pub delta: Pose2D,
    /// Timestamp in microseconds.
    pub timestamp_us: u64,
    /// Whether this tick comes from a ground-truth source.
    #[serde(default)]
    pub is_ground_truth: bool,
}

impl OdometryTick {
    /// Create a dead-reckoning tick.
    pub fn new(delta: Pose2D, timestamp_us: u64) -> Self {
        Self {
            delta,
            timestamp_us,
            is_ground_truth: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_target_kind() {
        assert_eq!(DetectionTarget::Buoy.landmark_kind(), LandmarkKind::Point);
        assert_eq!(DetectionTarget::Rope.landmark_kind(), LandmarkKind::Line);
        assert_eq!(DetectionTarget::Pipe.landmark_kind(), LandmarkKind::Line);
    }

    #[test]
    fn test_relative_position_forms_agree() {
        let rb = RelativePosition::RangeBearing {
            range: 2.0,
            bearing: FRAC_PI_2,
        };
        let offset = rb.offset();
        assert_relative_eq!(offset.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(offset.y, 2.0, epsilon = 1e-12);

        let (bearing, range) = RelativePosition::Offset(offset).bearing_range();
        assert_relative_eq!(bearing, FRAC_PI_2, epsilon = 1e-12);
        assert_relative_eq!(range, 2.0, epsilon = 1e-12);
    }
}
