//! Variable keys and values of the factor graph.
//!
//! Poses, buoys and lines live in separate id spaces. A [`VariableKey`]
//! tags the id with its space so all variables share one ordered arena.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;
use crate::core::types::{LandmarkKind, Point2D, Pose2D};

/// Identifier of a graph variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariableKey {
    /// Vehicle pose (3 dof).
    Pose(u64),
    /// Point landmark (2 dof).
    Point(u64),
    /// Line landmark endpoints (4 dof).
    Line(u64),
}

impl VariableKey {
    /// Landmark key for a kind and id.
    #[inline]
    pub fn landmark(kind: LandmarkKind, id: u64) -> Self {
        match kind {
            LandmarkKind::Point => VariableKey::Point(id),
            LandmarkKind::Line => VariableKey::Line(id),
        }
    }

    /// Tangent-space dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        match self {
            VariableKey::Pose(_) => 3,
            VariableKey::Point(_) => 2,
            VariableKey::Line(_) => 4,
        }
    }

    /// Whether this is a landmark variable.
    #[inline]
    pub fn is_landmark(&self) -> bool {
        !matches!(self, VariableKey::Pose(_))
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableKey::Pose(id) => write!(f, "x{}", id),
            VariableKey::Point(id) => write!(f, "b{}", id),
            VariableKey::Line(id) => write!(f, "l{}", id),
        }
    }
}

/// Current value of a graph variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VariableValue {
    /// Vehicle pose.
    Pose(Pose2D),
    /// Point position.
    Point(Point2D),
    /// Line endpoints.
    Line {
        /// First endpoint
        start: Point2D,
        /// Second endpoint
        end: Point2D,
    },
}

impl VariableValue {
    /// Apply a tangent-space increment.
    ///
    /// Poses update additively in the world frame with the heading wrapped,
    /// matching the Jacobians of the residual models.
    pub fn retract(&self, delta: &[f64]) -> VariableValue {
        match *self {
            VariableValue::Pose(p) => VariableValue::Pose(Pose2D {
                x: p.x + delta[0],
                y: p.y + delta[1],
                theta: normalize_angle(p.theta + delta[2]),
            }),
            VariableValue::Point(p) => {
                VariableValue::Point(Point2D::new(p.x + delta[0], p.y + delta[1]))
            }
            VariableValue::Line { start, end } => VariableValue::Line {
                start: Point2D::new(start.x + delta[0], start.y + delta[1]),
                end: Point2D::new(end.x + delta[2], end.y + delta[3]),
            },
        }
    }

    /// Flatten into tangent coordinates.
    pub fn to_vec(&self) -> Vec<f64> {
        match *self {
            VariableValue::Pose(p) => vec![p.x, p.y, p.theta],
            VariableValue::Point(p) => vec![p.x, p.y],
            VariableValue::Line { start, end } => vec![start.x, start.y, end.x, end.y],
        }
    }

    /// Whether every component is finite.
    pub fn is_finite(&self) -> bool {
        self.to_vec().iter().all(|v| v.is_finite())
    }

    /// Pose value, if this is a pose.
    #[inline]
    pub fn as_pose(&self) -> Option<Pose2D> {
        match *self {
            VariableValue::Pose(p) => Some(p),
            _ => None,
        }
    }

    /// Point value, if this is a point.
    #[inline]
    pub fn as_point(&self) -> Option<Point2D> {
        match *self {
            VariableValue::Point(p) => Some(p),
            _ => None,
        }
    }

    /// Line endpoints, if this is a line.
    #[inline]
    pub fn as_line(&self) -> Option<(Point2D, Point2D)> {
        match *self {
            VariableValue::Line { start, end } => Some((start, end)),
            _ => None,
        }
    }
}

/// Ordered variable assignment.
pub type Values = BTreeMap<VariableKey, VariableValue>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_key_order_and_display() {
        let mut keys = vec![
            VariableKey::Line(0),
            VariableKey::Point(3),
            VariableKey::Pose(7),
            VariableKey::Pose(1),
        ];
        keys.sort();
        assert_eq!(keys[0], VariableKey::Pose(1));
        assert_eq!(keys[3], VariableKey::Line(0));
        assert_eq!(VariableKey::Point(3).to_string(), "b3");
    }

    #[test]
    fn test_retract_wraps_heading() {
        let v = VariableValue::Pose(Pose2D::new(0.0, 0.0, PI - 0.05));
        let r = v.retract(&[1.0, 2.0, 0.1]).as_pose().unwrap();
        assert_eq!(r.x, 1.0);
        assert_eq!(r.y, 2.0);
        assert!((r.theta - (-PI + 0.05)).abs() < 1e-12);
    }

    #[test]
    fn test_retract_line_endpoints() {
        let v = VariableValue::Line {
            start: Point2D::new(0.0, 0.0),
            end: Point2D::new(1.0, 0.0),
        };
        let (s, e) = v.retract(&[0.5, 0.0, 0.0, 1.0]).as_line().unwrap();
        assert_eq!(s, Point2D::new(0.5, 0.0));
        assert_eq!(e, Point2D::new(1.0, 1.0));
    }
}
