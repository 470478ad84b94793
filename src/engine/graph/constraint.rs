//! Typed graph constraints and their residual models.
//!
//! Every constraint is a tagged variant over variable ids with its own
//! measurement and diagonal noise. A single [`Constraint::linearize`] call
//! evaluates the whitened residual and Jacobians used by the solver:
//!
//! ```text
//! r̃ = Σ^{-1/2} e(x, z)        J̃ = Σ^{-1/2} ∂e/∂x
//! χ² = Σ r̃ᵀ r̃
//! ```

use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::variables::{Values, VariableKey};
use crate::core::math::normalize_angle;
use crate::core::types::{Point2D, Pose2D};

/// Step for central-difference Jacobians.
const NUMERIC_STEP: f64 = 1e-6;

/// Degenerate geometry threshold (meters).
const MIN_EXTENT: f64 = 1e-9;

/// A measurement constraint (factor) between graph variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Absolute anchor on a pose.
    PosePrior {
        /// Constrained pose
        pose: u64,
        /// Prior mean
        mean: Pose2D,
        /// (x, y, θ) sigmas, θ in radians
        sigmas: [f64; 3],
    },

    /// Relative motion between consecutive poses.
    Odometry {
        /// Earlier pose
        from: u64,
        /// Later pose
        to: u64,
        /// Measured motion in the `from` frame
        delta: Pose2D,
        /// (x, y, θ) sigmas, θ in radians
        sigmas: [f64; 3],
    },

    /// Bearing/range observation of a point landmark.
    PointLandmark {
        /// Observing pose
        pose: u64,
        /// Observed point
        landmark: u64,
        /// Bearing relative to heading (radians)
        bearing: f64,
        /// Range (meters)
        range: f64,
        /// (bearing, range) sigmas
        sigmas: [f64; 2],
    },

    /// Detection of a point lying on a line landmark.
    ///
    /// The detected world point is compared with the line centre, projected
    /// on the line direction (along-track) and its normal (cross-track).
    LineLandmark {
        /// Observing pose
        pose: u64,
        /// Observed line
        line: u64,
        /// Detected point in the pose body frame
        offset: Point2D,
        /// (along, cross) sigmas in meters
        sigmas: [f64; 2],
    },

    /// Static prior on a point landmark.
    PointPrior {
        /// Constrained point
        landmark: u64,
        /// Prior position
        mean: Point2D,
        /// Isotropic sigma (meters)
        sigma: f64,
    },

    /// Static prior on both endpoints of a line landmark.
    LinePrior {
        /// Constrained line
        line: u64,
        /// Prior first endpoint
        start: Point2D,
        /// Prior second endpoint
        end: Point2D,
        /// Isotropic sigma (meters)
        sigma: f64,
    },
}

/// Constraint discriminant, for counting and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// [`Constraint::PosePrior`]
    PosePrior,
    /// [`Constraint::Odometry`]
    Odometry,
    /// [`Constraint::PointLandmark`]
    PointLandmark,
    /// [`Constraint::LineLandmark`]
    LineLandmark,
    /// [`Constraint::PointPrior`]
    PointPrior,
    /// [`Constraint::LinePrior`]
    LinePrior,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstraintKind::PosePrior => "pose_prior",
            ConstraintKind::Odometry => "odometry",
            ConstraintKind::PointLandmark => "point_landmark",
            ConstraintKind::LineLandmark => "line_landmark",
            ConstraintKind::PointPrior => "point_prior",
            ConstraintKind::LinePrior => "line_prior",
        };
        f.write_str(name)
    }
}

/// Whitened residual and per-variable Jacobian blocks.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// Whitened residual.
    pub residual: DVector<f64>,
    /// Whitened Jacobian block for each variable, in [`Constraint::keys`] order.
    pub jacobians: Vec<(VariableKey, DMatrix<f64>)>,
}

impl Constraint {
    /// Discriminant.
    pub fn kind(&self) -> ConstraintKind {
        match self {
            Constraint::PosePrior { .. } => ConstraintKind::PosePrior,
            Constraint::Odometry { .. } => ConstraintKind::Odometry,
            Constraint::PointLandmark { .. } => ConstraintKind::PointLandmark,
            Constraint::LineLandmark { .. } => ConstraintKind::LineLandmark,
            Constraint::PointPrior { .. } => ConstraintKind::PointPrior,
            Constraint::LinePrior { .. } => ConstraintKind::LinePrior,
        }
    }

    /// Variables this constraint connects.
    pub fn keys(&self) -> Vec<VariableKey> {
        match *self {
            Constraint::PosePrior { pose, .. } => vec![VariableKey::Pose(pose)],
            Constraint::Odometry { from, to, .. } => {
                vec![VariableKey::Pose(from), VariableKey::Pose(to)]
            }
            Constraint::PointLandmark { pose, landmark, .. } => {
                vec![VariableKey::Pose(pose), VariableKey::Point(landmark)]
            }
            Constraint::LineLandmark { pose, line, .. } => {
                vec![VariableKey::Pose(pose), VariableKey::Line(line)]
            }
            Constraint::PointPrior { landmark, .. } => vec![VariableKey::Point(landmark)],
            Constraint::LinePrior { line, .. } => vec![VariableKey::Line(line)],
        }
    }

    /// Landmark variable touched by this constraint, if any.
    ///
    /// Used to group constraints for deferral: everything added for one
    /// landmark is accepted or deferred together.
    pub fn landmark(&self) -> Option<VariableKey> {
        self.keys().into_iter().find(VariableKey::is_landmark)
    }

    /// Residual dimension.
    pub fn dim(&self) -> usize {
        self.sigmas().len()
    }

    /// Diagonal noise sigmas, one per residual row.
    pub fn sigmas(&self) -> Vec<f64> {
        match *self {
            Constraint::PosePrior { sigmas, .. } | Constraint::Odometry { sigmas, .. } => {
                sigmas.to_vec()
            }
            Constraint::PointLandmark { sigmas, .. } | Constraint::LineLandmark { sigmas, .. } => {
                sigmas.to_vec()
            }
            Constraint::PointPrior { sigma, .. } => vec![sigma; 2],
            Constraint::LinePrior { sigma, .. } => vec![sigma; 4],
        }
    }

    /// Whitened squared error at `values`.
    pub fn chi_squared(&self, values: &Values) -> Option<f64> {
        let (error, _) = self.evaluate(values, false)?;
        let sigmas = self.sigmas();
        Some(
            error
                .iter()
                .zip(&sigmas)
                .map(|(e, s)| (e / s) * (e / s))
                .sum(),
        )
    }

    /// Whitened residual and Jacobians at `values`.
    ///
    /// Returns `None` if a variable is missing or the geometry is degenerate
    /// (zero range, zero-length line).
    pub fn linearize(&self, values: &Values) -> Option<Linearization> {
        let (error, jacobians) = self.evaluate(values, true)?;
        let sigmas = self.sigmas();

        let mut residual = DVector::from_vec(error);
        for (r, s) in residual.iter_mut().zip(&sigmas) {
            *r /= s;
        }

        let jacobians = self
            .keys()
            .into_iter()
            .zip(jacobians)
            .map(|(key, mut j)| {
                for (row, s) in sigmas.iter().enumerate() {
                    for col in 0..j.ncols() {
                        j[(row, col)] /= s;
                    }
                }
                (key, j)
            })
            .collect();

        Some(Linearization {
            residual,
            jacobians,
        })
    }

    /// Raw (unwhitened) error and, if requested, Jacobians in key order.
    fn evaluate(&self, values: &Values, with_jacobians: bool) -> Option<(Vec<f64>, Vec<DMatrix<f64>>)> {
        match *self {
            Constraint::PosePrior { pose, mean, .. } => {
                let x = pose_of(values, pose)?;
                let error = vec![x.x - mean.x, x.y - mean.y, normalize_angle(x.theta - mean.theta)];
                let jacobians = jacobians_if(with_jacobians, || vec![DMatrix::identity(3, 3)]);
                Some((error, jacobians))
            }

            Constraint::Odometry { from, to, delta, .. } => {
                let xi = pose_of(values, from)?;
                let xj = pose_of(values, to)?;
                let predicted = xi.between(&xj);
                let error = vec![
                    predicted.x - delta.x,
                    predicted.y - delta.y,
                    normalize_angle(predicted.theta - delta.theta),
                ];
                let jacobians = jacobians_if(with_jacobians, || {
                    let (ji, jj) = odometry_jacobians(&xi, &xj);
                    vec![ji, jj]
                });
                Some((error, jacobians))
            }

            Constraint::PointLandmark {
                pose,
                landmark,
                bearing,
                range,
                ..
            } => {
                let x = pose_of(values, pose)?;
                let p = values.get(&VariableKey::Point(landmark))?.as_point()?;
                let dx = p.x - x.x;
                let dy = p.y - x.y;
                let q = dx * dx + dy * dy;
                if q.sqrt() < MIN_EXTENT {
                    return None;
                }

                let (pred_bearing, pred_range) = x.bearing_range_to(&p);
                let error = vec![normalize_angle(pred_bearing - bearing), pred_range - range];
                let jacobians = jacobians_if(with_jacobians, || {
                    let r = q.sqrt();
                    // d(bearing), d(range) with respect to (x, y, θ) and (px, py)
                    let jx = DMatrix::from_row_slice(
                        2,
                        3,
                        &[dy / q, -dx / q, -1.0, -dx / r, -dy / r, 0.0],
                    );
                    let jp = DMatrix::from_row_slice(2, 2, &[-dy / q, dx / q, dx / r, dy / r]);
                    vec![jx, jp]
                });
                Some((error, jacobians))
            }

            Constraint::LineLandmark {
                pose, line, offset, ..
            } => {
                let x = pose_of(values, pose)?;
                let (start, end) = values.get(&VariableKey::Line(line))?.as_line()?;
                let error = line_error(&x, &start, &end, &offset)?.to_vec();
                let jacobians = if with_jacobians {
                    line_jacobians(&x, &start, &end, &offset)?
                } else {
                    Vec::new()
                };
                Some((error, jacobians))
            }

            Constraint::PointPrior { landmark, mean, .. } => {
                let p = values.get(&VariableKey::Point(landmark))?.as_point()?;
                let error = vec![p.x - mean.x, p.y - mean.y];
                let jacobians = jacobians_if(with_jacobians, || vec![DMatrix::identity(2, 2)]);
                Some((error, jacobians))
            }

            Constraint::LinePrior {
                line, start, end, ..
            } => {
                let (s, e) = values.get(&VariableKey::Line(line))?.as_line()?;
                let error = vec![s.x - start.x, s.y - start.y, e.x - end.x, e.y - end.y];
                let jacobians = jacobians_if(with_jacobians, || vec![DMatrix::identity(4, 4)]);
                Some((error, jacobians))
            }
        }
    }
}

#[inline]
fn pose_of(values: &Values, id: u64) -> Option<Pose2D> {
    values.get(&VariableKey::Pose(id))?.as_pose()
}

#[inline]
fn jacobians_if(wanted: bool, f: impl FnOnce() -> Vec<DMatrix<f64>>) -> Vec<DMatrix<f64>> {
    if wanted {
        f()
    } else {
        Vec::new()
    }
}

/// Jacobians of `xi⁻¹ ⊕ xj` with respect to xi and xj.
fn odometry_jacobians(xi: &Pose2D, xj: &Pose2D) -> (DMatrix<f64>, DMatrix<f64>) {
    let (sin_i, cos_i) = xi.theta.sin_cos();
    let dx = xj.x - xi.x;
    let dy = xj.y - xi.y;

    // ∂e/∂xi
    let ji = DMatrix::from_row_slice(
        3,
        3,
        &[
            -cos_i,
            -sin_i,
            -sin_i * dx + cos_i * dy,
            sin_i,
            -cos_i,
            -cos_i * dx - sin_i * dy,
            0.0,
            0.0,
            -1.0,
        ],
    );

    // ∂e/∂xj = R(θi)ᵀ
    let jj = DMatrix::from_row_slice(
        3,
        3,
        &[cos_i, sin_i, 0.0, -sin_i, cos_i, 0.0, 0.0, 0.0, 1.0],
    );

    (ji, jj)
}

/// Along-track / cross-track error of a detected point against a line.
pub(crate) fn line_error(
    pose: &Pose2D,
    start: &Point2D,
    end: &Point2D,
    offset: &Point2D,
) -> Option<[f64; 2]> {
    let length = start.distance(end);
    if length < MIN_EXTENT {
        return None;
    }

    let ux = (end.x - start.x) / length;
    let uy = (end.y - start.y) / length;
    let d = pose.transform_point(offset).minus(&start.midpoint(end));

    Some([d.x * ux + d.y * uy, -d.x * uy + d.y * ux])
}

/// Central-difference Jacobians of [`line_error`] for (pose, line).
fn line_jacobians(
    pose: &Pose2D,
    start: &Point2D,
    end: &Point2D,
    offset: &Point2D,
) -> Option<Vec<DMatrix<f64>>> {
    let x0 = [pose.x, pose.y, pose.theta, start.x, start.y, end.x, end.y];
    let eval = |x: &[f64; 7]| {
        line_error(
            &Pose2D {
                x: x[0],
                y: x[1],
                theta: x[2],
            },
            &Point2D::new(x[3], x[4]),
            &Point2D::new(x[5], x[6]),
            offset,
        )
    };

    let mut full = DMatrix::zeros(2, 7);
    for col in 0..7 {
        let mut plus = x0;
        let mut minus = x0;
        plus[col] += NUMERIC_STEP;
        minus[col] -= NUMERIC_STEP;
        let ep = eval(&plus)?;
        let em = eval(&minus)?;
        for row in 0..2 {
            full[(row, col)] = (ep[row] - em[row]) / (2.0 * NUMERIC_STEP);
        }
    }

    Some(vec![
        full.columns(0, 3).into_owned(),
        full.columns(3, 4).into_owned(),
    ])
}
