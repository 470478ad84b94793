//! Mathematical primitives for 2D estimation.
//!
//! Angle normalization plus the small amount of line geometry needed by
//! association gating and line constraints.

use std::f64::consts::PI;

use nalgebra::Matrix2;

use super::types::Point2D;

/// Normalize angle to [-π, π].
///
/// # Example
/// ```
/// use jala_slam::core::math::normalize_angle;
/// use std::f64::consts::PI;
///
/// assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
/// assert!((normalize_angle(-3.0 * PI) - (-PI)).abs() < 1e-9);
/// ```
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Shortest angular difference from angle `a` to angle `b`.
#[inline]
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(b - a)
}

/// Point of the segment `a`-`b` closest to `p`.
///
/// Degenerate segments (a == b) return `a`.
///
/// ```text
/// t = clamp(((p - a) · (b - a)) / |b - a|², 0, 1)
/// c = a + t (b - a)
/// ```
pub fn closest_point_on_segment(p: &Point2D, a: &Point2D, b: &Point2D) -> Point2D {
    let vx = b.x - a.x;
    let vy = b.y - a.y;
    let len_sq = vx * vx + vy * vy;

    if len_sq < f64::EPSILON {
        return *a;
    }

    let t = (((p.x - a.x) * vx + (p.y - a.y) * vy) / len_sq).clamp(0.0, 1.0);
    Point2D::new(a.x + t * vx, a.y + t * vy)
}

/// Euclidean distance from `p` to the segment `a`-`b`.
///
/// Degenerate segments fall back to point distance.
#[inline]
pub fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f64 {
    p.distance(&closest_point_on_segment(p, a, b))
}

/// Covariance of a line measurement expressed in the world frame.
///
/// Along-track variance lies on the line direction `angle`, cross-track
/// variance on its normal:
/// ```text
/// Σ = R(angle) · diag(σ_along², σ_cross²) · R(angle)ᵀ
/// ```
pub fn along_cross_covariance(along_sigma: f64, cross_sigma: f64, angle: f64) -> Matrix2<f64> {
    let (s, c) = angle.sin_cos();
    let rot = Matrix2::new(c, -s, s, c);
    let diag = Matrix2::new(along_sigma * along_sigma, 0.0, 0.0, cross_sigma * cross_sigma);
    rot * diag * rot.transpose()
}

/// Sigmas spanning half a line when the along-track sigma is `0`.
const DEFAULT_LENGTH_SIGMAS: f64 = 3.0;

/// Along-track sigma of a line measurement.
///
/// ```text
/// configured > 0:  σ_along = configured
/// configured < 0:  σ_along = L / (2 |configured|)
/// configured = 0:  σ_along = L / (2 · 3)
/// ```
///
/// Scaled sigmas never drop below `cross_sigma`, so a line collapsed to a
/// point keeps a usable noise model.
pub fn line_along_sigma(configured: f64, cross_sigma: f64, line_length: f64) -> f64 {
    if configured > 0.0 {
        return configured;
    }
    let n = if configured == 0.0 {
        DEFAULT_LENGTH_SIGMAS
    } else {
        configured.abs()
    };
    (line_length / (2.0 * n)).max(cross_sigma)
}

/// Squared Mahalanobis distance of `delta` under covariance `cov`.
///
/// Returns `None` when `cov` is not invertible.
pub fn mahalanobis_squared(delta: &Point2D, cov: &Matrix2<f64>) -> Option<f64> {
    let inv = cov.try_inverse()?;
    let d = nalgebra::Vector2::new(delta.x, delta.y);
    let m = d.dot(&(inv * d));
    m.is_finite().then_some(m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_line_along_sigma_rules() {
        assert_relative_eq!(line_along_sigma(15.0, 2.0, 100.0), 15.0);
        assert_relative_eq!(line_along_sigma(-2.0, 2.0, 40.0), 10.0);
        assert_relative_eq!(line_along_sigma(0.0, 2.0, 60.0), 10.0);
        assert_relative_eq!(line_along_sigma(-2.0, 2.0, 0.0), 2.0);
    }

    #[test]
    fn test_normalize_angle_wrap() {
        assert_relative_eq!(normalize_angle(0.0), 0.0);
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-12);
        assert_relative_eq!(normalize_angle(-3.0 * PI), -PI, epsilon = 1e-12);
    }

    #[test]
    fn test_angle_diff_crosses_boundary() {
        let diff = angle_diff(PI - 0.1, -PI + 0.1);
        assert_relative_eq!(diff, 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);

        // Perpendicular foot inside the segment
        assert_relative_eq!(point_segment_distance(&Point2D::new(5.0, 3.0), &a, &b), 3.0);
        // Beyond the end point
        assert_relative_eq!(point_segment_distance(&Point2D::new(13.0, 4.0), &a, &b), 5.0);
        // Degenerate segment
        assert_relative_eq!(point_segment_distance(&Point2D::new(3.0, 4.0), &a, &a), 5.0);
    }

    #[test]
    fn test_closest_point_clamps_to_endpoints() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);

        assert_eq!(closest_point_on_segment(&Point2D::new(4.0, -2.0), &a, &b), Point2D::new(4.0, 0.0));
        assert_eq!(closest_point_on_segment(&Point2D::new(-3.0, 1.0), &a, &b), a);
        assert_eq!(closest_point_on_segment(&Point2D::new(12.0, 1.0), &a, &b), b);
    }

    #[test]
    fn test_along_cross_covariance_axis_aligned() {
        let cov = along_cross_covariance(3.0, 1.0, 0.0);
        assert_relative_eq!(cov[(0, 0)], 9.0);
        assert_relative_eq!(cov[(1, 1)], 1.0);
        assert_relative_eq!(cov[(0, 1)], 0.0);

        let rotated = along_cross_covariance(3.0, 1.0, PI / 2.0);
        assert_relative_eq!(rotated[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(rotated[(1, 1)], 9.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mahalanobis_identity() {
        let m = mahalanobis_squared(&Point2D::new(3.0, 4.0), &Matrix2::identity()).unwrap();
        assert_relative_eq!(m, 25.0);
        assert!(mahalanobis_squared(&Point2D::new(1.0, 0.0), &Matrix2::zeros()).is_none());
    }
}
