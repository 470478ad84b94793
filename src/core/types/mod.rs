//! Core data types for estimation.
//!
//! - [`Point2D`]: 2D point in meters
//! - [`Pose2D`]: Vehicle pose (x, y, theta) in meters and radians
//! - [`Covariance`]: Dense covariance of a solved variable
//! - [`Detection`]: Landmark detection from camera or sonar
//! - [`OdometryTick`]: Dead-reckoning increment

mod covariance;
mod detection;
mod pose;

pub use covariance::Covariance;
pub use detection::{
    Detection, DetectionTarget, LandmarkKind, OdometryTick, RelativePosition, SensorSource,
};
pub use pose::{Point2D, Pose2D};
