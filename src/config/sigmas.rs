//! Noise sigma configuration.
//!
//! Angular sigmas are configured in degrees and converted to radians when
//! the runtime [`NoiseSigmas`] is built. Distance sigmas are in meters.

use serde::{Deserialize, Serialize};

use super::defaults;
use super::error::ConfigError;
use crate::engine::graph::NoiseSigmas;

/// Sigma settings for priors, odometry and detections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigmaSection {
    /// Heading sigma of the anchor prior (degrees).
    #[serde(default = "defaults::prior_ang_sig_deg")]
    pub prior_ang_sig_deg: f64,

    /// Position sigma of the anchor prior (meters).
    #[serde(default = "defaults::prior_dist_sig")]
    pub prior_dist_sig: f64,

    /// Heading sigma of one odometry step (degrees).
    #[serde(default = "defaults::odo_ang_sig_deg")]
    pub odo_ang_sig_deg: f64,

    /// Position sigma of one odometry step (meters).
    #[serde(default = "defaults::odo_dist_sig")]
    pub odo_dist_sig: f64,

    /// Sigma of static buoy priors (meters).
    #[serde(default = "defaults::buoy_dist_sig")]
    pub buoy_dist_sig: f64,

    /// Sigma of static and naive rope endpoint priors (meters).
    #[serde(default = "defaults::rope_dist_sig")]
    pub rope_dist_sig: f64,

    /// Bearing sigma of buoy detections (degrees).
    #[serde(default = "defaults::buoy_detect_ang_sig_deg")]
    pub buoy_detect_ang_sig_deg: f64,

    /// Range sigma of buoy detections (meters).
    #[serde(default = "defaults::buoy_detect_dist_sig")]
    pub buoy_detect_dist_sig: f64,

    /// Along-track sigma of rope detections (meters).
    ///
    /// Values `<= 0` scale with the rope length: `L / (2N)` where
    /// `N = |rope_along_sig|`, or `N = 3` when zero.
    #[serde(default = "defaults::rope_along_sig")]
    pub rope_along_sig: f64,

    /// Cross-track sigma of rope detections (meters).
    #[serde(default = "defaults::rope_cross_sig")]
    pub rope_cross_sig: f64,
}

impl Default for SigmaSection {
    fn default() -> Self {
        Self {
            prior_ang_sig_deg: defaults::prior_ang_sig_deg(),
            prior_dist_sig: defaults::prior_dist_sig(),
            odo_ang_sig_deg: defaults::odo_ang_sig_deg(),
            odo_dist_sig: defaults::odo_dist_sig(),
            buoy_dist_sig: defaults::buoy_dist_sig(),
            rope_dist_sig: defaults::rope_dist_sig(),
            buoy_detect_ang_sig_deg: defaults::buoy_detect_ang_sig_deg(),
            buoy_detect_dist_sig: defaults::buoy_detect_dist_sig(),
            rope_along_sig: defaults::rope_along_sig(),
            rope_cross_sig: defaults::rope_cross_sig(),
        }
    }
}

impl SigmaSection {
    /// Check that every fixed sigma is strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("prior_ang_sig_deg", self.prior_ang_sig_deg),
            ("prior_dist_sig", self.prior_dist_sig),
            ("odo_ang_sig_deg", self.odo_ang_sig_deg),
            ("odo_dist_sig", self.odo_dist_sig),
            ("buoy_dist_sig", self.buoy_dist_sig),
            ("rope_dist_sig", self.rope_dist_sig),
            ("buoy_detect_ang_sig_deg", self.buoy_detect_ang_sig_deg),
            ("buoy_detect_dist_sig", self.buoy_detect_dist_sig),
            ("rope_cross_sig", self.rope_cross_sig),
        ];

        for (field, value) in fields {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("sigma must be positive, got {value}"),
                });
            }
        }

        if !self.rope_along_sig.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "rope_along_sig",
                reason: "must be finite".to_string(),
            });
        }

        Ok(())
    }

    /// Runtime sigmas with angles in radians.
    pub fn to_noise_sigmas(&self) -> NoiseSigmas {
        NoiseSigmas {
            prior: [
                self.prior_dist_sig,
                self.prior_dist_sig,
                self.prior_ang_sig_deg.to_radians(),
            ],
            odometry: [
                self.odo_dist_sig,
                self.odo_dist_sig,
                self.odo_ang_sig_deg.to_radians(),
            ],
            buoy_detection: [
                self.buoy_detect_ang_sig_deg.to_radians(),
                self.buoy_detect_dist_sig,
            ],
            rope_along: self.rope_along_sig,
            rope_cross: self.rope_cross_sig,
            buoy_prior: self.buoy_dist_sig,
            rope_prior: self.rope_dist_sig,
        }
    }
}
