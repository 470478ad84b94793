//! Main JalaConfig and conversion methods.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::association::{AssociationSection, SwathSection};
use super::defaults;
use super::error::ConfigError;
use super::map::MapSection;
use super::sigmas::SigmaSection;
use crate::engine::batching::BatchingConfig;
use crate::engine::graph::{ConstraintFactory, EstimatorConfig};
use crate::engine::offline::{OfflineConfig, OfflineSolver};
use crate::engine::slam::{SessionConfig, Verbosity};

/// Reorder buffer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferSection {
    /// Detections held while waiting for odometry to catch up.
    #[serde(default = "defaults::sss_buffer_len")]
    pub sss_buffer_len: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            sss_buffer_len: defaults::sss_buffer_len(),
        }
    }
}

/// Input recording switches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordingSection {
    /// Tag poses from ground-truth ticks as ground truth.
    #[serde(default = "defaults::enabled")]
    pub record_ground_truth: bool,

    /// Commit rope detections to the graph (false only associates them).
    #[serde(default = "defaults::enabled")]
    pub use_rope_detections: bool,
}

impl Default for RecordingSection {
    fn default() -> Self {
        Self {
            record_ground_truth: defaults::enabled(),
            use_rope_detections: defaults::enabled(),
        }
    }
}

/// Full estimator configuration loaded from YAML or TOML.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct JalaConfig {
    /// Noise sigmas
    #[serde(default)]
    pub sigmas: SigmaSection,

    /// Data association
    #[serde(default)]
    pub association: AssociationSection,

    /// Rope detection batching
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Swath layout
    #[serde(default)]
    pub swath: SwathSection,

    /// Static map priors
    #[serde(default)]
    pub map: MapSection,

    /// Incremental solver
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Reorder buffer
    #[serde(default)]
    pub buffer: BufferSection,

    /// Diagnostic output toggles
    #[serde(default)]
    pub verbosity: Verbosity,

    /// Input recording
    #[serde(default)]
    pub recording: RecordingSection,

    /// Whole-survey batch solve
    #[serde(default)]
    pub offline: OfflineConfig,
}

impl JalaConfig {
    /// Load configuration from a file, picking the format by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    /// Load from default config path (configs/jala.yaml)
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Path::new("configs/jala.yaml");
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse from TOML string
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate everything and build the runtime session config.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        self.sigmas.validate()?;
        self.estimator.validate()?;

        if self.buffer.sss_buffer_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sss_buffer_len",
                reason: "must hold at least one detection".to_string(),
            });
        }

        let association = self.association.to_association_config(
            &self.swath,
            (self.sigmas.rope_along_sig, self.sigmas.rope_cross_sig),
        )?;

        let swaths = self.swath.to_swath_table()?;
        if self.batching.batch_by_swath && swaths.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "swath_seq_ids",
                reason: "required by batch_by_swath".to_string(),
            });
        }

        Ok(SessionConfig {
            sigmas: self.sigmas.to_noise_sigmas(),
            association,
            batching: self.batching.clone(),
            swaths,
            static_map: self.map.to_static_map()?,
            estimator: self.estimator.clone(),
            sss_buffer_len: self.buffer.sss_buffer_len,
            buoy_priority: self.association.buoy_priority,
            priority_window_us: self.association.priority_window_ms * 1000,
            record_ground_truth: self.recording.record_ground_truth,
            use_rope_detections: self.recording.use_rope_detections,
            verbosity: self.verbosity.clone(),
        })
    }

    /// Validate the sigma, solver and clustering settings and build an
    /// offline solver.
    pub fn to_offline_solver(&self) -> Result<OfflineSolver, ConfigError> {
        self.sigmas.validate()?;
        self.estimator.validate()?;

        if !(self.offline.cluster_mean_threshold >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "cluster_mean_threshold",
                reason: "must be non-negative".to_string(),
            });
        }

        Ok(OfflineSolver::new(
            ConstraintFactory::new(
                self.sigmas.to_noise_sigmas(),
                self.batching.individual_rope_detections,
            ),
            self.estimator.clone(),
            self.offline.clone(),
        ))
    }
}
