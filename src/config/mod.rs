//! Unified configuration loading for JalaSLAM.
//!
//! Loads all configuration from a single YAML (or TOML) file with sensible
//! defaults, then validates it into a runtime [`SessionConfig`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use jala_slam::config::JalaConfig;
//!
//! // Load from default path (configs/jala.yaml)
//! let config = JalaConfig::load_default()?;
//!
//! // Validate tables and convert to the runtime config
//! let session_config = config.to_session_config()?;
//! ```
//!
//! ## Configuration Sections
//!
//! | Section | Description |
//! |---------|-------------|
//! | [`SigmaSection`] | Prior, odometry and detection sigmas |
//! | [`AssociationSection`] | Manual tables, gating thresholds, priority |
//! | `batching` | Rope batching policy |
//! | [`SwathSection`] | Swath layout and swath line ids |
//! | [`MapSection`] | Static buoy and rope priors |
//! | `estimator` | Incremental solver |
//! | [`BufferSection`] | Detection reorder buffer |
//! | `verbosity` | Diagnostic toggles |
//! | [`RecordingSection`] | Ground truth and rope usage switches |
//!
//! ## Example YAML
//!
//! ```yaml
//! sigmas:
//!   odo_ang_sig_deg: 0.1
//!   rope_along_sig: -3.0      # scale with rope length
//!
//! association:
//!   manual_associations: true
//!   buoy_seq_ids: [4, [10, 14]]
//!   buoy_ids: [0, -1]         # -1 rejects
//!   da_distance_threshold: 5.0
//!
//! batching:
//!   individual_rope_detections: false
//!   rope_batch_by_line: true
//!
//! map:
//!   buoys: [[0.0, 0.0], [40.0, 0.0]]
//!   ropes_by_buoy_ind: [[0, 1]]
//! ```
//!
//! [`SessionConfig`]: crate::engine::slam::SessionConfig

mod association;
pub(crate) mod defaults;
mod error;
mod jala;
mod map;
mod sigmas;

// Re-export main types
pub use error::ConfigError;
pub use jala::JalaConfig;

// Re-export section types
pub use association::{AssociationSection, SwathSection};
pub use jala::{BufferSection, RecordingSection};
pub use map::MapSection;
pub use sigmas::SigmaSection;
