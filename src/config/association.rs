//! Data association and swath configuration.

use serde::{Deserialize, Serialize};

use super::defaults;
use super::error::ConfigError;
use crate::engine::association::{
    AssociationConfig, ManualTarget, SeqSelector, SeqTable, SwathTable,
};

/// Association settings.
///
/// Manual tables pair sequence-id selectors with landmark ids; `-1` rejects
/// the detection. With `manual_associations` enabled the tables are
/// authoritative and automatic gating only handles sequence ids they do not
/// cover.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssociationSection {
    /// Use the manual tables.
    #[serde(default)]
    pub manual_associations: bool,

    /// Buoy detection sequence ids.
    #[serde(default)]
    pub buoy_seq_ids: Vec<SeqSelector>,

    /// Buoy ids matching `buoy_seq_ids` (-1 rejects).
    #[serde(default)]
    pub buoy_ids: Vec<i64>,

    /// Rope detection sequence ids.
    #[serde(default)]
    pub rope_seq_ids: Vec<SeqSelector>,

    /// Line ids matching `rope_seq_ids` (-1 rejects).
    #[serde(default)]
    pub rope_line_ids: Vec<i64>,

    /// Euclidean gate in meters (<= 0 disables).
    #[serde(default = "defaults::disabled_threshold")]
    pub da_distance_threshold: f64,

    /// Mahalanobis gate (<= 0 disables). Takes precedence over the
    /// Euclidean gate when enabled.
    #[serde(default = "defaults::disabled_threshold")]
    pub da_m_distance_threshold: f64,

    /// Mint new landmarks for unmatched detections (false rejects them).
    #[serde(default = "defaults::enabled")]
    pub open_world: bool,

    /// Isotropic variance used for landmarks without a solved covariance.
    #[serde(default = "defaults::landmark_cov_fallback")]
    pub landmark_cov_fallback: f64,

    /// Let buoy detections pre-empt rope detections in the same window.
    #[serde(default)]
    pub buoy_priority: bool,

    /// Width of the priority window (milliseconds).
    #[serde(default = "defaults::priority_window_ms")]
    pub priority_window_ms: u64,
}

impl Default for AssociationSection {
    fn default() -> Self {
        Self {
            manual_associations: false,
            buoy_seq_ids: Vec::new(),
            buoy_ids: Vec::new(),
            rope_seq_ids: Vec::new(),
            rope_line_ids: Vec::new(),
            da_distance_threshold: defaults::disabled_threshold(),
            da_m_distance_threshold: defaults::disabled_threshold(),
            open_world: defaults::enabled(),
            landmark_cov_fallback: defaults::landmark_cov_fallback(),
            buoy_priority: false,
            priority_window_ms: defaults::priority_window_ms(),
        }
    }
}

/// Swath layout for batching and manual rope association.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SwathSection {
    /// One entry per swath, each a list of sequence-id selectors.
    #[serde(default)]
    pub swath_seq_ids: Vec<Vec<SeqSelector>>,

    /// Line id observed during each swath (-1 rejects).
    #[serde(default)]
    pub swath_line_ids: Vec<i64>,

    /// Associate rope detections inside a swath with the swath's line.
    #[serde(default)]
    pub batch_by_swath_manual_rope_da: bool,
}

impl SwathSection {
    /// Build the swath table. `None` when no swaths are configured.
    pub fn to_swath_table(&self) -> Result<Option<SwathTable>, ConfigError> {
        if self.swath_seq_ids.is_empty() {
            return Ok(None);
        }

        if !self.swath_line_ids.is_empty() && self.swath_line_ids.len() != self.swath_seq_ids.len()
        {
            return Err(ConfigError::TableLengthMismatch {
                table: "swath_line_ids",
                selectors: self.swath_seq_ids.len(),
                ids: self.swath_line_ids.len(),
            });
        }

        if self.batch_by_swath_manual_rope_da && self.swath_line_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "swath_line_ids",
                reason: "required by batch_by_swath_manual_rope_da".to_string(),
            });
        }

        let lines = self
            .swath_line_ids
            .iter()
            .map(|id| ManualTarget::from_config("swath_line_ids", *id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SwathTable::build(&self.swath_seq_ids, lines)?))
    }
}

fn build_table(
    table: &'static str,
    selectors: &[SeqSelector],
    ids: &[i64],
) -> Result<SeqTable<ManualTarget>, ConfigError> {
    if selectors.len() != ids.len() {
        return Err(ConfigError::TableLengthMismatch {
            table,
            selectors: selectors.len(),
            ids: ids.len(),
        });
    }

    let entries = selectors
        .iter()
        .zip(ids)
        .map(|(selector, id)| Ok((*selector, ManualTarget::from_config(table, *id)?)))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(SeqTable::build(table, entries)?)
}

impl AssociationSection {
    /// Validate tables and build the runtime association config.
    ///
    /// `line_sigmas` are the rope (along, cross) sigmas used for line gating.
    pub fn to_association_config(
        &self,
        swath: &SwathSection,
        line_sigmas: (f64, f64),
    ) -> Result<AssociationConfig, ConfigError> {
        if !(self.landmark_cov_fallback.is_finite() && self.landmark_cov_fallback > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "landmark_cov_fallback",
                reason: format!("must be positive, got {}", self.landmark_cov_fallback),
            });
        }

        let point_table = build_table("buoy_ids", &self.buoy_seq_ids, &self.buoy_ids)?;
        let line_table = build_table("rope_line_ids", &self.rope_seq_ids, &self.rope_line_ids)?;

        let swaths = if swath.batch_by_swath_manual_rope_da {
            swath.to_swath_table()?
        } else {
            None
        };

        Ok(AssociationConfig {
            manual: self.manual_associations,
            point_table,
            line_table,
            swaths,
            distance_threshold: (self.da_distance_threshold > 0.0)
                .then_some(self.da_distance_threshold),
            mahalanobis_threshold: (self.da_m_distance_threshold > 0.0)
                .then_some(self.da_m_distance_threshold),
            open_world: self.open_world,
            landmark_cov_fallback: self.landmark_cov_fallback,
            line_along_sigma: line_sigmas.0,
            line_cross_sigma: line_sigmas.1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_automatic_and_ungated() {
        let config = AssociationSection::default()
            .to_association_config(&SwathSection::default(), (15.0, 2.0))
            .unwrap();
        assert!(!config.manual);
        assert!(config.distance_threshold.is_none());
        assert!(config.mahalanobis_threshold.is_none());
        assert!(config.point_table.is_empty());
    }

    #[test]
    fn test_mismatched_table_rejected() {
        let section = AssociationSection {
            manual_associations: true,
            buoy_seq_ids: vec![SeqSelector::Single(1), SeqSelector::Single(2)],
            buoy_ids: vec![0],
            ..Default::default()
        };
        let err = section
            .to_association_config(&SwathSection::default(), (15.0, 2.0))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TableLengthMismatch {
                table: "buoy_ids",
                selectors: 2,
                ids: 1
            }
        ));
    }

    #[test]
    fn test_overlapping_table_rejected() {
        let section = AssociationSection {
            rope_seq_ids: vec![SeqSelector::Range([0, 10]), SeqSelector::Range([5, 12])],
            rope_line_ids: vec![0, 1],
            ..Default::default()
        };
        let err = section
            .to_association_config(&SwathSection::default(), (15.0, 2.0))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Table(_)));
    }

    #[test]
    fn test_swath_line_ids_required_for_manual_rope_da() {
        let swath = SwathSection {
            swath_seq_ids: vec![vec![SeqSelector::Range([0, 5])]],
            swath_line_ids: Vec::new(),
            batch_by_swath_manual_rope_da: true,
        };
        assert!(swath.to_swath_table().is_err());
    }
}
