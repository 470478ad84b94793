//! Configuration loading and validation errors.

use thiserror::Error;

use crate::engine::association::SeqTableError;

/// Errors raised while loading or validating configuration.
///
/// All of these are startup failures. A running session never produces one.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(String),

    /// YAML or TOML could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A manual association table is malformed.
    #[error(transparent)]
    Table(#[from] SeqTableError),

    /// Selector list and id list of a manual table differ in length.
    #[error("{table}: {selectors} sequence selectors but {ids} ids")]
    TableLengthMismatch {
        /// Table name
        table: &'static str,
        /// Number of sequence selectors
        selectors: usize,
        /// Number of ids
        ids: usize,
    },

    /// A line defined by buoy indices names a buoy that does not exist.
    #[error("rope {rope}: buoy index {index} out of range ({count} buoys)")]
    BuoyIndexOutOfRange {
        /// Rope index in `ropes_by_buoy_ind`
        rope: usize,
        /// Offending buoy index
        index: usize,
        /// Number of configured buoys
        count: usize,
    },

    /// A numeric option is outside its valid range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Option name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
