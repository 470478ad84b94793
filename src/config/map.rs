//! Static map priors.

use serde::{Deserialize, Serialize};

use super::defaults;
use super::error::ConfigError;
use crate::core::types::Point2D;
use crate::engine::graph::{StaticLine, StaticMap};

/// Known buoy and rope geometry.
///
/// Buoy `i` has point id `i`. Lines defined by buoy indices come first
/// (line ids `0..ropes_by_buoy_ind.len()`), followed by lines given by
/// explicit endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapSection {
    /// Buoy positions `[x, y]`.
    #[serde(default)]
    pub buoys: Vec<[f64; 2]>,

    /// Ropes strung between two buoys, by buoy index.
    #[serde(default)]
    pub ropes_by_buoy_ind: Vec<[usize; 2]>,

    /// Lines given by endpoints `[[x0, y0], [x1, y1]]`.
    #[serde(default)]
    pub lines: Vec<[[f64; 2]; 2]>,

    /// Fixed depth of line landmarks (meters).
    #[serde(default = "defaults::line_depth")]
    pub line_depth: f64,

    /// Length of lines seeded from a single detection (meters).
    #[serde(default = "defaults::seed_line_length")]
    pub seed_line_length: f64,

    /// Give lines minted from detections a weak endpoint prior.
    #[serde(default = "defaults::enabled")]
    pub use_naive_rope_priors: bool,

    /// Re-derive buoy-index rope priors from the current buoy estimates.
    #[serde(default)]
    pub update_priors: bool,
}

impl Default for MapSection {
    fn default() -> Self {
        Self {
            buoys: Vec::new(),
            ropes_by_buoy_ind: Vec::new(),
            lines: Vec::new(),
            line_depth: defaults::line_depth(),
            seed_line_length: defaults::seed_line_length(),
            use_naive_rope_priors: defaults::enabled(),
            update_priors: false,
        }
    }
}

impl MapSection {
    /// Validate indices and build the static map.
    pub fn to_static_map(&self) -> Result<StaticMap, ConfigError> {
        if !(self.seed_line_length.is_finite() && self.seed_line_length > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "seed_line_length",
                reason: format!("must be positive, got {}", self.seed_line_length),
            });
        }

        let buoys: Vec<Point2D> = self.buoys.iter().map(|[x, y]| Point2D::new(*x, *y)).collect();

        let mut lines = Vec::with_capacity(self.ropes_by_buoy_ind.len() + self.lines.len());
        for (rope, [a, b]) in self.ropes_by_buoy_ind.iter().enumerate() {
            for index in [*a, *b] {
                if index >= buoys.len() {
                    return Err(ConfigError::BuoyIndexOutOfRange {
                        rope,
                        index,
                        count: buoys.len(),
                    });
                }
            }
            lines.push(StaticLine {
                start: buoys[*a],
                end: buoys[*b],
                buoy_indices: Some([*a, *b]),
            });
        }

        for [[x0, y0], [x1, y1]] in &self.lines {
            lines.push(StaticLine {
                start: Point2D::new(*x0, *y0),
                end: Point2D::new(*x1, *y1),
                buoy_indices: None,
            });
        }

        Ok(StaticMap {
            buoys,
            lines,
            line_depth: self.line_depth,
            seed_line_length: self.seed_line_length,
            use_naive_rope_priors: self.use_naive_rope_priors,
            update_priors: self.update_priors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_by_buoy_index_first() {
        let section = MapSection {
            buoys: vec![[0.0, 0.0], [10.0, 0.0], [10.0, 10.0]],
            ropes_by_buoy_ind: vec![[0, 1], [1, 2]],
            lines: vec![[[-5.0, -5.0], [-5.0, 5.0]]],
            ..Default::default()
        };
        let map = section.to_static_map().unwrap();

        assert_eq!(map.buoys.len(), 3);
        assert_eq!(map.lines.len(), 3);
        assert_eq!(map.lines[1].buoy_indices, Some([1, 2]));
        assert_eq!(map.lines[1].end, Point2D::new(10.0, 10.0));
        assert_eq!(map.lines[2].buoy_indices, None);
    }

    #[test]
    fn test_bad_buoy_index() {
        let section = MapSection {
            buoys: vec![[0.0, 0.0]],
            ropes_by_buoy_ind: vec![[0, 3]],
            ..Default::default()
        };
        assert!(matches!(
            section.to_static_map(),
            Err(ConfigError::BuoyIndexOutOfRange {
                rope: 0,
                index: 3,
                count: 1
            })
        ));
    }
}
