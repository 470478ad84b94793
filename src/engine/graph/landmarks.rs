//! Landmark registry.
//!
//! Owns every buoy (point) and rope/pipeline (line) landmark. Points and
//! lines live in separate id spaces. Static map priors reserve the low ids
//! of each space: buoy `i` is point `i`, configured rope `j` is line `j`.
//! Landmarks are created on first association and never removed.

use std::collections::BTreeMap;

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use super::constraint::Constraint;
use super::estimator::Estimate;
use super::factory::ConstraintFactory;
use super::variables::{VariableKey, VariableValue};
use crate::core::math::point_segment_distance;
use crate::core::types::{Covariance, LandmarkKind, Point2D};

/// A line known before the survey.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticLine {
    /// First endpoint.
    pub start: Point2D,
    /// Second endpoint.
    pub end: Point2D,
    /// Buoys the line is strung between, if defined that way.
    pub buoy_indices: Option<[usize; 2]>,
}

/// Static map priors plus line seeding options.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMap {
    /// Known buoy positions.
    pub buoys: Vec<Point2D>,
    /// Known lines.
    pub lines: Vec<StaticLine>,
    /// Fixed depth of line landmarks.
    pub line_depth: f64,
    /// Length of a line seeded from a single detection.
    pub seed_line_length: f64,
    /// Give detection-seeded lines a weak endpoint prior.
    pub use_naive_rope_priors: bool,
    /// Re-derive buoy-index line priors from buoy estimates.
    pub update_priors: bool,
}

impl Default for StaticMap {
    fn default() -> Self {
        Self {
            buoys: Vec::new(),
            lines: Vec::new(),
            line_depth: 15.0,
            seed_line_length: 10.0,
            use_naive_rope_priors: true,
            update_priors: false,
        }
    }
}

/// Landmark geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkGeometry {
    /// Buoy position.
    Point(Point2D),
    /// Rope or pipeline segment.
    Line {
        /// First endpoint
        start: Point2D,
        /// Second endpoint
        end: Point2D,
        /// Fixed depth (meters)
        depth: f64,
    },
}

impl LandmarkGeometry {
    /// Landmark kind.
    pub fn kind(&self) -> LandmarkKind {
        match self {
            LandmarkGeometry::Point(_) => LandmarkKind::Point,
            LandmarkGeometry::Line { .. } => LandmarkKind::Line,
        }
    }

    /// Point position or line midpoint.
    pub fn center(&self) -> Point2D {
        match self {
            LandmarkGeometry::Point(p) => *p,
            LandmarkGeometry::Line { start, end, .. } => start.midpoint(end),
        }
    }

    /// Line length (zero for points).
    pub fn length(&self) -> f64 {
        match self {
            LandmarkGeometry::Point(_) => 0.0,
            LandmarkGeometry::Line { start, end, .. } => start.distance(end),
        }
    }

    /// Line direction in radians (zero for points).
    pub fn angle(&self) -> f64 {
        match self {
            LandmarkGeometry::Point(_) => 0.0,
            LandmarkGeometry::Line { start, end, .. } => (end.y - start.y).atan2(end.x - start.x),
        }
    }

    /// Euclidean distance from `p`; point-to-segment for lines.
    pub fn distance_to(&self, p: &Point2D) -> f64 {
        match self {
            LandmarkGeometry::Point(q) => p.distance(q),
            LandmarkGeometry::Line { start, end, .. } => point_segment_distance(p, start, end),
        }
    }

    /// Graph variable value.
    pub fn to_value(&self) -> VariableValue {
        match *self {
            LandmarkGeometry::Point(p) => VariableValue::Point(p),
            LandmarkGeometry::Line { start, end, .. } => VariableValue::Line { start, end },
        }
    }
}

/// How a landmark was first placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkOrigin {
    /// From the static map.
    StaticPrior,
    /// Seeded from its first detection.
    Detection,
}

/// A landmark in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkNode {
    /// Id within its kind's id space.
    pub id: u64,
    /// Current geometry estimate.
    pub geometry: LandmarkGeometry,
    /// Marginal covariance once solved.
    pub covariance: Option<Covariance>,
    /// How it was first placed.
    pub origin: LandmarkOrigin,
}

impl LandmarkNode {
    /// Landmark kind.
    #[inline]
    pub fn kind(&self) -> LandmarkKind {
        self.geometry.kind()
    }

    /// Graph variable key.
    #[inline]
    pub fn key(&self) -> VariableKey {
        VariableKey::landmark(self.kind(), self.id)
    }
}

/// Result of a get-or-create call.
#[derive(Debug, Clone)]
pub struct LandmarkEntry {
    /// The landmark.
    pub node: LandmarkNode,
    /// Whether this call created it.
    pub created: bool,
    /// Prior constraint to add alongside the first measurement.
    pub prior: Option<Constraint>,
}

/// An association candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkCandidate {
    /// Landmark id.
    pub id: u64,
    /// Current geometry.
    pub geometry: LandmarkGeometry,
    /// Position (or line centre) covariance, if solved.
    pub covariance: Option<Matrix2<f64>>,
}

/// Owner of all landmarks.
#[derive(Debug, Clone)]
pub struct LandmarkRegistry {
    points: BTreeMap<u64, LandmarkNode>,
    lines: BTreeMap<u64, LandmarkNode>,
    static_map: StaticMap,
    factory: ConstraintFactory,
    next_point: u64,
    next_line: u64,
}

impl LandmarkRegistry {
    /// Create a registry over a static map.
    pub fn new(static_map: StaticMap, factory: ConstraintFactory) -> Self {
        Self {
            points: BTreeMap::new(),
            lines: BTreeMap::new(),
            next_point: static_map.buoys.len() as u64,
            next_line: static_map.lines.len() as u64,
            static_map,
            factory,
        }
    }

    /// Static map in use.
    pub fn static_map(&self) -> &StaticMap {
        &self.static_map
    }

    /// Id the next minted landmark of `kind` will receive.
    pub fn next_id(&self, kind: LandmarkKind) -> u64 {
        match kind {
            LandmarkKind::Point => self.next_point,
            LandmarkKind::Line => self.next_line,
        }
    }

    /// Get a buoy, creating it at its static prior or at `seed`.
    pub fn get_or_create_point(&mut self, id: u64, seed: Point2D) -> LandmarkEntry {
        if let Some(node) = self.points.get(&id) {
            return LandmarkEntry {
                node: node.clone(),
                created: false,
                prior: None,
            };
        }

        let known = usize::try_from(id)
            .ok()
            .and_then(|i| self.static_map.buoys.get(i))
            .copied();

        let (position, origin) = match known {
            Some(p) => (p, LandmarkOrigin::StaticPrior),
            None => (seed, LandmarkOrigin::Detection),
        };

        let node = LandmarkNode {
            id,
            geometry: LandmarkGeometry::Point(position),
            covariance: None,
            origin,
        };
        self.points.insert(id, node.clone());
        self.next_point = self.next_point.max(id + 1);

        LandmarkEntry {
            node,
            created: true,
            prior: self.prior_for(id, LandmarkKind::Point),
        }
    }

    /// Get a line, creating it at its static prior or around `seed`.
    ///
    /// A seeded line is centred on the detection and oriented along
    /// `heading`, with the configured seed length.
    pub fn get_or_create_line(&mut self, id: u64, seed: Point2D, heading: f64) -> LandmarkEntry {
        if let Some(node) = self.lines.get(&id) {
            return LandmarkEntry {
                node: node.clone(),
                created: false,
                prior: None,
            };
        }

        let known = usize::try_from(id)
            .ok()
            .and_then(|i| self.static_map.lines.get(i))
            .map(|l| (l.start, l.end));

        let (start, end, origin) = match known {
            Some((start, end)) => (start, end, LandmarkOrigin::StaticPrior),
            None => {
                let half = 0.5 * self.static_map.seed_line_length;
                let (s, c) = heading.sin_cos();
                let start = Point2D::new(seed.x - half * c, seed.y - half * s);
                let end = Point2D::new(seed.x + half * c, seed.y + half * s);
                (start, end, LandmarkOrigin::Detection)
            }
        };

        let node = LandmarkNode {
            id,
            geometry: LandmarkGeometry::Line {
                start,
                end,
                depth: self.static_map.line_depth,
            },
            covariance: None,
            origin,
        };
        self.lines.insert(id, node.clone());
        self.next_line = self.next_line.max(id + 1);

        LandmarkEntry {
            node,
            created: true,
            prior: self.prior_for(id, LandmarkKind::Line),
        }
    }

    /// Prior a landmark enters the graph with.
    ///
    /// Static landmarks get their surveyed prior. Detection-seeded lines get
    /// a naive endpoint prior at their current geometry when enabled.
    pub fn prior_for(&self, id: u64, kind: LandmarkKind) -> Option<Constraint> {
        let index = usize::try_from(id).ok();
        match kind {
            LandmarkKind::Point => index
                .and_then(|i| self.static_map.buoys.get(i))
                .map(|p| self.factory.point_prior(id, *p)),
            LandmarkKind::Line => {
                if let Some(line) = index.and_then(|i| self.static_map.lines.get(i)) {
                    return Some(self.factory.line_prior(id, line.start, line.end));
                }
                if !self.static_map.use_naive_rope_priors {
                    return None;
                }
                match self.lines.get(&id)?.geometry {
                    LandmarkGeometry::Line { start, end, .. } => Some(self.factory.line_prior(id, start, end)),
                    LandmarkGeometry::Point(_) => None,
                }
            }
        }
    }

    /// Landmark by id.
    pub fn lookup(&self, id: u64, kind: LandmarkKind) -> Option<&LandmarkNode> {
        match kind {
            LandmarkKind::Point => self.points.get(&id),
            LandmarkKind::Line => self.lines.get(&id),
        }
    }

    /// Current geometry of a landmark, falling back to its static prior
    /// when it has not been created yet.
    pub fn current_estimate(&self, id: u64, kind: LandmarkKind) -> Option<LandmarkGeometry> {
        if let Some(node) = self.lookup(id, kind) {
            return Some(node.geometry);
        }
        let index = usize::try_from(id).ok()?;
        match kind {
            LandmarkKind::Point => self.static_map.buoys.get(index).map(|p| LandmarkGeometry::Point(*p)),
            LandmarkKind::Line => self.static_map.lines.get(index).map(|l| LandmarkGeometry::Line {
                start: l.start,
                end: l.end,
                depth: self.static_map.line_depth,
            }),
        }
    }

    /// Association candidates of `kind`, ordered by id.
    ///
    /// Includes static landmarks that have not been observed yet.
    pub fn candidates(&self, kind: LandmarkKind) -> Vec<LandmarkCandidate> {
        let static_count = match kind {
            LandmarkKind::Point => self.static_map.buoys.len(),
            LandmarkKind::Line => self.static_map.lines.len(),
        } as u64;
        let nodes = match kind {
            LandmarkKind::Point => &self.points,
            LandmarkKind::Line => &self.lines,
        };

        let mut ids: Vec<u64> = (0..static_count).collect();
        ids.extend(nodes.keys().filter(|id| **id >= static_count));

        ids.into_iter()
            .filter_map(|id| {
                let geometry = self.current_estimate(id, kind)?;
                let covariance = nodes
                    .get(&id)
                    .and_then(|n| n.covariance.as_ref())
                    .map(|c| center_covariance(kind, c));
                Some(LandmarkCandidate {
                    id,
                    geometry,
                    covariance,
                })
            })
            .collect()
    }

    /// Initial value for a landmark variable.
    pub fn initial_value(&self, key: &VariableKey) -> Option<VariableValue> {
        let (id, kind) = match *key {
            VariableKey::Point(id) => (id, LandmarkKind::Point),
            VariableKey::Line(id) => (id, LandmarkKind::Line),
            VariableKey::Pose(_) => return None,
        };
        self.lookup(id, kind).map(|n| n.geometry.to_value())
    }

    /// Write back solved landmarks.
    pub fn apply_estimate(&mut self, estimate: &Estimate, updated: &[VariableKey]) {
        for key in updated {
            let node = match *key {
                VariableKey::Point(id) => self.points.get_mut(&id),
                VariableKey::Line(id) => self.lines.get_mut(&id),
                VariableKey::Pose(_) => None,
            };
            let Some(node) = node else {
                continue;
            };
            match (estimate.value(key), &mut node.geometry) {
                (Some(VariableValue::Point(p)), LandmarkGeometry::Point(g)) => *g = p,
                (Some(VariableValue::Line { start, end }), LandmarkGeometry::Line { start: s, end: e, .. }) => {
                    *s = start;
                    *e = end;
                }
                _ => continue,
            }
            node.covariance = estimate.covariance(key).cloned();
        }
    }

    /// Move buoy-index line priors to the current buoy estimates.
    ///
    /// Only lines not yet in the graph change; committed priors are
    /// immutable. Returns the number of lines refreshed.
    pub fn refresh_line_priors(&mut self) -> usize {
        if !self.static_map.update_priors {
            return 0;
        }

        let mut refreshed = 0;
        for (index, line) in self.static_map.lines.iter_mut().enumerate() {
            let Some([a, b]) = line.buoy_indices else {
                continue;
            };
            if self.lines.contains_key(&(index as u64)) {
                continue;
            }
            let (Some(pa), Some(pb)) = (self.points.get(&(a as u64)), self.points.get(&(b as u64))) else {
                continue;
            };
            let start = pa.geometry.center();
            let end = pb.geometry.center();
            if start != line.start || end != line.end {
                line.start = start;
                line.end = end;
                refreshed += 1;
            }
        }
        refreshed
    }

    /// All point landmarks by id.
    pub fn points(&self) -> impl Iterator<Item = &LandmarkNode> {
        self.points.values()
    }

    /// All line landmarks by id.
    pub fn lines(&self) -> impl Iterator<Item = &LandmarkNode> {
        self.lines.values()
    }

    /// Number of created landmarks.
    pub fn len(&self) -> usize {
        self.points.len() + self.lines.len()
    }

    /// Whether no landmark has been created.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() && self.lines.is_empty()
    }
}

/// Covariance of a point, or of a line's midpoint from its 4x4 endpoint
/// covariance: `¼ (Σss + Σse + Σes + Σee)`.
fn center_covariance(kind: LandmarkKind, cov: &Covariance) -> Matrix2<f64> {
    match kind {
        LandmarkKind::Point => cov.position_block(),
        LandmarkKind::Line if cov.dim() == 4 => {
            let block = |r: usize, c: usize| {
                0.25 * (cov.get(r, c) + cov.get(r, c + 2) + cov.get(r + 2, c) + cov.get(r + 2, c + 2))
            };
            Matrix2::new(block(0, 0), block(0, 1), block(1, 0), block(1, 1))
        }
        LandmarkKind::Line => cov.position_block(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::NoiseSigmas;
    use approx::assert_relative_eq;

    fn registry(map: StaticMap) -> LandmarkRegistry {
        LandmarkRegistry::new(map, ConstraintFactory::new(NoiseSigmas::default(), true))
    }

    fn surveyed_map() -> StaticMap {
        StaticMap {
            buoys: vec![Point2D::new(0.0, 0.0), Point2D::new(20.0, 0.0)],
            lines: vec![StaticLine {
                start: Point2D::new(0.0, 0.0),
                end: Point2D::new(20.0, 0.0),
                buoy_indices: Some([0, 1]),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_static_point_uses_prior() {
        let mut r = registry(surveyed_map());
        let entry = r.get_or_create_point(1, Point2D::new(19.0, 1.0));

        assert!(entry.created);
        assert_eq!(entry.node.geometry, LandmarkGeometry::Point(Point2D::new(20.0, 0.0)));
        assert!(matches!(entry.prior, Some(Constraint::PointPrior { landmark: 1, .. })));

        let again = r.get_or_create_point(1, Point2D::new(0.0, 0.0));
        assert!(!again.created);
        assert!(again.prior.is_none());
    }

    #[test]
    fn test_new_point_seeded_without_prior() {
        let mut r = registry(surveyed_map());
        assert_eq!(r.next_id(LandmarkKind::Point), 2);

        let entry = r.get_or_create_point(2, Point2D::new(5.0, 5.0));
        assert_eq!(entry.node.origin, LandmarkOrigin::Detection);
        assert!(entry.prior.is_none());
        assert_eq!(r.next_id(LandmarkKind::Point), 3);
    }

    #[test]
    fn test_seeded_line_along_heading() {
        let mut r = registry(StaticMap::default());
        let entry = r.get_or_create_line(0, Point2D::new(5.0, 5.0), 0.0);

        let geometry = entry.node.geometry;
        assert_relative_eq!(geometry.length(), 10.0, epsilon = 1e-12);
        assert_relative_eq!(geometry.center().x, 5.0, epsilon = 1e-12);
        assert!(matches!(entry.prior, Some(Constraint::LinePrior { line: 0, .. })));
    }

    #[test]
    fn test_naive_prior_can_be_disabled() {
        let mut r = registry(StaticMap {
            use_naive_rope_priors: false,
            ..Default::default()
        });
        let entry = r.get_or_create_line(0, Point2D::new(5.0, 5.0), 0.0);
        assert!(entry.prior.is_none());
    }

    #[test]
    fn test_candidates_include_unobserved_static() {
        let mut r = registry(surveyed_map());
        r.get_or_create_point(4, Point2D::new(50.0, 0.0));

        let ids: Vec<u64> = r.candidates(LandmarkKind::Point).iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1, 4]);
        assert_eq!(r.candidates(LandmarkKind::Line).len(), 1);
    }

    #[test]
    fn test_lookup_and_current_estimate() {
        let r = registry(surveyed_map());
        assert!(r.lookup(0, LandmarkKind::Point).is_none());
        assert_eq!(
            r.current_estimate(0, LandmarkKind::Point),
            Some(LandmarkGeometry::Point(Point2D::new(0.0, 0.0)))
        );
        assert!(r.current_estimate(7, LandmarkKind::Point).is_none());
    }

    #[test]
    fn test_refresh_line_priors_follows_buoys() {
        let mut map = surveyed_map();
        map.update_priors = true;
        let mut r = registry(map);

        r.get_or_create_point(0, Point2D::default());
        r.get_or_create_point(1, Point2D::default());
        if let Some(node) = r.points.get_mut(&1) {
            node.geometry = LandmarkGeometry::Point(Point2D::new(21.0, 1.0));
        }

        assert_eq!(r.refresh_line_priors(), 1);
        assert_eq!(r.static_map().lines[0].end, Point2D::new(21.0, 1.0));
        assert_eq!(r.refresh_line_priors(), 0);
    }

    #[test]
    fn test_center_covariance_of_line() {
        let cov = Covariance::diagonal(&[1.0, 1.0, 1.0, 1.0]);
        let c = center_covariance(LandmarkKind::Line, &cov);
        assert_relative_eq!(c[(0, 0)], 0.5);
        assert_relative_eq!(c[(0, 1)], 0.0);
    }
}
