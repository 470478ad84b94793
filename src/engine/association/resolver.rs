//! Detection to landmark resolution.

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use super::seq_table::{ManualTarget, SeqTable, SwathTable};
use crate::core::math::{along_cross_covariance, line_along_sigma, mahalanobis_squared};
use crate::core::types::{Detection, LandmarkKind, Point2D};
use crate::engine::graph::{LandmarkCandidate, LandmarkGeometry};

/// Runtime association settings.
#[derive(Debug, Clone)]
pub struct AssociationConfig {
    /// Consult the manual tables.
    pub manual: bool,
    /// Buoy sequence-id table.
    pub point_table: SeqTable<ManualTarget>,
    /// Rope sequence-id table.
    pub line_table: SeqTable<ManualTarget>,
    /// Swath line assignments for rope detections.
    pub swaths: Option<SwathTable>,
    /// Euclidean gate (meters).
    pub distance_threshold: Option<f64>,
    /// Mahalanobis gate. Takes precedence over the Euclidean gate.
    pub mahalanobis_threshold: Option<f64>,
    /// Mint a new landmark when nothing qualifies.
    pub open_world: bool,
    /// Isotropic variance for landmarks without a solved covariance.
    pub landmark_cov_fallback: f64,
    /// Along-track spread of a line for Mahalanobis gating (`<= 0` scales
    /// with line length).
    pub line_along_sigma: f64,
    /// Cross-track spread of a line for Mahalanobis gating.
    pub line_cross_sigma: f64,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            manual: false,
            point_table: SeqTable::default(),
            line_table: SeqTable::default(),
            swaths: None,
            distance_threshold: None,
            mahalanobis_threshold: None,
            open_world: true,
            landmark_cov_fallback: 0.001,
            line_along_sigma: 15.0,
            line_cross_sigma: 2.0,
        }
    }
}

/// Inputs to one resolution, taken from the last committed estimate.
#[derive(Debug, Clone, Copy)]
pub struct AssociationContext<'a> {
    /// Detection position in the world frame.
    pub world_position: Point2D,
    /// Position covariance of the observing pose.
    pub position_covariance: Matrix2<f64>,
    /// Landmarks of the detection's kind.
    pub candidates: &'a [LandmarkCandidate],
    /// Identity a newly minted landmark would get.
    pub next_id: u64,
}

/// How a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationMethod {
    /// Line id carried by the detection itself.
    Override,
    /// Line assigned to the detection's swath.
    Swath,
    /// Manual sequence-id table.
    Manual,
    /// External identity hint that passed the gate.
    Hint,
    /// Nearest under the Euclidean gate.
    Euclidean,
    /// Nearest under the Mahalanobis gate.
    Mahalanobis,
    /// Nearest with no gate configured.
    Nearest,
}

/// Why a detection was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// A table mapped it to the `-1` sentinel.
    ManualSentinel,
    /// No landmark passed the gate in a closed world.
    NoCandidate,
}

/// Resolution result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationOutcome {
    /// A landmark already in the map.
    Existing(u64),
    /// A landmark that does not exist yet.
    Created(u64),
    /// Discarded.
    Rejected(RejectReason),
}

/// One decision per detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDecision {
    /// Detection sequence id.
    pub seq_id: u64,
    /// Landmark kind of the detection.
    pub kind: LandmarkKind,
    /// Result.
    pub outcome: AssociationOutcome,
    /// Euclidean distance to the chosen landmark.
    pub distance: Option<f64>,
    /// Mahalanobis distance to the chosen landmark.
    pub mahalanobis: Option<f64>,
    /// Deciding rule.
    pub method: AssociationMethod,
}

impl AssociationDecision {
    /// Resolved landmark id, unless rejected.
    pub fn landmark_id(&self) -> Option<u64> {
        match self.outcome {
            AssociationOutcome::Existing(id) | AssociationOutcome::Created(id) => Some(id),
            AssociationOutcome::Rejected(_) => None,
        }
    }

    /// Whether the detection was discarded.
    pub fn is_rejected(&self) -> bool {
        matches!(self.outcome, AssociationOutcome::Rejected(_))
    }
}

#[derive(Debug, Clone, Copy)]
struct Score {
    euclidean: f64,
    mahalanobis: Option<f64>,
}

/// Resolves detections to landmark identities.
///
/// Precedence: line override, swath line, manual table, identity hint,
/// then automatic gating. Automatic ranking is by gate metric, then
/// Euclidean distance, then lowest id.
#[derive(Debug, Clone)]
pub struct AssociationEngine {
    config: AssociationConfig,
}

impl AssociationEngine {
    /// Create an engine.
    pub fn new(config: AssociationConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &AssociationConfig {
        &self.config
    }

    /// Resolve one detection.
    pub fn resolve(&self, detection: &Detection, ctx: &AssociationContext<'_>) -> AssociationDecision {
        let kind = detection.kind();

        if kind == LandmarkKind::Line {
            if let Some(line_id) = detection.line_override {
                return self.fixed(detection, ctx, ManualTarget::Landmark(line_id), AssociationMethod::Override);
            }
            if let Some(target) = self.config.swaths.as_ref().and_then(|s| s.line_for(detection.seq_id)) {
                return self.fixed(detection, ctx, target, AssociationMethod::Swath);
            }
        }

        if self.config.manual {
            let table = match kind {
                LandmarkKind::Point => &self.config.point_table,
                LandmarkKind::Line => &self.config.line_table,
            };
            if let Some(target) = table.get(detection.seq_id) {
                return self.fixed(detection, ctx, target, AssociationMethod::Manual);
            }
        }

        if let Some(hint) = detection.identity_hint {
            if let Some(candidate) = ctx.candidates.iter().find(|c| c.id == hint) {
                let score = self.score(candidate, ctx);
                if self.passes(&score) {
                    return AssociationDecision {
                        seq_id: detection.seq_id,
                        kind,
                        outcome: AssociationOutcome::Existing(hint),
                        distance: Some(score.euclidean),
                        mahalanobis: score.mahalanobis,
                        method: AssociationMethod::Hint,
                    };
                }
            }
        }

        self.automatic(detection, ctx)
    }

    /// Decision dictated by a table or override.
    fn fixed(
        &self,
        detection: &Detection,
        ctx: &AssociationContext<'_>,
        target: ManualTarget,
        method: AssociationMethod,
    ) -> AssociationDecision {
        let (outcome, score) = match target {
            ManualTarget::Reject => (AssociationOutcome::Rejected(RejectReason::ManualSentinel), None),
            ManualTarget::Landmark(id) => match ctx.candidates.iter().find(|c| c.id == id) {
                Some(candidate) => (AssociationOutcome::Existing(id), Some(self.score(candidate, ctx))),
                None => (AssociationOutcome::Created(id), None),
            },
        };

        AssociationDecision {
            seq_id: detection.seq_id,
            kind: detection.kind(),
            outcome,
            distance: score.map(|s| s.euclidean),
            mahalanobis: score.and_then(|s| s.mahalanobis),
            method,
        }
    }

    fn automatic(&self, detection: &Detection, ctx: &AssociationContext<'_>) -> AssociationDecision {
        let method = if self.config.mahalanobis_threshold.is_some() {
            AssociationMethod::Mahalanobis
        } else if self.config.distance_threshold.is_some() {
            AssociationMethod::Euclidean
        } else {
            AssociationMethod::Nearest
        };

        let best = ctx
            .candidates
            .iter()
            .map(|c| (c, self.score(c, ctx)))
            .filter(|(_, score)| self.passes(score))
            .min_by(|(a, sa), (b, sb)| {
                let metric = |s: &Score| match method {
                    AssociationMethod::Mahalanobis => s.mahalanobis.unwrap_or(f64::INFINITY),
                    _ => s.euclidean,
                };
                metric(sa)
                    .total_cmp(&metric(sb))
                    .then(sa.euclidean.total_cmp(&sb.euclidean))
                    .then(a.id.cmp(&b.id))
            });

        let (outcome, score) = match best {
            Some((candidate, score)) => (AssociationOutcome::Existing(candidate.id), Some(score)),
            None if self.config.open_world => (AssociationOutcome::Created(ctx.next_id), None),
            None => (AssociationOutcome::Rejected(RejectReason::NoCandidate), None),
        };

        AssociationDecision {
            seq_id: detection.seq_id,
            kind: detection.kind(),
            outcome,
            distance: score.map(|s| s.euclidean),
            mahalanobis: score.and_then(|s| s.mahalanobis),
            method,
        }
    }

    fn score(&self, candidate: &LandmarkCandidate, ctx: &AssociationContext<'_>) -> Score {
        let euclidean = candidate.geometry.distance_to(&ctx.world_position);

        let landmark_cov = candidate
            .covariance
            .unwrap_or_else(|| Matrix2::identity() * self.config.landmark_cov_fallback);
        let shape = match candidate.geometry {
            LandmarkGeometry::Point(_) => Matrix2::zeros(),
            LandmarkGeometry::Line { .. } => {
                let cross = self.config.line_cross_sigma;
                let along = line_along_sigma(self.config.line_along_sigma, cross, candidate.geometry.length());
                along_cross_covariance(along, cross, candidate.geometry.angle())
            }
        };
        let cov = landmark_cov + shape + ctx.position_covariance;
        let delta = ctx.world_position.minus(&candidate.geometry.center());

        Score {
            euclidean,
            mahalanobis: mahalanobis_squared(&delta, &cov).map(f64::sqrt),
        }
    }

    fn passes(&self, score: &Score) -> bool {
        if let Some(threshold) = self.config.mahalanobis_threshold {
            return score.mahalanobis.is_some_and(|m| m <= threshold);
        }
        if let Some(threshold) = self.config.distance_threshold {
            return score.euclidean <= threshold;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DetectionTarget, RelativePosition, SensorSource};
    use crate::engine::association::SeqSelector;

    fn buoy(seq_id: u64) -> Detection {
        Detection::new(
            seq_id,
            seq_id * 100,
            SensorSource::Sonar,
            DetectionTarget::Buoy,
            RelativePosition::Offset(Point2D::new(1.0, 0.0)),
        )
    }

    fn rope(seq_id: u64) -> Detection {
        Detection::new(
            seq_id,
            seq_id * 100,
            SensorSource::Sonar,
            DetectionTarget::Rope,
            RelativePosition::Offset(Point2D::new(0.0, 3.0)),
        )
    }

    fn point(id: u64, x: f64, y: f64) -> LandmarkCandidate {
        LandmarkCandidate {
            id,
            geometry: LandmarkGeometry::Point(Point2D::new(x, y)),
            covariance: None,
        }
    }

    fn ctx(at: Point2D, candidates: &[LandmarkCandidate]) -> AssociationContext<'_> {
        AssociationContext {
            world_position: at,
            position_covariance: Matrix2::identity() * 0.01,
            candidates,
            next_id: candidates.len() as u64,
        }
    }

    fn manual_config() -> AssociationConfig {
        let point_table = SeqTable::build(
            "buoy_ids",
            vec![
                (SeqSelector::Range([10, 20]), ManualTarget::Landmark(1)),
                (SeqSelector::Single(25), ManualTarget::Reject),
            ],
        )
        .unwrap();
        AssociationConfig {
            manual: true,
            point_table,
            distance_threshold: Some(1.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_manual_is_deterministic() {
        let engine = AssociationEngine::new(manual_config());
        let candidates = [point(0, 0.0, 0.0), point(1, 50.0, 0.0)];
        let c = ctx(Point2D::new(0.0, 0.0), &candidates);

        for _ in 0..3 {
            let d = engine.resolve(&buoy(15), &c);
            assert_eq!(d.outcome, AssociationOutcome::Existing(1));
            assert_eq!(d.method, AssociationMethod::Manual);
        }
    }

    #[test]
    fn test_manual_sentinel_rejects() {
        let engine = AssociationEngine::new(manual_config());
        let candidates = [point(0, 0.0, 0.0)];
        let d = engine.resolve(&buoy(25), &ctx(Point2D::new(0.0, 0.0), &candidates));
        assert_eq!(d.outcome, AssociationOutcome::Rejected(RejectReason::ManualSentinel));
    }

    #[test]
    fn test_manual_falls_back_to_gating() {
        let engine = AssociationEngine::new(manual_config());
        let candidates = [point(0, 0.0, 0.0)];
        let d = engine.resolve(&buoy(30), &ctx(Point2D::new(0.5, 0.0), &candidates));
        assert_eq!(d.outcome, AssociationOutcome::Existing(0));
        assert_eq!(d.method, AssociationMethod::Euclidean);
    }

    #[test]
    fn test_euclidean_gate_open_and_closed_world() {
        let candidates = [point(0, 0.0, 0.0), point(1, 10.0, 0.0)];
        let far = ctx(Point2D::new(5.0, 5.0), &candidates);

        let open = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(2.0),
            ..Default::default()
        });
        assert_eq!(open.resolve(&buoy(1), &far).outcome, AssociationOutcome::Created(2));

        let closed = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(2.0),
            open_world: false,
            ..Default::default()
        });
        assert_eq!(
            closed.resolve(&buoy(1), &far).outcome,
            AssociationOutcome::Rejected(RejectReason::NoCandidate)
        );

        let near = ctx(Point2D::new(9.0, 0.5), &candidates);
        assert_eq!(closed.resolve(&buoy(1), &near).outcome, AssociationOutcome::Existing(1));
    }

    #[test]
    fn test_ties_break_by_lowest_id() {
        let engine = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(5.0),
            ..Default::default()
        });
        let candidates = [point(3, 2.0, 0.0), point(1, -2.0, 0.0)];
        let d = engine.resolve(&buoy(1), &ctx(Point2D::new(0.0, 0.0), &candidates));
        assert_eq!(d.outcome, AssociationOutcome::Existing(1));
    }

    #[test]
    fn test_mahalanobis_gate_uses_covariance() {
        let engine = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(100.0),
            mahalanobis_threshold: Some(3.0),
            ..Default::default()
        });
        let mut uncertain = point(0, 0.0, 0.0);
        uncertain.covariance = Some(Matrix2::identity() * 4.0);
        let certain = point(1, 2.0, 0.0);
        let candidates = [uncertain, certain];

        // 1.5 m from both: inside the wide landmark's gate, outside the tight one's.
        let d = engine.resolve(&buoy(1), &ctx(Point2D::new(1.0, 1.118), &candidates));
        assert_eq!(d.outcome, AssociationOutcome::Existing(0));
        assert_eq!(d.method, AssociationMethod::Mahalanobis);
        assert!(d.mahalanobis.is_some_and(|m| m < 3.0));
    }

    #[test]
    fn test_hint_must_pass_gate() {
        let engine = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(1.0),
            ..Default::default()
        });
        let candidates = [point(0, 0.0, 0.0), point(1, 20.0, 0.0)];
        let c = ctx(Point2D::new(0.2, 0.0), &candidates);

        let d = engine.resolve(&buoy(1).with_hint(1), &c);
        assert_eq!(d.outcome, AssociationOutcome::Existing(0));
        assert_eq!(d.method, AssociationMethod::Euclidean);

        let d = engine.resolve(&buoy(1).with_hint(0), &c);
        assert_eq!(d.method, AssociationMethod::Hint);
    }

    #[test]
    fn test_line_override_and_swath() {
        let swaths = SwathTable::build(
            &[vec![SeqSelector::Range([0, 9])], vec![SeqSelector::Range([10, 19])]],
            vec![ManualTarget::Landmark(4), ManualTarget::Reject],
        )
        .unwrap();
        let engine = AssociationEngine::new(AssociationConfig {
            swaths: Some(swaths),
            ..Default::default()
        });
        let c = ctx(Point2D::new(0.0, 0.0), &[]);

        assert_eq!(engine.resolve(&rope(3), &c).outcome, AssociationOutcome::Created(4));
        assert_eq!(engine.resolve(&rope(3), &c).method, AssociationMethod::Swath);
        assert_eq!(
            engine.resolve(&rope(12), &c).outcome,
            AssociationOutcome::Rejected(RejectReason::ManualSentinel)
        );
        let d = engine.resolve(&rope(12).with_line_override(7), &c);
        assert_eq!(d.outcome, AssociationOutcome::Created(7));
        assert_eq!(d.method, AssociationMethod::Override);
    }

    #[test]
    fn test_line_gate_uses_segment_distance() {
        let engine = AssociationEngine::new(AssociationConfig {
            distance_threshold: Some(3.0),
            open_world: false,
            ..Default::default()
        });
        let candidates = [LandmarkCandidate {
            id: 0,
            geometry: LandmarkGeometry::Line {
                start: Point2D::new(0.0, 0.0),
                end: Point2D::new(100.0, 0.0),
                depth: 15.0,
            },
            covariance: None,
        }];
        let d = engine.resolve(&rope(1), &ctx(Point2D::new(90.0, 2.0), &candidates));
        assert_eq!(d.outcome, AssociationOutcome::Existing(0));
        assert!((d.distance.unwrap() - 2.0).abs() < 1e-12);
    }
}
