//! Single-threaded estimation session.
//!
//! Owns every component and processes sensor events on one timeline.
//! Detections wait in the reorder buffer until odometry reaches their
//! timestamp. Each odometry tick then runs two updates:
//!
//! ```text
//! tick ──▶ append pose ──▶ update (odometry)            ── estimate r
//!                             │
//!          release detections ≤ tick (buoys first if enabled)
//!                             │
//!          associate against estimate r ──▶ constraints / batches
//!                             │
//!                             ▼
//!                        update (detections)            ── estimate r+1
//! ```

use std::time::Instant;

use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::diagnostics::{
    BuoyAssociationRecord, Diagnostic, PerformanceRecord, UpdateState, Verbosity,
};
use super::reorder::{prioritize_points, ReorderBuffer};
use super::snapshot::{SessionCounters, SessionSnapshot};
use crate::core::types::{Covariance, Detection, LandmarkKind, OdometryTick};
use crate::engine::association::{
    AssociationConfig, AssociationContext, AssociationDecision, AssociationEngine, SwathTable,
};
use crate::engine::batching::{Batch, BatchingConfig, RopeBatcher};
use crate::engine::graph::{
    Constraint, ConstraintFactory, Estimate, EstimatorConfig, EstimatorError, IncrementalEstimator,
    LandmarkEntry, LandmarkRegistry, NoiseSigmas, StaticMap, TrajectoryError, TrajectoryStore,
    VariableKey, VariableValue,
};

/// Runtime configuration of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Noise sigmas (radians, meters).
    pub sigmas: NoiseSigmas,
    /// Association settings.
    pub association: AssociationConfig,
    /// Rope batching policy.
    pub batching: BatchingConfig,
    /// Swath layout for batching.
    pub swaths: Option<SwathTable>,
    /// Static map priors.
    pub static_map: StaticMap,
    /// Solver settings.
    pub estimator: EstimatorConfig,
    /// Reorder buffer capacity.
    pub sss_buffer_len: usize,
    /// Release buoy detections before rope detections in one window.
    pub buoy_priority: bool,
    /// Priority window (microseconds).
    pub priority_window_us: u64,
    /// Keep ground-truth tags on poses.
    pub record_ground_truth: bool,
    /// Commit rope detections.
    pub use_rope_detections: bool,
    /// Diagnostic toggles.
    pub verbosity: Verbosity,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sigmas: NoiseSigmas::default(),
            association: AssociationConfig::default(),
            batching: BatchingConfig::default(),
            swaths: None,
            static_map: StaticMap::default(),
            estimator: EstimatorConfig::default(),
            sss_buffer_len: 10,
            buoy_priority: false,
            priority_window_us: 50_000,
            record_ground_truth: true,
            use_rope_detections: true,
            verbosity: Verbosity::default(),
        }
    }
}

/// Input event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorEvent {
    /// Dead-reckoning step.
    Odometry(OdometryTick),
    /// Extracted detection.
    Detection(Detection),
}

impl SensorEvent {
    /// Event timestamp.
    pub fn timestamp_us(&self) -> u64 {
        match self {
            SensorEvent::Odometry(tick) => tick.timestamp_us,
            SensorEvent::Detection(d) => d.timestamp_us,
        }
    }
}

/// Session failures that are not recoverable by deferral.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Odometry contract violation.
    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),

    /// Estimator contract violation.
    #[error("Estimator error: {0}")]
    Estimator(#[from] EstimatorError),

    /// The worker thread is gone or could not start.
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Constraints and nodes gathered for one estimator update.
#[derive(Default)]
struct Step {
    constraints: Vec<Constraint>,
    nodes: Vec<(VariableKey, VariableValue)>,
    buoys: usize,
    ropes: usize,
    priors: usize,
}

impl Step {
    fn has_node(&self, key: &VariableKey) -> bool {
        self.nodes.iter().any(|(k, _)| k == key)
    }

    fn add_prior(&mut self, prior: Option<Constraint>) {
        if let Some(prior) = prior {
            self.constraints.push(prior);
            self.priors += 1;
        }
    }
}

/// Estimation session: trajectory, map, association, batching, solver.
pub struct SlamSession {
    config: SessionConfig,
    factory: ConstraintFactory,
    trajectory: TrajectoryStore,
    registry: LandmarkRegistry,
    association: AssociationEngine,
    batcher: RopeBatcher,
    estimator: IncrementalEstimator,
    buffer: ReorderBuffer,
    diagnostics: Vec<Diagnostic>,
    performance: Vec<PerformanceRecord>,
    buoy_associations: Vec<BuoyAssociationRecord>,
    counters: SessionCounters,
}

impl SlamSession {
    /// Create a session with an empty trajectory.
    pub fn new(config: SessionConfig) -> Self {
        let factory = ConstraintFactory::new(
            config.sigmas.clone(),
            config.batching.individual_rope_detections,
        );

        log::info!(
            "Session: {} static buoys, {} static lines, buffer {}, manual association {}",
            config.static_map.buoys.len(),
            config.static_map.lines.len(),
            config.sss_buffer_len,
            config.association.manual
        );

        Self {
            trajectory: TrajectoryStore::new(factory.clone(), config.record_ground_truth),
            registry: LandmarkRegistry::new(config.static_map.clone(), factory.clone()),
            association: AssociationEngine::new(config.association.clone()),
            batcher: RopeBatcher::new(config.batching.clone(), config.swaths.clone()),
            estimator: IncrementalEstimator::new(config.estimator.clone()),
            buffer: ReorderBuffer::new(config.sss_buffer_len),
            diagnostics: Vec::new(),
            performance: Vec::new(),
            buoy_associations: Vec::new(),
            counters: SessionCounters::default(),
            factory,
            config,
        }
    }

    /// Process one event.
    pub fn handle(&mut self, event: SensorEvent) -> Result<(), SessionError> {
        match event {
            SensorEvent::Odometry(tick) => self.on_odometry(tick),
            SensorEvent::Detection(detection) => {
                self.on_detection(detection);
                Ok(())
            }
        }
    }

    /// Flush buffered detections and the open rope batch.
    ///
    /// Remaining detections attach to the newest pose at or before them.
    pub fn finish(&mut self) -> Result<(), SessionError> {
        let remaining = self.buffer.drain();
        let mut step = Step::default();
        for detection in self.order(remaining) {
            self.process_detection(detection, &mut step);
        }
        if let Some(batch) = self.batcher.flush() {
            self.reduce_batch(batch, &mut step);
        }
        if !step.constraints.is_empty() || !step.nodes.is_empty() {
            self.commit(step)?;
            self.registry.refresh_line_priors();
        }
        Ok(())
    }

    fn on_detection(&mut self, detection: Detection) {
        self.counters.detections_received += 1;

        let verbose = match detection.kind() {
            LandmarkKind::Point => self.config.verbosity.verbose_graph_buoy_detections,
            LandmarkKind::Line => self.config.verbosity.verbose_graph_rope_detections,
        };
        if verbose {
            log::info!(
                "Detection {} ({:?} via {:?}) at {} us",
                detection.seq_id,
                detection.target,
                detection.sensor,
                detection.timestamp_us
            );
        }

        if let Some(evicted) = self.buffer.push(detection) {
            log::warn!(
                "Reorder buffer full, dropping detection {} at {} us",
                evicted.seq_id,
                evicted.timestamp_us
            );
            self.counters.detections_evicted += 1;
            self.diagnostics.push(Diagnostic::Evicted {
                seq_id: evicted.seq_id,
                timestamp_us: evicted.timestamp_us,
            });
        }
    }

    fn on_odometry(&mut self, tick: OdometryTick) -> Result<(), SessionError> {
        let (node, constraint) =
            self.trajectory
                .append_pose(&tick.delta, tick.timestamp_us, tick.is_ground_truth)?;
        self.counters.odometry_ticks += 1;

        let mut step = Step::default();
        step.nodes.push((VariableKey::Pose(node.id), VariableValue::Pose(node.estimate)));
        if matches!(constraint, Constraint::PosePrior { .. }) {
            step.priors += 1;
        }
        step.constraints.push(constraint);
        self.commit(step)?;

        let released = self.buffer.release(tick.timestamp_us);
        let mut step = Step::default();
        for detection in self.order(released) {
            self.process_detection(detection, &mut step);
        }
        if let Some(batch) = self.batcher.poll(tick.timestamp_us) {
            self.reduce_batch(batch, &mut step);
        }

        if !step.constraints.is_empty() || !step.nodes.is_empty() {
            self.commit(step)?;
            self.registry.refresh_line_priors();
        }
        Ok(())
    }

    fn order(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if self.config.buoy_priority {
            prioritize_points(detections, self.config.priority_window_us)
        } else {
            detections
        }
    }

    /// Associate one released detection and stage what it produces.
    fn process_detection(&mut self, detection: Detection, step: &mut Step) {
        let Some(pose) = self.trajectory.pose_at_or_before(detection.timestamp_us).cloned() else {
            log::debug!(
                "Detection {} at {} us predates the trajectory",
                detection.seq_id,
                detection.timestamp_us
            );
            self.counters.detections_stale += 1;
            self.diagnostics.push(Diagnostic::Stale {
                seq_id: detection.seq_id,
                timestamp_us: detection.timestamp_us,
            });
            return;
        };

        let kind = detection.kind();
        let world = pose.estimate.transform_point(&detection.relative.offset());
        let position_covariance = pose
            .covariance
            .as_ref()
            .map(Covariance::position_block)
            .unwrap_or_else(Matrix2::zeros);
        let candidates = self.registry.candidates(kind);
        let ctx = AssociationContext {
            world_position: world,
            position_covariance,
            candidates: &candidates,
            next_id: self.registry.next_id(kind),
        };

        let decision = self.association.resolve(&detection, &ctx);
        if kind == LandmarkKind::Point {
            self.buoy_associations.push(BuoyAssociationRecord::from(&decision));
        }
        self.record_association(&decision);

        let Some(id) = decision.landmark_id() else {
            self.counters.detections_rejected += 1;
            return;
        };

        match kind {
            LandmarkKind::Point => {
                let entry = self.registry.get_or_create_point(id, world);
                self.introduce(entry, step);
                self.ensure_pose(pose.id, step);
                step.constraints
                    .push(self.factory.point_landmark(pose.id, id, &detection.relative));
                step.buoys += 1;
            }
            LandmarkKind::Line => {
                if !self.config.use_rope_detections {
                    return;
                }
                let entry = self.registry.get_or_create_line(id, world, pose.estimate.theta);
                self.introduce(entry, step);
                for batch in self.batcher.offer(detection, id, pose.id) {
                    self.reduce_batch(batch, step);
                }
            }
        }
    }

    fn record_association(&mut self, decision: &AssociationDecision) {
        let verbose = match decision.kind {
            LandmarkKind::Point => self.config.verbosity.verbose_graph_buoy_associations,
            LandmarkKind::Line => self.config.verbosity.verbose_graph_rope_associations,
        };
        if !verbose {
            return;
        }
        log::info!(
            "Association {} -> {:?} via {:?} (d={:?}, m={:?})",
            decision.seq_id,
            decision.outcome,
            decision.method,
            decision.distance,
            decision.mahalanobis
        );
        self.diagnostics.push(Diagnostic::Association {
            decision: decision.clone(),
        });
    }

    /// Stage a landmark's initial value and prior if the graph lacks it.
    fn introduce(&self, entry: LandmarkEntry, step: &mut Step) {
        let key = entry.node.key();
        if self.estimator.is_known(&key) || step.has_node(&key) {
            return;
        }
        step.nodes.push((key, entry.node.geometry.to_value()));
        if entry.created {
            step.add_prior(entry.prior);
        } else {
            // Its earlier constraints were dropped; start over.
            step.add_prior(self.registry.prior_for(entry.node.id, entry.node.kind()));
        }
    }

    fn ensure_landmark(&self, id: u64, kind: LandmarkKind, step: &mut Step) {
        let key = VariableKey::landmark(kind, id);
        if self.estimator.is_known(&key) || step.has_node(&key) {
            return;
        }
        if let Some(value) = self.registry.initial_value(&key) {
            step.nodes.push((key, value));
            step.add_prior(self.registry.prior_for(id, kind));
        }
    }

    fn ensure_pose(&self, id: u64, step: &mut Step) {
        let key = VariableKey::Pose(id);
        if self.estimator.is_known(&key) || step.has_node(&key) {
            return;
        }
        if let Some(pose) = self.trajectory.estimate_of(id) {
            step.nodes.push((key, VariableValue::Pose(pose)));
        }
    }

    fn reduce_batch(&mut self, batch: Batch, step: &mut Step) {
        let length = self
            .registry
            .current_estimate(batch.line_id, LandmarkKind::Line)
            .map(|g| g.length())
            .unwrap_or(self.config.static_map.seed_line_length);

        self.ensure_landmark(batch.line_id, LandmarkKind::Line, step);
        for member in &batch.members {
            self.ensure_pose(member.pose_id, step);
        }

        let constraints = self.factory.reduce_batch(&batch, &self.trajectory, length);
        self.counters.batches_flushed += 1;

        if self.config.verbosity.verbose_graph_rope_batching {
            log::info!(
                "Rope batch for line {}: {} detections -> {} constraints ({:?})",
                batch.line_id,
                batch.len(),
                constraints.len(),
                batch.reason
            );
            self.diagnostics.push(Diagnostic::BatchFlushed {
                line_id: batch.line_id,
                members: batch.len(),
                reason: batch.reason,
                constraints: constraints.len(),
            });
        }

        if constraints.is_empty() && !batch.is_empty() {
            log::warn!(
                "Rope batch for line {} discarded ({} detections)",
                batch.line_id,
                batch.len()
            );
            self.diagnostics.push(Diagnostic::BatchDiscarded {
                line_id: batch.line_id,
                members: batch.len(),
            });
        }

        step.ropes += constraints.len();
        step.constraints.extend(constraints);
    }

    /// Run one estimator update and write the result back.
    fn commit(&mut self, step: Step) -> Result<(), SessionError> {
        let pose_id = self.trajectory.latest().map_or(0, |n| n.id);
        let state = UpdateState::from_counts(step.buoys, step.ropes);
        let priors = step.priors;
        let start = Instant::now();

        let report = match self.estimator.update(step.constraints, step.nodes) {
            Ok(report) => report,
            Err(EstimatorError::IllConditioned { reason }) => {
                log::warn!("Update at pose {} rejected: {}", pose_id, reason);
                self.counters.updates_rejected += 1;
                self.diagnostics.push(Diagnostic::IllConditioned { reason });
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let estimate = self.estimator.estimate();
        self.trajectory.apply_estimate(estimate, &report.updated);
        self.registry.apply_estimate(estimate, &report.updated);

        self.counters.constraints_committed += report.committed as u64;
        self.counters.groups_dropped += report.dropped.len() as u64;

        for (landmark, attempts) in &report.deferred {
            log::debug!("Deferred {} (attempt {})", landmark, attempts);
            self.diagnostics.push(Diagnostic::Deferred {
                landmark: *landmark,
                attempts: *attempts,
            });
        }
        for landmark in &report.dropped {
            self.diagnostics.push(Diagnostic::Dropped {
                landmark: *landmark,
            });
        }

        if let Some(result) = &report.optimization {
            if self.config.verbosity.verbose_graph_update {
                log::info!(
                    "Update at pose {}: {} constraints, {} variables, {} iterations, error {:.4e} -> {:.4e}",
                    pose_id,
                    report.committed,
                    report.updated.len(),
                    result.iterations,
                    result.initial_error,
                    result.final_error
                );
                self.diagnostics.push(Diagnostic::Update {
                    pose_id,
                    committed: report.committed,
                    updated: report.updated.len(),
                    iterations: result.iterations,
                    final_error: result.final_error,
                });
            }

            self.performance.push(PerformanceRecord {
                pose_id,
                state,
                wall_time_us: start.elapsed().as_micros() as u64,
                factors: report.factors,
                constraints: report.committed,
                priors,
                revision: report.revision,
            });
        }
        Ok(())
    }

    /// Current estimate snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        let estimate = self.estimator.estimate();
        SessionSnapshot {
            revision: estimate.revision(),
            trajectory: self.trajectory.nodes().to_vec(),
            points: self
                .registry
                .points()
                .filter(|n| estimate.contains(&n.key()))
                .cloned()
                .collect(),
            lines: self
                .registry
                .lines()
                .filter(|n| estimate.contains(&n.key()))
                .cloned()
                .collect(),
            counters: self.counters.clone(),
        }
    }

    /// Take the diagnostics recorded since the last call.
    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Per-update timing records.
    pub fn performance(&self) -> &[PerformanceRecord] {
        &self.performance
    }

    /// Buoy association audit trail.
    pub fn buoy_associations(&self) -> &[BuoyAssociationRecord] {
        &self.buoy_associations
    }

    /// Running totals.
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Committed estimate.
    pub fn estimate(&self) -> &Estimate {
        self.estimator.estimate()
    }

    /// Trajectory store.
    pub fn trajectory(&self) -> &TrajectoryStore {
        &self.trajectory
    }

    /// Landmark registry.
    pub fn registry(&self) -> &LandmarkRegistry {
        &self.registry
    }

    /// Detections waiting in the reorder buffer.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}
