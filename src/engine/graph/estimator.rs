//! Incremental estimator.
//!
//! Owns the committed factor graph and its current estimate. Each
//! [`IncrementalEstimator::update`] call adds constraints (and initial values
//! for new variables), re-solves a local window around them and commits the
//! result atomically.
//!
//! ```text
//!   new constraints ──┬── no landmark ───────────▶ core
//!                     └── grouped by landmark ───▶ groups (+ pending)
//!
//!   solve(core + groups) ── ok ──▶ commit all
//!          │ fail
//!          ▼
//!   solve(core) ── fail ──▶ Err(IllConditioned), nothing changes
//!          │ ok
//!          ▼
//!   for each group: solve(accepted + group) ── ok ──▶ accept
//!                                           └─ fail ─▶ defer / drop
//! ```
//!
//! By default (`max_active_hops = 0`) every variable connected to a new
//! constraint is re-solved, so the committed estimate is the joint
//! maximum-likelihood solution over all committed constraints. A positive
//! `max_active_hops` limits the window to graph neighbours that many hops
//! away; variables beyond it are held fixed and the new marginals are
//! conditioned on that frontier.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constraint::Constraint;
use super::linear::{LocalProblem, OptimizationResult, SolveError, TerminationReason};
use super::variables::{Values, VariableKey, VariableValue};
use crate::config::defaults;
use crate::config::ConfigError;
use crate::core::types::{Covariance, Point2D, Pose2D};

/// Estimator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Maximum solver iterations per solve.
    #[serde(default = "defaults::max_iterations")]
    pub max_iterations: u32,

    /// Relative error change that counts as converged.
    #[serde(default = "defaults::convergence_threshold")]
    pub convergence_threshold: f64,

    /// Initial Levenberg-Marquardt damping.
    #[serde(default = "defaults::damping_factor")]
    pub damping_factor: f64,

    /// Use Levenberg-Marquardt (vs pure Gauss-Newton).
    #[serde(default = "defaults::enabled")]
    pub use_levenberg_marquardt: bool,

    /// Graph hops around new constraints that are re-solved (0 = whole
    /// connected region, exact).
    #[serde(default = "defaults::max_active_hops")]
    pub max_active_hops: usize,

    /// Smallest acceptable pivot of the scaled information matrix.
    #[serde(default = "defaults::conditioning_epsilon")]
    pub conditioning_epsilon: f64,

    /// Failed attempts before a pending landmark group is dropped.
    #[serde(default = "defaults::max_pending_retries")]
    pub max_pending_retries: u32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_iterations: defaults::max_iterations(),
            convergence_threshold: defaults::convergence_threshold(),
            damping_factor: defaults::damping_factor(),
            use_levenberg_marquardt: defaults::enabled(),
            max_active_hops: defaults::max_active_hops(),
            conditioning_epsilon: defaults::conditioning_epsilon(),
            max_pending_retries: defaults::max_pending_retries(),
        }
    }
}

impl EstimatorConfig {
    /// Reject values the solver cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(invalid("estimator.max_iterations", "must be at least 1"));
        }
        if !(self.convergence_threshold > 0.0) {
            return Err(invalid("estimator.convergence_threshold", "must be positive"));
        }
        if !(self.damping_factor >= 0.0) || !self.damping_factor.is_finite() {
            return Err(invalid("estimator.damping_factor", "must be finite and non-negative"));
        }
        if !(self.conditioning_epsilon > 0.0 && self.conditioning_epsilon < 1.0) {
            return Err(invalid("estimator.conditioning_epsilon", "must be in (0, 1)"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// Committed estimate: values and marginal covariances.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Estimate {
    values: Values,
    covariances: BTreeMap<VariableKey, Covariance>,
    revision: u64,
}

impl Estimate {
    /// Value of a variable.
    #[inline]
    pub fn value(&self, key: &VariableKey) -> Option<VariableValue> {
        self.values.get(key).copied()
    }

    /// Pose estimate.
    pub fn pose(&self, id: u64) -> Option<Pose2D> {
        self.value(&VariableKey::Pose(id))?.as_pose()
    }

    /// Buoy estimate.
    pub fn point(&self, id: u64) -> Option<Point2D> {
        self.value(&VariableKey::Point(id))?.as_point()
    }

    /// Line endpoints estimate.
    pub fn line(&self, id: u64) -> Option<(Point2D, Point2D)> {
        self.value(&VariableKey::Line(id))?.as_line()
    }

    /// Marginal covariance of a variable.
    #[inline]
    pub fn covariance(&self, key: &VariableKey) -> Option<&Covariance> {
        self.covariances.get(key)
    }

    /// Whether a variable is in the graph.
    #[inline]
    pub fn contains(&self, key: &VariableKey) -> bool {
        self.values.contains_key(key)
    }

    /// All values.
    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of commits so far.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Estimator failures. The estimate is unchanged when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimatorError {
    /// A constraint references a variable with no value.
    #[error("unknown variable {0}")]
    UnknownVariable(VariableKey),

    /// An initial value is NaN or infinite.
    #[error("non-finite initial value for {0}")]
    NonFiniteValue(VariableKey),

    /// The landmark-free part of the update cannot be solved.
    #[error("ill-conditioned update: {reason}")]
    IllConditioned {
        /// Solver diagnosis
        reason: String,
    },
}

/// Outcome of one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Constraints committed.
    pub committed: usize,

    /// Constraints ignored because the whole update repeated the previous one.
    pub duplicates: usize,

    /// Landmark groups held back, with their failed attempt count.
    pub deferred: Vec<(VariableKey, u32)>,

    /// Landmark groups abandoned after too many failures.
    pub dropped: Vec<VariableKey>,

    /// Variables re-solved.
    pub updated: Vec<VariableKey>,

    /// Factors in the final solve.
    pub factors: usize,

    /// Final solve statistics, if anything was committed.
    pub optimization: Option<OptimizationResult>,

    /// Estimate revision after the update.
    pub revision: u64,
}

/// Constraints on one landmark waiting to become solvable.
#[derive(Debug, Clone)]
struct PendingGroup {
    landmark: VariableKey,
    constraints: Vec<Constraint>,
    attempts: u32,
}

/// Values and marginals of one successful local solve.
struct Solution {
    values: Values,
    covariances: BTreeMap<VariableKey, Covariance>,
    result: OptimizationResult,
    factors: usize,
}

impl Solution {
    fn empty() -> Self {
        Self {
            values: Values::new(),
            covariances: BTreeMap::new(),
            result: OptimizationResult {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
                converged: true,
                termination_reason: TerminationReason::NoEdges,
            },
            factors: 0,
        }
    }
}

/// Incremental factor-graph estimator.
#[derive(Debug, Clone)]
pub struct IncrementalEstimator {
    config: EstimatorConfig,
    constraints: Vec<Constraint>,
    adjacency: HashMap<VariableKey, Vec<usize>>,
    staged: Values,
    pending: Vec<PendingGroup>,
    estimate: Estimate,
    last_submission: Vec<Constraint>,
}

impl IncrementalEstimator {
    /// Create an empty estimator.
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            constraints: Vec::new(),
            adjacency: HashMap::new(),
            staged: Values::new(),
            pending: Vec::new(),
            estimate: Estimate::default(),
            last_submission: Vec::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Current committed estimate.
    #[inline]
    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    /// Whether a variable has a value (committed or staged).
    #[inline]
    pub fn is_known(&self, key: &VariableKey) -> bool {
        self.estimate.contains(key) || self.staged.contains_key(key)
    }

    /// Committed constraints in commit order.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Number of landmark groups waiting for more information.
    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }

    /// Add constraints and new variables, re-solve and commit.
    ///
    /// `new_nodes` supplies initial values; entries for variables that are
    /// already known are ignored. Every constraint is an independent
    /// measurement, even when equal to another one. Submitting exactly the
    /// constraints of the previous accepted update again is a no-op.
    pub fn update(
        &mut self,
        new_constraints: Vec<Constraint>,
        new_nodes: Vec<(VariableKey, VariableValue)>,
    ) -> Result<UpdateReport, EstimatorError> {
        let incoming: Values = new_nodes
            .into_iter()
            .filter(|(key, _)| !self.is_known(key))
            .collect();

        if let Some((key, _)) = incoming.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EstimatorError::NonFiniteValue(*key));
        }
        for constraint in &new_constraints {
            for key in constraint.keys() {
                if !self.is_known(&key) && !incoming.contains_key(&key) {
                    return Err(EstimatorError::UnknownVariable(key));
                }
            }
        }

        let mut report = UpdateReport {
            revision: self.estimate.revision,
            ..Default::default()
        };

        if !new_constraints.is_empty() && new_constraints == self.last_submission {
            report.duplicates = new_constraints.len();
            return Ok(report);
        }
        let submission = new_constraints.clone();

        // Split into landmark-free core and per-landmark groups, merging
        // with groups still pending from earlier updates.
        let mut core: Vec<Constraint> = Vec::new();
        let mut groups: BTreeMap<VariableKey, PendingGroup> = self
            .pending
            .iter()
            .map(|g| (g.landmark, g.clone()))
            .collect();

        for constraint in new_constraints {
            match constraint.landmark() {
                None => core.push(constraint),
                Some(landmark) => groups
                    .entry(landmark)
                    .or_insert_with(|| PendingGroup {
                        landmark,
                        constraints: Vec::new(),
                        attempts: 0,
                    })
                    .constraints
                    .push(constraint),
            }
        }

        if core.is_empty() && groups.is_empty() {
            self.staged.extend(incoming);
            return Ok(report);
        }

        let mut accepted: Vec<VariableKey> = Vec::new();
        let mut failed: Vec<VariableKey> = Vec::new();

        let solution = {
            let mut trial: Vec<&Constraint> = core.iter().collect();
            trial.extend(groups.values().flat_map(|g| g.constraints.iter()));

            match self.solve(&trial, &incoming) {
                Ok(solution) => {
                    accepted.extend(groups.keys().copied());
                    solution
                }
                Err(err) => {
                    log::debug!("Joint solve failed ({}), isolating landmark groups", err);

                    let mut base: Vec<&Constraint> = core.iter().collect();
                    let mut best = self.solve(&base, &incoming).map_err(|err| {
                        log::warn!("Update rejected: {}", err);
                        EstimatorError::IllConditioned {
                            reason: err.to_string(),
                        }
                    })?;

                    for (landmark, group) in &groups {
                        let mut candidate = base.clone();
                        candidate.extend(group.constraints.iter());
                        match self.solve(&candidate, &incoming) {
                            Ok(solution) => {
                                best = solution;
                                base = candidate;
                                accepted.push(*landmark);
                            }
                            Err(err) => {
                                log::debug!("Landmark {} not solvable yet: {}", landmark, err);
                                failed.push(*landmark);
                            }
                        }
                    }
                    best
                }
            }
        };

        // Commit
        let mut committed = core;
        for landmark in &accepted {
            if let Some(group) = groups.remove(landmark) {
                committed.extend(group.constraints);
            }
        }

        let mut pending = Vec::new();
        let mut abandoned: Vec<PendingGroup> = Vec::new();
        for landmark in failed {
            let Some(mut group) = groups.remove(&landmark) else {
                continue;
            };
            group.attempts += 1;
            if group.attempts > self.config.max_pending_retries {
                log::warn!(
                    "Dropping {} constraints on {} after {} failed attempts",
                    group.constraints.len(),
                    landmark,
                    group.attempts
                );
                report.dropped.push(landmark);
                abandoned.push(group);
            } else {
                report.deferred.push((landmark, group.attempts));
                pending.push(group);
            }
        }

        self.staged.extend(incoming);

        if !committed.is_empty() {
            report.committed = committed.len();
            for constraint in committed {
                let index = self.constraints.len();
                for key in constraint.keys() {
                    self.staged.remove(&key);
                    let edges = self.adjacency.entry(key).or_default();
                    if edges.last() != Some(&index) {
                        edges.push(index);
                    }
                }
                self.constraints.push(constraint);
            }

            report.updated = solution.values.keys().copied().collect();
            report.factors = solution.factors;
            self.estimate.values.extend(solution.values);
            self.estimate.covariances.extend(solution.covariances);
            self.estimate.revision += 1;
            report.revision = self.estimate.revision;
            report.optimization = Some(solution.result);
        }

        self.pending = pending;
        self.last_submission = submission;

        // Forget staged variables that only abandoned constraints needed.
        for group in &abandoned {
            for key in group.constraints.iter().flat_map(Constraint::keys) {
                let still_needed = self
                    .pending
                    .iter()
                    .flat_map(|g| g.constraints.iter())
                    .any(|c| c.keys().contains(&key));
                if !still_needed {
                    self.staged.remove(&key);
                }
            }
        }

        Ok(report)
    }

    fn initial_value(&self, key: &VariableKey, incoming: &Values) -> Option<VariableValue> {
        self.estimate
            .value(key)
            .or_else(|| self.staged.get(key).copied())
            .or_else(|| incoming.get(key).copied())
    }

    /// Variables touched by `trial`, expanded through committed constraints.
    fn active_set(&self, trial: &[&Constraint]) -> BTreeSet<VariableKey> {
        let mut active: BTreeSet<VariableKey> = trial.iter().flat_map(|c| c.keys()).collect();
        let mut frontier: Vec<VariableKey> = active.iter().copied().collect();
        let mut hops = 0;

        while !frontier.is_empty()
            && (self.config.max_active_hops == 0 || hops < self.config.max_active_hops)
        {
            let mut next = Vec::new();
            for key in &frontier {
                let Some(edges) = self.adjacency.get(key) else {
                    continue;
                };
                for index in edges {
                    for neighbour in self.constraints[*index].keys() {
                        if active.insert(neighbour) {
                            next.push(neighbour);
                        }
                    }
                }
            }
            frontier = next;
            hops += 1;
        }
        active
    }

    /// Solve committed factors around `trial` together with `trial`.
    fn solve<'a>(&'a self, trial: &[&'a Constraint], incoming: &Values) -> Result<Solution, SolveError> {
        if trial.is_empty() {
            return Ok(Solution::empty());
        }

        let active = self.active_set(trial);

        let touching: BTreeSet<usize> = active
            .iter()
            .filter_map(|key| self.adjacency.get(key))
            .flatten()
            .copied()
            .collect();
        let mut factors: Vec<&Constraint> = touching.iter().map(|i| &self.constraints[*i]).collect();
        factors.extend(trial.iter().copied());

        let mut values = Values::new();
        for key in factors.iter().flat_map(|f| f.keys()) {
            if values.contains_key(&key) {
                continue;
            }
            if let Some(value) = self.initial_value(&key, incoming) {
                values.insert(key, value);
            }
        }

        let problem = LocalProblem::new(&active, factors);
        problem.check_conditioning(&values, self.config.conditioning_epsilon)?;

        let result = problem.optimize(&mut values, &self.config)?;
        if active.iter().any(|k| values.get(k).is_some_and(|v| !v.is_finite())) {
            return Err(SolveError::NonFinite);
        }
        let covariances = problem.marginals(&values)?;

        log::trace!(
            "Solved {} variables / {} factors in {} iterations ({:.3e} -> {:.3e})",
            active.len(),
            problem.num_factors(),
            result.iterations,
            result.initial_error,
            result.final_error
        );

        Ok(Solution {
            values: active
                .iter()
                .filter_map(|k| values.get(k).map(|v| (*k, *v)))
                .collect(),
            covariances,
            result,
            factors: problem.num_factors(),
        })
    }
}
