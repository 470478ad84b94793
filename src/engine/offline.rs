//! Offline batch estimation over a recorded survey.
//!
//! The online session associates each detection as it arrives. Offline,
//! every buoy sighting is available up front, so association can look at
//! all of them at once:
//!
//! ```text
//! dead-reckoned sightings ──► k-means (k = map buoys) ──► merge close means
//!                                                              │
//!        full joint solve ◄── graph ◄── cluster ─► buoy matching
//! ```
//!
//! Each sighting is projected into the world with its dead-reckoned pose,
//! the projections are clustered, and clusters are matched one-to-one to
//! the static buoy map at minimum total squared distance. The resulting
//! graph (pose prior, odometry chain, buoy priors, bearing/range sightings)
//! is solved with every variable active.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::defaults;
use crate::core::types::{Covariance, Point2D, Pose2D, RelativePosition};
use crate::engine::graph::{
    ConstraintFactory, EstimatorConfig, LocalProblem, OptimizationResult, SolveError, Values,
    VariableKey, VariableValue,
};

/// Largest buoy map matched by exhaustive search; bigger maps match greedily.
const EXHAUSTIVE_MATCH_LIMIT: usize = 8;

/// Offline association settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineConfig {
    /// Cluster means closer than this (meters) are merged into one buoy.
    #[serde(default = "defaults::cluster_mean_threshold")]
    pub cluster_mean_threshold: f64,

    /// Lloyd iterations per clustering pass.
    #[serde(default = "defaults::max_cluster_iterations")]
    pub max_cluster_iterations: usize,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cluster_mean_threshold: defaults::cluster_mean_threshold(),
            max_cluster_iterations: defaults::max_cluster_iterations(),
        }
    }
}

/// A buoy seen from a trajectory pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuoySighting {
    /// Index of the observing pose.
    pub pose: u64,
    /// Body-frame position of the buoy.
    pub relative: RelativePosition,
}

/// Jointly solved survey.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineSolution {
    /// Solved poses, indexed like the input trajectory.
    pub poses: Vec<Pose2D>,
    /// Solved buoys, indexed like the static map.
    pub buoys: Vec<Point2D>,
    /// Final cluster means of the dead-reckoned sightings.
    pub cluster_means: Vec<Point2D>,
    /// Buoy each sighting was associated with (`None` if left out).
    pub assignments: Vec<Option<u64>>,
    /// Marginal covariance of every variable.
    pub covariances: BTreeMap<VariableKey, Covariance>,
    /// Solver statistics.
    pub result: OptimizationResult,
}

/// Why an offline solve failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OfflineError {
    /// No poses were given.
    #[error("trajectory is empty")]
    EmptyTrajectory,

    /// A sighting references a pose outside the trajectory.
    #[error("sighting {index} references unknown pose {pose}")]
    UnknownPose {
        /// Sighting index
        index: usize,
        /// Pose it references
        pose: u64,
    },

    /// The joint problem could not be solved.
    #[error("offline solve failed: {0}")]
    Solve(#[from] SolveError),
}

/// Batch solver for a complete recording.
#[derive(Debug, Clone)]
pub struct OfflineSolver {
    factory: ConstraintFactory,
    estimator: EstimatorConfig,
    config: OfflineConfig,
}

impl OfflineSolver {
    /// Create a solver.
    pub fn new(factory: ConstraintFactory, estimator: EstimatorConfig, config: OfflineConfig) -> Self {
        Self {
            factory,
            estimator,
            config,
        }
    }

    /// Associate every sighting and solve the whole survey.
    ///
    /// `dead_reckoning` seeds the poses and `buoys` both seeds and priors
    /// the map. Pose 0 is anchored at its dead-reckoned value.
    pub fn solve(
        &self,
        dead_reckoning: &[Pose2D],
        sightings: &[BuoySighting],
        buoys: &[Point2D],
    ) -> Result<OfflineSolution, OfflineError> {
        let Some(anchor) = dead_reckoning.first() else {
            return Err(OfflineError::EmptyTrajectory);
        };

        let mut world = Vec::with_capacity(sightings.len());
        for (index, sighting) in sightings.iter().enumerate() {
            let pose = usize::try_from(sighting.pose)
                .ok()
                .and_then(|i| dead_reckoning.get(i))
                .ok_or(OfflineError::UnknownPose {
                    index,
                    pose: sighting.pose,
                })?;
            world.push(pose.transform_point(&sighting.relative.offset()));
        }

        let clusters = cluster_sightings(&world, buoys.len(), &self.config);
        let matching = match_clusters(&clusters.means, buoys);
        let assignments: Vec<Option<u64>> = clusters
            .labels
            .iter()
            .map(|label| label.and_then(|c| matching[c]).map(|b| b as u64))
            .collect();

        let unassigned = assignments.iter().filter(|a| a.is_none()).count();
        if unassigned > 0 {
            log::warn!("{} of {} buoy sightings left unassociated", unassigned, sightings.len());
        }
        log::info!(
            "Clustered {} sightings into {} buoys",
            sightings.len(),
            clusters.means.len()
        );

        let factory = &self.factory;
        let mut constraints = vec![factory.pose_prior(0, *anchor)];
        for (id, buoy) in buoys.iter().enumerate() {
            constraints.push(factory.point_prior(id as u64, *buoy));
        }
        for (i, pair) in dead_reckoning.windows(2).enumerate() {
            let from = i as u64;
            constraints.push(factory.odometry(from, from + 1, pair[0].between(&pair[1])));
        }
        for (sighting, assignment) in sightings.iter().zip(&assignments) {
            if let Some(buoy) = assignment {
                constraints.push(factory.point_landmark(sighting.pose, *buoy, &sighting.relative));
            }
        }

        let mut values = Values::new();
        for (i, pose) in dead_reckoning.iter().enumerate() {
            values.insert(VariableKey::Pose(i as u64), VariableValue::Pose(*pose));
        }
        for (i, buoy) in buoys.iter().enumerate() {
            values.insert(VariableKey::Point(i as u64), VariableValue::Point(*buoy));
        }
        let active: BTreeSet<VariableKey> = values.keys().copied().collect();

        let problem = LocalProblem::new(&active, constraints.iter().collect());
        problem.check_conditioning(&values, self.estimator.conditioning_epsilon)?;
        let result = problem.optimize(&mut values, &self.estimator)?;
        if values.values().any(|v| !v.is_finite()) {
            return Err(SolveError::NonFinite.into());
        }
        let covariances = problem.marginals(&values)?;

        log::info!(
            "Offline solve: {} variables, {} factors, {} iterations ({:.3e} -> {:.3e})",
            active.len(),
            problem.num_factors(),
            result.iterations,
            result.initial_error,
            result.final_error
        );

        Ok(OfflineSolution {
            poses: values.values().filter_map(VariableValue::as_pose).collect(),
            buoys: values.values().filter_map(VariableValue::as_point).collect(),
            cluster_means: clusters.means,
            assignments,
            covariances,
            result,
        })
    }
}

/// Cluster means and the cluster of each input point.
#[derive(Debug, Clone, PartialEq)]
struct Clustering {
    means: Vec<Point2D>,
    labels: Vec<Option<usize>>,
}

/// k-means with at most `max_clusters` clusters, merging close means.
///
/// Seeds are chosen farthest-first starting from the point nearest the
/// centroid, so the result is deterministic.
fn cluster_sightings(points: &[Point2D], max_clusters: usize, config: &OfflineConfig) -> Clustering {
    let k = max_clusters.min(points.len());
    if k == 0 {
        return Clustering {
            means: Vec::new(),
            labels: vec![None; points.len()],
        };
    }

    let mut means = farthest_first_seeds(points, k);
    loop {
        let labels = lloyd(points, &mut means, config.max_cluster_iterations);
        match closest_pair(&means) {
            Some((a, b, distance)) if distance < config.cluster_mean_threshold => {
                log::debug!(
                    "Merging clusters {} and {} ({:.2} m apart)",
                    a,
                    b,
                    distance
                );
                means[a] = merged_mean(points, &labels, a, b).unwrap_or(means[a].midpoint(&means[b]));
                means.remove(b);
            }
            _ => {
                return Clustering {
                    means,
                    labels: labels.into_iter().map(Some).collect(),
                }
            }
        }
    }
}

fn farthest_first_seeds(points: &[Point2D], k: usize) -> Vec<Point2D> {
    let n = points.len() as f64;
    let centroid = Point2D::new(
        points.iter().map(|p| p.x).sum::<f64>() / n,
        points.iter().map(|p| p.y).sum::<f64>() / n,
    );

    let mut seeds = vec![points[nearest(&centroid, points)]];
    while seeds.len() < k {
        let next = points
            .iter()
            .map(|p| seeds.iter().map(|s| p.distance_squared(s)).fold(f64::INFINITY, f64::min))
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(0, |(i, _)| i);
        seeds.push(points[next]);
    }
    seeds
}

/// Alternate assignment and mean updates until labels settle.
fn lloyd(points: &[Point2D], means: &mut [Point2D], max_iterations: usize) -> Vec<usize> {
    let mut labels: Vec<usize> = points.iter().map(|p| nearest(p, means)).collect();
    for _ in 0..max_iterations {
        let mut sums = vec![(0.0, 0.0, 0usize); means.len()];
        for (p, &label) in points.iter().zip(&labels) {
            sums[label].0 += p.x;
            sums[label].1 += p.y;
            sums[label].2 += 1;
        }
        // Empty clusters keep their previous mean.
        for (mean, (sx, sy, count)) in means.iter_mut().zip(sums) {
            if count > 0 {
                *mean = Point2D::new(sx / count as f64, sy / count as f64);
            }
        }

        let next: Vec<usize> = points.iter().map(|p| nearest(p, means)).collect();
        if next == labels {
            break;
        }
        labels = next;
    }
    labels
}

fn nearest(p: &Point2D, candidates: &[Point2D]) -> usize {
    candidates
        .iter()
        .map(|c| p.distance_squared(c))
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(0, |(i, _)| i)
}

/// Closest pair of means as `(a, b, distance)` with `a < b`.
fn closest_pair(means: &[Point2D]) -> Option<(usize, usize, f64)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for a in 0..means.len() {
        for b in a + 1..means.len() {
            let d = means[a].distance(&means[b]);
            if best.map_or(true, |(_, _, current)| d < current) {
                best = Some((a, b, d));
            }
        }
    }
    best
}

fn merged_mean(points: &[Point2D], labels: &[usize], a: usize, b: usize) -> Option<Point2D> {
    let members: Vec<&Point2D> = points
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l == a || **l == b)
        .map(|(p, _)| p)
        .collect();
    if members.is_empty() {
        return None;
    }
    let n = members.len() as f64;
    Some(Point2D::new(
        members.iter().map(|p| p.x).sum::<f64>() / n,
        members.iter().map(|p| p.y).sum::<f64>() / n,
    ))
}

/// One-to-one cluster-to-buoy matching at minimum total squared distance.
///
/// Clusters never outnumber buoys, so every cluster gets a buoy unless the
/// map is empty.
fn match_clusters(means: &[Point2D], buoys: &[Point2D]) -> Vec<Option<usize>> {
    if buoys.is_empty() {
        return vec![None; means.len()];
    }
    if buoys.len() > EXHAUSTIVE_MATCH_LIMIT {
        return match_greedy(means, buoys);
    }

    let mut search = MatchSearch {
        means,
        buoys,
        used: vec![false; buoys.len()],
        current: Vec::with_capacity(means.len()),
        best_cost: f64::INFINITY,
        best: Vec::new(),
    };
    search.run(0.0);
    if search.best.len() != means.len() {
        return match_greedy(means, buoys);
    }
    search.best.into_iter().map(Some).collect()
}

struct MatchSearch<'a> {
    means: &'a [Point2D],
    buoys: &'a [Point2D],
    used: Vec<bool>,
    current: Vec<usize>,
    best_cost: f64,
    best: Vec<usize>,
}

impl MatchSearch<'_> {
    fn run(&mut self, cost: f64) {
        if cost >= self.best_cost {
            return;
        }
        let cluster = self.current.len();
        if cluster == self.means.len() {
            self.best_cost = cost;
            self.best.clone_from(&self.current);
            return;
        }
        for buoy in 0..self.buoys.len() {
            if self.used[buoy] {
                continue;
            }
            self.used[buoy] = true;
            self.current.push(buoy);
            self.run(cost + self.means[cluster].distance_squared(&self.buoys[buoy]));
            self.current.pop();
            self.used[buoy] = false;
        }
    }
}

fn match_greedy(means: &[Point2D], buoys: &[Point2D]) -> Vec<Option<usize>> {
    let mut pairs: Vec<(f64, usize, usize)> = means
        .iter()
        .enumerate()
        .flat_map(|(c, m)| buoys.iter().enumerate().map(move |(b, p)| (m.distance_squared(p), c, b)))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut out = vec![None; means.len()];
    let mut taken = vec![false; buoys.len()];
    for (_, c, b) in pairs {
        if out[c].is_none() && !taken[b] {
            out[c] = Some(b);
            taken[b] = true;
        }
    }
    out
}
