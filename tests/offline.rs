//! Offline batch scenario tests.
//!
//! A straight survey whose odometry over-reports every step, with two
//! buoys of a known map seen at either end:
//! - The batch solve recovers the true trajectory far better than dead reckoning
//! - Sightings of one buoy collapse into one cluster even when the map is larger
//!
//! Run with: `cargo test --test offline`

mod common;

use jala_slam::{
    BuoySighting, JalaConfig, NoiseSigmas, Point2D, Pose2D, RelativePosition, SensorEvent,
    StaticMap, TrajectoryComparison,
};

use common::{buoy, gated_config, run, tick};

const TRUE_STEP: f64 = 0.95;
const POSES: u64 = 31;

fn buoy_a() -> Point2D {
    Point2D::new(0.0, 5.0)
}

fn buoy_b() -> Point2D {
    Point2D::new(28.5, -5.0)
}

fn truth() -> Vec<Pose2D> {
    (0..POSES).map(|k| Pose2D::new(k as f64 * TRUE_STEP, 0.0, 0.0)).collect()
}

/// Sightings of A from poses 0..5 and of B from poses 26..30, measured
/// from the true poses.
fn sightings() -> Vec<BuoySighting> {
    let truth = truth();
    let seen = |k: u64, b: Point2D| BuoySighting {
        pose: k,
        relative: RelativePosition::Offset(truth[k as usize].inverse_transform_point(&b)),
    };
    (0..5)
        .map(|k| seen(k, buoy_a()))
        .chain((26..POSES).map(|k| seen(k, buoy_b())))
        .collect()
}

fn events(sightings: &[BuoySighting]) -> Vec<SensorEvent> {
    let mut events = Vec::new();
    let mut seq_id = 0;
    for k in 0..POSES {
        let delta = if k == 0 {
            Pose2D::identity()
        } else {
            Pose2D::new(1.0, 0.0, 0.0)
        };
        events.push(tick(k, delta));
        for s in sightings.iter().filter(|s| s.pose == k) {
            seq_id += 1;
            let offset = s.relative.offset();
            events.push(buoy(seq_id, k, offset.x, offset.y));
        }
    }
    events
}

fn tight_sigmas() -> NoiseSigmas {
    NoiseSigmas {
        buoy_prior: 0.1,
        ..Default::default()
    }
}

#[test]
fn test_batch_solve_beats_dead_reckoning() {
    let sightings = sightings();
    let map = vec![buoy_a(), buoy_b()];

    let mut config = gated_config(5.0);
    config.sigmas = tight_sigmas();
    config.static_map = StaticMap {
        buoys: map.clone(),
        ..Default::default()
    };
    let snapshot = run(config, events(&sightings)).snapshot();
    let dead_reckoning: Vec<Pose2D> = snapshot.trajectory.iter().map(|n| n.dead_reckoning).collect();
    let online: Vec<Pose2D> = snapshot.trajectory.iter().map(|n| n.estimate).collect();
    assert_eq!(dead_reckoning.len(), POSES as usize);

    let mut file_config = JalaConfig::default();
    file_config.sigmas.buoy_dist_sig = 0.1;
    let solver = file_config.to_offline_solver().unwrap();
    let solution = solver.solve(&dead_reckoning, &sightings, &map).unwrap();

    assert!(solution.assignments[..5].iter().all(|a| *a == Some(0)));
    assert!(solution.assignments[5..].iter().all(|a| *a == Some(1)));

    let comparison =
        TrajectoryComparison::new(&truth(), &dead_reckoning, &online, Some(&solution.poses));
    let offline = comparison.offline.unwrap();
    assert!(comparison.dead_reckoning.max > 1.4);
    assert!(
        offline.rmse < 0.25 * comparison.dead_reckoning.rmse,
        "offline {:.3} vs dead reckoning {:.3}",
        offline.rmse,
        comparison.dead_reckoning.rmse
    );
    assert!(comparison.online.rmse < comparison.dead_reckoning.rmse);
}

#[test]
fn test_unseen_map_buoy_keeps_its_prior() {
    let sightings: Vec<BuoySighting> = sightings().into_iter().take(5).collect();
    let dead_reckoning: Vec<Pose2D> = (0..POSES).map(|k| Pose2D::new(k as f64, 0.0, 0.0)).collect();
    let map = vec![Point2D::new(40.0, 40.0), buoy_a()];

    let solver = JalaConfig::default().to_offline_solver().unwrap();
    let solution = solver.solve(&dead_reckoning, &sightings, &map).unwrap();

    assert_eq!(solution.cluster_means.len(), 1);
    assert!(solution.assignments.iter().all(|a| *a == Some(1)));
    assert!(solution.buoys[0].distance(&map[0]) < 1e-6);
}
