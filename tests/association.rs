//! Data association scenario tests.
//!
//! - Manual tables resolve deterministically, sentinels reject
//! - Euclidean gating assigns, mints or rejects
//! - Static priors are matched before anything is minted
//!
//! Run with: `cargo test --test association`

mod common;

use approx::assert_relative_eq;
use jala_slam::engine::graph::LandmarkOrigin;
use jala_slam::{JalaConfig, Point2D, SessionConfig, StaticMap};

use common::{buoy, gated_config, run, straight_ticks};

fn manual_config() -> SessionConfig {
    let yaml = r#"
association:
  manual_associations: true
  buoy_seq_ids: [1, [2, 3], 4]
  buoy_ids: [5, 5, -1]
"#;
    JalaConfig::from_yaml(yaml)
        .unwrap()
        .to_session_config()
        .unwrap()
}

// ============================================================================
// Manual association
// ============================================================================

#[test]
fn test_manual_association_is_deterministic() {
    let positions = [(4.0, 1.0), (30.0, -12.0)];

    let ids: Vec<Vec<i64>> = positions
        .iter()
        .map(|&(x, y)| {
            let mut events = straight_ticks(5, 1.0);
            for k in 0..4 {
                // Geometrically inconsistent sightings; only the table decides.
                events.push(buoy(k + 1, k, x + 10.0 * k as f64, y));
            }
            let session = run(manual_config(), events);
            session
                .buoy_associations()
                .iter()
                .map(|r| r.buoy_id)
                .collect()
        })
        .collect();

    assert_eq!(ids[0], vec![5, 5, 5, -1]);
    assert_eq!(ids[0], ids[1]);
}

#[test]
fn test_manual_sentinel_never_touches_graph() {
    let mut events = straight_ticks(3, 1.0);
    events.push(buoy(4, 0, 3.0, 0.0));

    let session = run(manual_config(), events);
    let snapshot = session.snapshot();

    assert_eq!(session.counters().detections_rejected, 1);
    assert!(snapshot.points.is_empty());
    for (i, node) in snapshot.trajectory.iter().enumerate() {
        assert_relative_eq!(node.estimate.x, i as f64, epsilon = 1e-6);
    }
}

// ============================================================================
// Automatic gating
// ============================================================================

#[test]
fn test_within_gate_assigns_existing() {
    let mut events = straight_ticks(3, 1.0);
    events.insert(1, buoy(1, 0, 10.0, 0.0));
    // From x = 1 this lands at (11, 0.5), inside a 3 m gate.
    events.insert(3, buoy(2, 1, 10.0, 0.5));

    let session = run(gated_config(3.0), events);
    let records = session.buoy_associations();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].buoy_id, 0);
    assert_eq!(records[1].buoy_id, 0);
    assert!(records[1].distance.unwrap() <= 3.0);
    assert_eq!(session.snapshot().points.len(), 1);
}

#[test]
fn test_outside_gate_open_world_mints() {
    let mut events = straight_ticks(3, 1.0);
    events.insert(1, buoy(1, 0, 10.0, 0.0));
    events.insert(3, buoy(2, 1, 19.0, 0.0));

    let session = run(gated_config(3.0), events);
    let ids: Vec<i64> = session.buoy_associations().iter().map(|r| r.buoy_id).collect();

    assert_eq!(ids, vec![0, 1]);
    assert_eq!(session.snapshot().points.len(), 2);
}

#[test]
fn test_outside_gate_closed_world_rejects() {
    let mut config = gated_config(3.0);
    config.association.open_world = false;
    config.static_map = StaticMap {
        buoys: vec![Point2D::new(10.0, 0.0)],
        ..Default::default()
    };

    let mut events = straight_ticks(3, 1.0);
    events.insert(1, buoy(1, 0, 10.2, 0.0));
    events.insert(3, buoy(2, 1, 19.0, 0.0));

    let session = run(config, events);
    let ids: Vec<i64> = session.buoy_associations().iter().map(|r| r.buoy_id).collect();

    assert_eq!(ids, vec![0, -1]);
    assert_eq!(session.counters().detections_rejected, 1);
    assert_eq!(session.snapshot().points.len(), 1);
}

#[test]
fn test_static_buoy_matched_and_refined() {
    let mut config = gated_config(2.0);
    config.static_map = StaticMap {
        buoys: vec![Point2D::new(10.0, 0.0)],
        ..Default::default()
    };

    let mut events = straight_ticks(2, 1.0);
    events.insert(1, buoy(1, 0, 10.5, 0.0));

    let session = run(config, events);
    let snapshot = session.snapshot();

    assert_eq!(snapshot.points.len(), 1);
    let node = &snapshot.points[0];
    assert_eq!(node.id, 0);
    assert_eq!(node.origin, LandmarkOrigin::StaticPrior);

    let x = node.geometry.center().x;
    assert!(x > 10.0 && x <= 10.5, "buoy at {}", x);
}
