//! Session pipeline tests.
//!
//! - Out-of-order detections are processed in timestamp order
//! - A full reorder buffer evicts its oldest detection
//! - The worker thread produces the same estimate as an inline session
//! - A YAML file drives a complete run
//!
//! Run with: `cargo test --test session`

mod common;

use std::io::Write;

use jala_slam::{Diagnostic, JalaConfig, SessionConfig, SessionWorker, SlamSession};

use common::{buoy, gated_config, run, straight_ticks};

#[test]
fn test_out_of_order_detections_processed_by_timestamp() {
    let mut events = straight_ticks(3, 1.0);
    // The later sighting is delivered first.
    events.insert(1, buoy(2, 1, 20.0, 0.0));
    events.insert(2, buoy(1, 0, 10.0, 0.0));

    let session = run(gated_config(3.0), events);
    let seqs: Vec<u64> = session.buoy_associations().iter().map(|r| r.seq_id).collect();
    assert_eq!(seqs, vec![1, 2]);
}

#[test]
fn test_full_buffer_evicts_oldest() {
    let config = SessionConfig {
        sss_buffer_len: 2,
        ..gated_config(3.0)
    };
    let mut session = SlamSession::new(config);

    for event in straight_ticks(1, 1.0) {
        session.handle(event).unwrap();
    }
    session.handle(buoy(1, 0, 5.0, 0.0)).unwrap();
    session.handle(buoy(2, 0, 15.0, 0.0)).unwrap();
    session.handle(buoy(3, 1, 25.0, 0.0)).unwrap();
    session.handle(buoy(4, 0, 35.0, 0.0)).unwrap();

    assert_eq!(session.buffered(), 2);
    assert_eq!(session.counters().detections_evicted, 2);

    let evicted: Vec<u64> = session
        .drain_diagnostics()
        .iter()
        .filter_map(|d| match d {
            Diagnostic::Evicted { seq_id, .. } => Some(*seq_id),
            _ => None,
        })
        .collect();
    assert_eq!(evicted, vec![1, 2]);

    session.finish().unwrap();
    let seqs: Vec<u64> = session.buoy_associations().iter().map(|r| r.seq_id).collect();
    assert_eq!(seqs, vec![4, 3]);
}

#[test]
fn test_rejected_update_leaves_estimate_unchanged() {
    let mut session = SlamSession::new(SessionConfig::default());
    for event in straight_ticks(3, 1.0) {
        session.handle(event).unwrap();
    }
    let before = session.snapshot();

    let err = session.handle(common::tick(1, jala_slam::Pose2D::new(1.0, 0.0, 0.0)));
    assert!(err.is_err());

    let after = session.snapshot();
    assert_eq!(before.trajectory, after.trajectory);
    assert_eq!(before.revision, after.revision);
}

#[test]
fn test_worker_matches_inline() {
    let mut events = straight_ticks(8, 1.0);
    events.insert(1, buoy(1, 0, 6.0, 2.0));
    events.insert(4, buoy(2, 2, 4.0, 2.0));
    events.push(buoy(3, 5, 1.0, 2.0));

    let inline = run(gated_config(3.0), events.clone());

    let worker = SessionWorker::spawn(gated_config(3.0)).unwrap();
    for event in events {
        worker.submit(event).unwrap();
    }
    let snapshot = worker.finish().unwrap();

    assert_eq!(snapshot, inline.snapshot());
    assert_eq!(snapshot.points.len(), 1);
}

#[test]
fn test_yaml_driven_run() {
    let yaml = r#"
sigmas:
  rope_along_sig: -3.0
association:
  da_distance_threshold: 3.0
batching:
  individual_rope_detections: false
  rope_batch_size: 2
map:
  buoys: [[10.0, 0.0]]
buffer:
  sss_buffer_len: 4
verbosity:
  verbose_graph_update: true
"#;
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    let config = JalaConfig::load(file.path())
        .unwrap()
        .to_session_config()
        .unwrap();
    assert_eq!(config.sss_buffer_len, 4);
    assert_eq!(config.static_map.buoys.len(), 1);

    let mut events = straight_ticks(4, 1.0);
    events.insert(1, buoy(1, 0, 10.2, 0.1));
    events.push(buoy(2, 2, 8.1, -0.1));

    let mut session = run(config, events);
    let ids: Vec<i64> = session.buoy_associations().iter().map(|r| r.buoy_id).collect();
    assert_eq!(ids, vec![0, 0]);

    let updates = session
        .drain_diagnostics()
        .iter()
        .filter(|d| matches!(d, Diagnostic::Update { .. }))
        .count();
    assert_eq!(updates, session.performance().len());

    let json = session.snapshot().to_json().unwrap();
    let parsed: jala_slam::SessionSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.points.len(), 1);
    assert_eq!(parsed.trajectory.len(), 4);
}
