//! Test utilities for JalaSLAM integration tests.
//!
//! Event builders and session helpers shared by the scenario tests.

#![allow(dead_code)]

use jala_slam::{
    AssociationConfig, Detection, DetectionTarget, OdometryTick, Point2D, Pose2D,
    RelativePosition, SensorEvent, SensorSource, SessionConfig, SlamSession,
};

/// Microseconds between odometry ticks.
pub const TICK_US: u64 = 1_000_000;

/// Odometry tick `k` carrying `delta`.
pub fn tick(k: u64, delta: Pose2D) -> SensorEvent {
    SensorEvent::Odometry(OdometryTick::new(delta, k * TICK_US))
}

/// `n` ticks moving `step` meters forward, starting at the origin.
pub fn straight_ticks(n: u64, step: f64) -> Vec<SensorEvent> {
    (0..n)
        .map(|k| {
            let delta = if k == 0 {
                Pose2D::identity()
            } else {
                Pose2D::new(step, 0.0, 0.0)
            };
            tick(k, delta)
        })
        .collect()
}

/// Buoy detection seen from the pose of tick `k`.
pub fn buoy(seq_id: u64, k: u64, x: f64, y: f64) -> SensorEvent {
    SensorEvent::Detection(Detection::new(
        seq_id,
        k * TICK_US + 10_000,
        SensorSource::Camera,
        DetectionTarget::Buoy,
        RelativePosition::Offset(Point2D::new(x, y)),
    ))
}

/// Rope detection seen from the pose of tick `k`.
pub fn rope(seq_id: u64, k: u64, x: f64, y: f64) -> SensorEvent {
    SensorEvent::Detection(Detection::new(
        seq_id,
        k * TICK_US + 20_000,
        SensorSource::Sonar,
        DetectionTarget::Rope,
        RelativePosition::Offset(Point2D::new(x, y)),
    ))
}

/// Default session config with a Euclidean gate.
pub fn gated_config(distance: f64) -> SessionConfig {
    SessionConfig {
        association: AssociationConfig {
            distance_threshold: Some(distance),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Feed every event, flush, and return the session.
pub fn run(config: SessionConfig, events: Vec<SensorEvent>) -> SlamSession {
    let mut session = SlamSession::new(config);
    for event in events {
        session.handle(event).unwrap();
    }
    session.finish().unwrap();
    session
}
