//! Bounded detection reorder buffer.
//!
//! Detections from independent feeds arrive out of timestamp order. They
//! wait here, sorted by timestamp, until odometry reaches their time. When
//! the buffer is full the oldest detection is evicted rather than blocking
//! the feed.

use std::collections::VecDeque;

use crate::core::types::{Detection, LandmarkKind};

/// Timestamp-sorted detection buffer with a fixed capacity.
#[derive(Debug)]
pub struct ReorderBuffer {
    capacity: usize,
    items: VecDeque<Detection>,
}

impl ReorderBuffer {
    /// Create a buffer holding at most `capacity` detections (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity + 1),
        }
    }

    /// Insert a detection. Returns the evicted detection when over capacity.
    ///
    /// Equal timestamps keep arrival order.
    pub fn push(&mut self, detection: Detection) -> Option<Detection> {
        let key = detection.timestamp_us;
        let idx = self.items.partition_point(|d| d.timestamp_us <= key);
        self.items.insert(idx, detection);

        if self.items.len() > self.capacity {
            self.items.pop_front()
        } else {
            None
        }
    }

    /// Remove every detection with `timestamp_us <= up_to_us`, oldest first.
    pub fn release(&mut self, up_to_us: u64) -> Vec<Detection> {
        let n = self.items.partition_point(|d| d.timestamp_us <= up_to_us);
        self.items.drain(..n).collect()
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> Vec<Detection> {
        self.items.drain(..).collect()
    }

    /// Buffered detections.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of buffered detections.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Move point detections ahead of line detections within each window.
///
/// Windows start at the first detection not yet covered and span
/// `window_us`. Order is otherwise preserved.
pub fn prioritize_points(detections: Vec<Detection>, window_us: u64) -> Vec<Detection> {
    let mut out = Vec::with_capacity(detections.len());
    let mut window: Vec<Detection> = Vec::new();
    let mut window_start = 0;

    for detection in detections {
        if !window.is_empty() && detection.timestamp_us.saturating_sub(window_start) > window_us {
            flush_window(&mut window, &mut out);
        }
        if window.is_empty() {
            window_start = detection.timestamp_us;
        }
        window.push(detection);
    }
    flush_window(&mut window, &mut out);
    out
}

fn flush_window(window: &mut Vec<Detection>, out: &mut Vec<Detection>) {
    // Stable sort: points first, arrival order within each kind.
    window.sort_by_key(|d| d.kind() == LandmarkKind::Line);
    out.append(window);
}
