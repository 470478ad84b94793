//! Rope detection batching.
//!
//! Line detections are collected into batches before they become graph
//! constraints. A batch only ever holds detections of one line; at most one
//! batch is open at a time.
//!
//! Flush triggers:
//!
//! ```text
//! before adding:  line id differs       → LineChange
//!                 first member too old  → Timeout
//!                 swath differs         → SwathChange  (batch_by_swath)
//! after adding:   no policy configured  → Immediate
//!                 size reached          → Size         (rope_batch_size > 0)
//!                 last id of the swath  → SwathEnd     (batch_by_swath)
//! ```
//!
//! A flushed [`Batch`] is a plain value; it can no longer grow.

use serde::{Deserialize, Serialize};

use crate::config::defaults;
use crate::core::types::Detection;
use crate::engine::association::SwathTable;

/// Batching policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// One constraint per detection instead of one per batch.
    #[serde(default = "defaults::enabled")]
    pub individual_rope_detections: bool,

    /// Flush after this many detections (0 disables).
    #[serde(default)]
    pub rope_batch_size: usize,

    /// Keep a batch open while detections stay on one line.
    #[serde(default)]
    pub rope_batch_by_line: bool,

    /// Maximum batch age in seconds (<= 0 disables).
    #[serde(default = "defaults::rope_batch_by_line_timeout")]
    pub rope_batch_by_line_timeout: f64,

    /// Batch by configured swath.
    #[serde(default)]
    pub batch_by_swath: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            individual_rope_detections: defaults::enabled(),
            rope_batch_size: 0,
            rope_batch_by_line: false,
            rope_batch_by_line_timeout: defaults::rope_batch_by_line_timeout(),
            batch_by_swath: false,
        }
    }
}

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    /// Reached `rope_batch_size`.
    Size,
    /// A detection of another line arrived.
    LineChange,
    /// First member older than the timeout.
    Timeout,
    /// A detection of another swath arrived.
    SwathChange,
    /// The swath's final sequence id was added.
    SwathEnd,
    /// Session teardown.
    Drain,
    /// No batching policy configured.
    Immediate,
}

/// A detection waiting in a batch, with the pose it attaches to.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchMember {
    /// The detection.
    pub detection: Detection,
    /// Pose the detection was taken from.
    pub pose_id: u64,
}

/// A flushed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Line every member was associated with.
    pub line_id: u64,
    /// Swath the batch belongs to, when batching by swath.
    pub swath: Option<usize>,
    /// Members in arrival order.
    pub members: Vec<BatchMember>,
    /// Trigger.
    pub reason: FlushReason,
}

impl Batch {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the batch has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug)]
struct OpenBatch {
    line_id: u64,
    swath: Option<usize>,
    first_us: u64,
    members: Vec<BatchMember>,
}

/// Collects line detections into batches.
#[derive(Debug)]
pub struct RopeBatcher {
    config: BatchingConfig,
    swaths: Option<SwathTable>,
    open: Option<OpenBatch>,
}

impl RopeBatcher {
    /// Create a batcher. `swaths` is only consulted with `batch_by_swath`.
    pub fn new(config: BatchingConfig, swaths: Option<SwathTable>) -> Self {
        Self {
            config,
            swaths,
            open: None,
        }
    }

    /// Policy in use.
    pub fn config(&self) -> &BatchingConfig {
        &self.config
    }

    /// Add a detection associated with `line_id`.
    ///
    /// Returns the batches flushed by this call in flush order: possibly the
    /// previously open batch, then possibly the batch this detection joined.
    pub fn offer(&mut self, detection: Detection, line_id: u64, pose_id: u64) -> Vec<Batch> {
        let mut flushed = Vec::new();
        let swath = self.swath_of(&detection);

        if let Some(open) = &self.open {
            let expired = self
                .timeout_us()
                .is_some_and(|t| detection.timestamp_us.saturating_sub(open.first_us) > t);

            let reason = if open.line_id != line_id {
                Some(FlushReason::LineChange)
            } else if expired {
                Some(FlushReason::Timeout)
            } else if self.config.batch_by_swath && open.swath != swath {
                Some(FlushReason::SwathChange)
            } else {
                None
            };

            if let Some(reason) = reason {
                flushed.extend(self.close(reason));
            }
        }

        let seq_id = detection.seq_id;
        let timestamp_us = detection.timestamp_us;
        let open = self.open.get_or_insert_with(|| OpenBatch {
            line_id,
            swath,
            first_us: timestamp_us,
            members: Vec::new(),
        });
        open.members.push(BatchMember { detection, pose_id });
        let len = open.members.len();

        let swath_end = self.config.batch_by_swath
            && swath.is_some()
            && self.swaths.as_ref().is_some_and(|s| s.is_swath_end(seq_id));

        let reason = if self.is_immediate() {
            Some(FlushReason::Immediate)
        } else if self.config.rope_batch_size > 0 && len >= self.config.rope_batch_size {
            Some(FlushReason::Size)
        } else if swath_end {
            Some(FlushReason::SwathEnd)
        } else {
            None
        };

        if let Some(reason) = reason {
            flushed.extend(self.close(reason));
        }
        flushed
    }

    /// Flush the open batch if it has outlived the timeout at `now_us`.
    pub fn poll(&mut self, now_us: u64) -> Option<Batch> {
        let timeout = self.timeout_us()?;
        let open = self.open.as_ref()?;
        if now_us.saturating_sub(open.first_us) > timeout {
            self.close(FlushReason::Timeout)
        } else {
            None
        }
    }

    /// Flush whatever is open.
    pub fn flush(&mut self) -> Option<Batch> {
        self.close(FlushReason::Drain)
    }

    /// Detections waiting in the open batch.
    pub fn pending(&self) -> usize {
        self.open.as_ref().map_or(0, |b| b.members.len())
    }

    fn close(&mut self, reason: FlushReason) -> Option<Batch> {
        let open = self.open.take()?;
        log::debug!(
            "Flushing rope batch: line {} with {} detections ({:?})",
            open.line_id,
            open.members.len(),
            reason
        );
        Some(Batch {
            line_id: open.line_id,
            swath: open.swath,
            members: open.members,
            reason,
        })
    }

    fn is_immediate(&self) -> bool {
        self.config.rope_batch_size == 0 && !self.config.rope_batch_by_line && !self.config.batch_by_swath
    }

    fn timeout_us(&self) -> Option<u64> {
        let t = self.config.rope_batch_by_line_timeout;
        (t > 0.0).then(|| (t * 1e6) as u64)
    }

    fn swath_of(&self, detection: &Detection) -> Option<usize> {
        if !self.config.batch_by_swath {
            return None;
        }
        self.swaths.as_ref()?.swath_of(detection.seq_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DetectionTarget, Point2D, RelativePosition, SensorSource};
    use crate::engine::association::{ManualTarget, SeqSelector};

    fn rope(seq_id: u64, timestamp_us: u64) -> Detection {
        Detection::new(
            seq_id,
            timestamp_us,
            SensorSource::Sonar,
            DetectionTarget::Rope,
            RelativePosition::Offset(Point2D::new(0.0, 4.0)),
        )
    }

    fn by_line() -> BatchingConfig {
        BatchingConfig {
            rope_batch_by_line: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_immediate_when_no_policy() {
        let mut batcher = RopeBatcher::new(BatchingConfig::default(), None);
        let flushed = batcher.offer(rope(1, 0), 0, 0);

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].reason, FlushReason::Immediate);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn test_line_change_flushes_previous() {
        let mut batcher = RopeBatcher::new(by_line(), None);
        assert!(batcher.offer(rope(1, 0), 0, 0).is_empty());
        assert!(batcher.offer(rope(2, 10), 0, 1).is_empty());

        let flushed = batcher.offer(rope(3, 20), 1, 2);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].line_id, 0);
        assert_eq!(flushed[0].reason, FlushReason::LineChange);
        assert!(flushed[0].members.iter().all(|m| m.detection.seq_id < 3));
        assert_eq!(batcher.pending(), 1);
    }

    #[test]
    fn test_size_flush() {
        let mut batcher = RopeBatcher::new(
            BatchingConfig {
                rope_batch_size: 3,
                ..Default::default()
            },
            None,
        );
        assert!(batcher.offer(rope(1, 0), 0, 0).is_empty());
        assert!(batcher.offer(rope(2, 1), 0, 0).is_empty());

        let flushed = batcher.offer(rope(3, 2), 0, 0);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 3);
        assert_eq!(flushed[0].reason, FlushReason::Size);
    }

    #[test]
    fn test_line_change_then_size() {
        let mut batcher = RopeBatcher::new(
            BatchingConfig {
                rope_batch_size: 2,
                rope_batch_by_line: true,
                ..Default::default()
            },
            None,
        );
        batcher.offer(rope(1, 0), 0, 0);
        let flushed = batcher.offer(rope(2, 1), 1, 0);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].reason, FlushReason::LineChange);

        let flushed = batcher.offer(rope(3, 2), 1, 0);
        assert_eq!(flushed[0].reason, FlushReason::Size);
        assert_eq!(flushed[0].line_id, 1);
    }

    #[test]
    fn test_timeout_on_offer_and_poll() {
        let config = BatchingConfig {
            rope_batch_by_line: true,
            rope_batch_by_line_timeout: 1.0,
            ..Default::default()
        };
        let mut batcher = RopeBatcher::new(config, None);
        batcher.offer(rope(1, 0), 0, 0);

        let flushed = batcher.offer(rope(2, 1_500_000), 0, 1);
        assert_eq!(flushed[0].reason, FlushReason::Timeout);
        assert_eq!(flushed[0].len(), 1);

        assert!(batcher.poll(2_000_000).is_none());
        let polled = batcher.poll(2_600_000).unwrap();
        assert_eq!(polled.reason, FlushReason::Timeout);
        assert!(batcher.poll(9_000_000).is_none());
    }

    #[test]
    fn test_swath_change_and_end() {
        let swaths = SwathTable::build(
            &[vec![SeqSelector::Range([0, 4])], vec![SeqSelector::Range([10, 14])]],
            vec![ManualTarget::Landmark(0), ManualTarget::Landmark(0)],
        )
        .unwrap();
        let config = BatchingConfig {
            batch_by_swath: true,
            ..Default::default()
        };
        let mut batcher = RopeBatcher::new(config, Some(swaths));

        batcher.offer(rope(1, 0), 0, 0);
        batcher.offer(rope(2, 1), 0, 0);
        let flushed = batcher.offer(rope(11, 2), 0, 1);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].reason, FlushReason::SwathChange);
        assert_eq!(flushed[0].swath, Some(0));

        let flushed = batcher.offer(rope(14, 3), 0, 1);
        assert_eq!(flushed[0].reason, FlushReason::SwathEnd);
        assert_eq!(flushed[0].swath, Some(1));
        assert_eq!(flushed[0].len(), 2);
    }

    #[test]
    fn test_drain() {
        let mut batcher = RopeBatcher::new(by_line(), None);
        assert!(batcher.flush().is_none());
        batcher.offer(rope(1, 0), 0, 0);
        let batch = batcher.flush().unwrap();
        assert_eq!(batch.reason, FlushReason::Drain);
        assert!(batcher.flush().is_none());
    }
}
