//! Sorted sequence-id lookup tables.
//!
//! Manual association and swath batching both map detector sequence ids to
//! values through operator supplied tables. Entries are single ids or
//! inclusive ranges; they are sorted once at construction and looked up with a
//! binary search.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sequence-id selector as written in configuration.
///
/// ```yaml
/// buoy_seq_ids: [12, [40, 55], 90]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeqSelector {
    /// A single sequence id.
    Single(u64),
    /// Inclusive `[start, end]` range.
    Range([u64; 2]),
}

impl SeqSelector {
    /// Inclusive bounds of this selector.
    #[inline]
    pub fn bounds(&self) -> (u64, u64) {
        match *self {
            SeqSelector::Single(id) => (id, id),
            SeqSelector::Range([start, end]) => (start, end),
        }
    }
}

/// Value of a manual association entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualTarget {
    /// Associate with this landmark id.
    Landmark(u64),
    /// Sentinel: discard the detection.
    Reject,
}

impl ManualTarget {
    /// Decode a configured id where `-1` is the reject sentinel.
    pub fn from_config(table: &'static str, id: i64) -> Result<Self, SeqTableError> {
        match id {
            -1 => Ok(ManualTarget::Reject),
            id if id >= 0 => Ok(ManualTarget::Landmark(id as u64)),
            id => Err(SeqTableError::InvalidId { table, id }),
        }
    }
}

/// Malformed table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeqTableError {
    /// Range end before start.
    #[error("{table}: inverted range [{start}, {end}]")]
    InvertedRange {
        /// Table name
        table: &'static str,
        /// Range start
        start: u64,
        /// Range end
        end: u64,
    },

    /// Two entries cover the same sequence id.
    #[error("{table}: range [{start}, {end}] overlaps another entry")]
    OverlappingRange {
        /// Table name
        table: &'static str,
        /// Range start
        start: u64,
        /// Range end
        end: u64,
    },

    /// Negative id other than the `-1` sentinel.
    #[error("{table}: invalid id {id} (only -1 may be negative)")]
    InvalidId {
        /// Table name
        table: &'static str,
        /// Offending id
        id: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct SeqRange<T> {
    start: u64,
    end: u64,
    value: T,
}

/// Immutable sorted range table.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqTable<T> {
    entries: Vec<SeqRange<T>>,
}

impl<T> Default for SeqTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Copy> SeqTable<T> {
    /// Build a table, rejecting inverted or overlapping ranges.
    pub fn build(
        table: &'static str,
        entries: impl IntoIterator<Item = (SeqSelector, T)>,
    ) -> Result<Self, SeqTableError> {
        let mut ranges = Vec::new();
        for (selector, value) in entries {
            let (start, end) = selector.bounds();
            if end < start {
                return Err(SeqTableError::InvertedRange { table, start, end });
            }
            ranges.push(SeqRange { start, end, value });
        }

        ranges.sort_by_key(|r| r.start);

        for pair in ranges.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(SeqTableError::OverlappingRange {
                    table,
                    start: pair[1].start,
                    end: pair[1].end,
                });
            }
        }

        Ok(Self { entries: ranges })
    }

    /// Value covering `seq_id`, if any.
    pub fn get(&self, seq_id: u64) -> Option<T> {
        let idx = self.entries.partition_point(|r| r.start <= seq_id);
        if idx == 0 {
            return None;
        }
        let range = &self.entries[idx - 1];
        (seq_id <= range.end).then_some(range.value)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Swath layout: which sequence ids belong to which sensing pass.
///
/// A swath may be made of several disjoint sub-ranges. Its final sequence id
/// (largest `end` over its sub-ranges) closes the swath.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwathTable {
    ranges: SeqTable<usize>,
    last_seq: Vec<u64>,
    lines: Vec<ManualTarget>,
}

impl SwathTable {
    /// Build from per-swath range lists and the per-swath line ids.
    ///
    /// `lines` may be empty when swaths only drive batching.
    pub fn build(
        swaths: &[Vec<SeqSelector>],
        lines: Vec<ManualTarget>,
    ) -> Result<Self, SeqTableError> {
        let entries = swaths
            .iter()
            .enumerate()
            .flat_map(|(swath, selectors)| selectors.iter().map(move |s| (*s, swath)));
        let ranges = SeqTable::build("swath_seq_ids", entries)?;

        let last_seq = swaths
            .iter()
            .map(|selectors| selectors.iter().map(|s| s.bounds().1).max().unwrap_or(0))
            .collect();

        Ok(Self {
            ranges,
            last_seq,
            lines,
        })
    }

    /// Swath index containing `seq_id`.
    #[inline]
    pub fn swath_of(&self, seq_id: u64) -> Option<usize> {
        self.ranges.get(seq_id)
    }

    /// Whether `seq_id` is the final id of its swath.
    pub fn is_swath_end(&self, seq_id: u64) -> bool {
        self.swath_of(seq_id)
            .and_then(|s| self.last_seq.get(s))
            .is_some_and(|last| *last == seq_id)
    }

    /// Manual line assignment for the swath containing `seq_id`.
    pub fn line_for(&self, seq_id: u64) -> Option<ManualTarget> {
        self.swath_of(seq_id).and_then(|s| self.lines.get(s).copied())
    }

    /// Number of swaths.
    pub fn len(&self) -> usize {
        self.last_seq.len()
    }

    /// Whether no swaths are configured.
    pub fn is_empty(&self) -> bool {
        self.last_seq.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SeqTable<ManualTarget> {
        SeqTable::build(
            "test",
            vec![
                (SeqSelector::Range([10, 19]), ManualTarget::Landmark(1)),
                (SeqSelector::Single(3), ManualTarget::Landmark(0)),
                (SeqSelector::Range([20, 25]), ManualTarget::Reject),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_sorted_ranges() {
        let t = table();
        assert_eq!(t.len(), 3);
        assert_eq!(t.get(3), Some(ManualTarget::Landmark(0)));
        assert_eq!(t.get(10), Some(ManualTarget::Landmark(1)));
        assert_eq!(t.get(19), Some(ManualTarget::Landmark(1)));
        assert_eq!(t.get(22), Some(ManualTarget::Reject));
    }

    #[test]
    fn test_lookup_gaps() {
        let t = table();
        assert_eq!(t.get(0), None);
        assert_eq!(t.get(4), None);
        assert_eq!(t.get(26), None);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = SeqTable::build("t", vec![(SeqSelector::Range([5, 2]), 0usize)]).unwrap_err();
        assert!(matches!(err, SeqTableError::InvertedRange { start: 5, end: 2, .. }));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = SeqTable::build(
            "t",
            vec![
                (SeqSelector::Range([0, 10]), 0usize),
                (SeqSelector::Single(10), 1usize),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SeqTableError::OverlappingRange { .. }));
    }

    #[test]
    fn test_sentinel_decoding() {
        assert_eq!(ManualTarget::from_config("t", -1), Ok(ManualTarget::Reject));
        assert_eq!(ManualTarget::from_config("t", 4), Ok(ManualTarget::Landmark(4)));
        assert!(ManualTarget::from_config("t", -2).is_err());
    }

    #[test]
    fn test_swath_table() {
        let swaths = vec![
            vec![SeqSelector::Range([0, 9]), SeqSelector::Range([20, 24])],
            vec![SeqSelector::Range([30, 39])],
        ];
        let table = SwathTable::build(
            &swaths,
            vec![ManualTarget::Landmark(0), ManualTarget::Landmark(1)],
        )
        .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.swath_of(5), Some(0));
        assert_eq!(table.swath_of(22), Some(0));
        assert_eq!(table.swath_of(15), None);
        assert!(table.is_swath_end(24));
        assert!(!table.is_swath_end(9));
        assert_eq!(table.line_for(31), Some(ManualTarget::Landmark(1)));
    }
}
