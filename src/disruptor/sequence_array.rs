//! Immutable snapshot of shared sequence handles
//!
//! A [`SequenceArray`] is never edited in place. Adding or removing a handle
//! produces a new array, which lets the ring buffer publish the set of gating
//! sequences through a single atomic pointer and retire the superseded
//! snapshot through the hazard-pointer domain.

use crate::disruptor::{Sequence, INITIAL_CURSOR_VALUE};
use std::sync::Arc;

/// Something that can report the lowest position among a set of sequences
///
/// Producers consult a reader before claiming a slot; wait strategies consult
/// one to learn how far a consumer may advance.
pub trait MinimumReader {
    /// Lowest current value, or `default` when there is nothing to read
    ///
    /// Returns [`INITIAL_CURSOR_VALUE`] as soon as any tracked sequence is
    /// still unset.
    fn minimum_sequence(&self, default: i64) -> i64;
}

/// Fixed-size, immutable list of shared sequence handles
#[derive(Debug, Clone, Default)]
pub struct SequenceArray {
    sequences: Box<[Arc<Sequence>]>,
}

impl SequenceArray {
    /// Allocate an array of `size` fresh, unset sequences
    pub fn build(size: usize) -> Self {
        Self {
            sequences: (0..size).map(|_| Arc::new(Sequence::default())).collect(),
        }
    }

    /// Snapshot the given handles in order
    pub fn from_sequences(sequences: &[Arc<Sequence>]) -> Self {
        Self {
            sequences: sequences.to_vec().into_boxed_slice(),
        }
    }

    /// New array holding `orig`'s handles followed by `additions`
    pub fn add_sequences(orig: Option<&SequenceArray>, additions: &[Arc<Sequence>]) -> Self {
        let existing = orig.map_or(&[][..], |array| &array.sequences[..]);
        let mut sequences = Vec::with_capacity(existing.len() + additions.len());
        sequences.extend_from_slice(existing);
        sequences.extend_from_slice(additions);
        Self {
            sequences: sequences.into_boxed_slice(),
        }
    }

    /// New array without any handle identical to `target`
    ///
    /// Handles are compared by identity, not by value. Removing a handle that
    /// is not present yields an array equal to `orig`.
    pub fn remove_sequence(orig: &SequenceArray, target: &Arc<Sequence>) -> Self {
        Self {
            sequences: orig
                .sequences
                .iter()
                .filter(|sequence| !Arc::ptr_eq(sequence, target))
                .cloned()
                .collect(),
        }
    }

    /// Independent copy sharing the same handles
    pub fn copy(orig: &SequenceArray) -> Self {
        orig.clone()
    }

    /// Number of handles in the snapshot
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Whether the snapshot holds no handles
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Handle at `index`
    pub fn get(&self, index: usize) -> Option<&Arc<Sequence>> {
        self.sequences.get(index)
    }

    /// Whether `sequence` (by identity) is part of the snapshot
    pub fn contains(&self, sequence: &Arc<Sequence>) -> bool {
        self.sequences.iter().any(|s| Arc::ptr_eq(s, sequence))
    }

    /// Iterate over the handles
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<Sequence>> {
        self.sequences.iter()
    }

    /// All handles as a slice
    pub fn as_slice(&self) -> &[Arc<Sequence>] {
        &self.sequences
    }

    /// Minimum value across all handles, starting from `minimum`
    ///
    /// An unset handle means a consumer that has not read anything yet, so the
    /// result is [`INITIAL_CURSOR_VALUE`] regardless of the other handles.
    pub fn minimum_sequence(&self, mut minimum: i64) -> i64 {
        for sequence in self.sequences.iter() {
            let value = sequence.value();
            if value == INITIAL_CURSOR_VALUE {
                return INITIAL_CURSOR_VALUE;
            }
            minimum = minimum.min(value);
        }
        minimum
    }
}

impl MinimumReader for SequenceArray {
    fn minimum_sequence(&self, default: i64) -> i64 {
        SequenceArray::minimum_sequence(self, default)
    }
}

impl MinimumReader for Sequence {
    fn minimum_sequence(&self, _default: i64) -> i64 {
        self.value()
    }
}

impl MinimumReader for [Arc<Sequence>] {
    fn minimum_sequence(&self, default: i64) -> i64 {
        let mut minimum = default;
        for sequence in self {
            let value = sequence.value();
            if value == INITIAL_CURSOR_VALUE {
                return INITIAL_CURSOR_VALUE;
            }
            minimum = minimum.min(value);
        }
        minimum
    }
}

impl<'a> IntoIterator for &'a SequenceArray {
    type Item = &'a Arc<Sequence>;
    type IntoIter = std::slice::Iter<'a, Arc<Sequence>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_allocates_unset_handles() {
        let array = SequenceArray::build(3);
        assert_eq!(array.len(), 3);
        assert!(array.iter().all(|s| s.is_unset()));

        let empty = SequenceArray::build(0);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_add_sequences_appends_after_original() {
        let first = Arc::new(Sequence::new(1));
        let second = Arc::new(Sequence::new(2));

        let original = SequenceArray::add_sequences(None, &[first.clone()]);
        let extended = SequenceArray::add_sequences(Some(&original), &[second.clone()]);

        assert_eq!(original.len(), 1);
        assert_eq!(extended.len(), 2);
        assert!(Arc::ptr_eq(extended.get(0).unwrap(), &first));
        assert!(Arc::ptr_eq(extended.get(1).unwrap(), &second));
    }

    #[test]
    fn test_add_then_remove_round_trip() {
        let handle = Arc::new(Sequence::default());
        let empty = SequenceArray::build(0);

        let added = SequenceArray::add_sequences(Some(&empty), &[handle.clone()]);
        assert_eq!(added.len(), 1);

        let removed = SequenceArray::remove_sequence(&added, &handle);
        assert_eq!(removed.len(), 0);
    }

    #[test]
    fn test_remove_keeps_non_matching_handles() {
        let keep_a = Arc::new(Sequence::new(1));
        let drop_me = Arc::new(Sequence::new(2));
        let keep_b = Arc::new(Sequence::new(3));
        let array =
            SequenceArray::from_sequences(&[keep_a.clone(), drop_me.clone(), keep_b.clone()]);

        let result = SequenceArray::remove_sequence(&array, &drop_me);

        assert_eq!(result.len(), 2);
        assert!(result.contains(&keep_a));
        assert!(result.contains(&keep_b));
        assert!(!result.contains(&drop_me));
    }

    #[test]
    fn test_remove_absent_handle_is_noop() {
        let present = Arc::new(Sequence::new(1));
        let absent = Arc::new(Sequence::new(1));
        let array = SequenceArray::from_sequences(&[present.clone()]);

        let result = SequenceArray::remove_sequence(&array, &absent);

        assert_eq!(result.len(), 1);
        assert!(result.contains(&present));
    }

    #[test]
    fn test_remove_matches_by_identity_not_value() {
        let a = Arc::new(Sequence::new(7));
        let b = Arc::new(Sequence::new(7));
        let array = SequenceArray::from_sequences(&[a.clone(), b.clone()]);

        let result = SequenceArray::remove_sequence(&array, &a);

        assert_eq!(result.len(), 1);
        assert!(result.contains(&b));
    }

    #[test]
    fn test_copy_shares_handles() {
        let handle = Arc::new(Sequence::new(5));
        let array = SequenceArray::from_sequences(&[handle.clone()]);
        let copy = SequenceArray::copy(&array);

        handle.change_value(9);
        assert_eq!(copy.get(0).unwrap().value(), 9);
    }

    #[test]
    fn test_minimum_sequence() {
        let array = SequenceArray::from_sequences(&[
            Arc::new(Sequence::new(10)),
            Arc::new(Sequence::new(4)),
            Arc::new(Sequence::new(8)),
        ]);
        assert_eq!(array.minimum_sequence(i64::MAX), 4);
        assert_eq!(array.minimum_sequence(2), 2);
        assert_eq!(SequenceArray::build(0).minimum_sequence(42), 42);
    }

    #[test]
    fn test_minimum_sequence_short_circuits_on_unset() {
        let array = SequenceArray::from_sequences(&[
            Arc::new(Sequence::new(10)),
            Arc::new(Sequence::default()),
        ]);
        assert_eq!(array.minimum_sequence(i64::MAX), INITIAL_CURSOR_VALUE);
    }

    #[test]
    fn test_slice_reader_matches_array_reader() {
        let handles = vec![Arc::new(Sequence::new(3)), Arc::new(Sequence::new(6))];
        let array = SequenceArray::from_sequences(&handles);
        assert_eq!(
            MinimumReader::minimum_sequence(&handles[..], 100),
            MinimumReader::minimum_sequence(&array, 100)
        );
    }
}
