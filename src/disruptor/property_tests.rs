//! Property-based tests for disruptor components
//!
//! These tests use proptest to verify properties that should hold for all inputs

use crate::disruptor::{
    ring_buffer::SingleProducerRingBuffer,
    sequence::Sequence,
    sequence_array::SequenceArray,
    sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer},
    wait_strategy::SpinWaitStrategy,
    MultiProducerPublisher, Publisher,
};
use crate::hazard::HazardPointerDomain;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Property tests for Sequence
mod sequence_properties {
    use super::*;

    proptest! {
        #[test]
        fn sequence_change_value_consistency(value in any::<i64>()) {
            let seq = Sequence::new(0);
            seq.change_value(value);
            prop_assert_eq!(seq.value(), value);
        }

        #[test]
        fn sequence_add_returns_new_value(initial in -1_000_000i64..1_000_000, delta in 1i64..1000) {
            let seq = Sequence::new(initial);
            prop_assert_eq!(seq.add(delta), initial + delta);
            prop_assert_eq!(seq.value(), initial + delta);
        }

        #[test]
        fn sequence_compare_and_set_failure(initial in any::<i64>(), wrong_expected in any::<i64>(), new_value in any::<i64>()) {
            prop_assume!(wrong_expected != initial);
            let seq = Sequence::new(initial);
            prop_assert!(!seq.compare_and_set(wrong_expected, new_value));
            prop_assert_eq!(seq.value(), initial);
        }
    }
}

/// Property tests for `SequenceArray`
mod sequence_array_properties {
    use super::*;

    proptest! {
        #[test]
        fn minimum_is_smallest_value(values in prop::collection::vec(0i64..1_000_000, 1..16)) {
            let sequences: Vec<_> = values.iter().map(|&v| Arc::new(Sequence::new(v))).collect();
            let array = SequenceArray::from_sequences(&sequences);
            let expected = values.iter().copied().min().unwrap();
            prop_assert_eq!(array.minimum_sequence(i64::MAX), expected);
        }

        #[test]
        fn remove_drops_only_the_target(count in 1usize..12, target in 0usize..12) {
            prop_assume!(target < count);
            let array = SequenceArray::build(count);
            let victim = Arc::clone(array.get(target).unwrap());

            let remaining = SequenceArray::remove_sequence(&array, &victim);

            prop_assert_eq!(remaining.len(), count - 1);
            prop_assert!(!remaining.contains(&victim));
            for (index, sequence) in array.iter().enumerate() {
                if index != target {
                    prop_assert!(remaining.contains(sequence));
                }
            }
        }

        #[test]
        fn add_then_remove_restores_members(count in 0usize..8) {
            let original = SequenceArray::build(count);
            let extra = Arc::new(Sequence::default());

            let grown = SequenceArray::add_sequences(Some(&original), &[Arc::clone(&extra)]);
            prop_assert_eq!(grown.len(), count + 1);

            let shrunk = SequenceArray::remove_sequence(&grown, &extra);
            prop_assert_eq!(shrunk.len(), count);
            for sequence in &original {
                prop_assert!(shrunk.contains(sequence));
            }
        }
    }
}

/// Property tests for `RingBuffer`
mod ring_buffer_properties {
    use super::*;

    proptest! {
        #[test]
        fn ring_buffer_size_is_power_of_two(size_power in 1u32..16) {
            let size = 1usize << size_power;
            let buffer = SingleProducerRingBuffer::<i64, SpinWaitStrategy>::with_domain(
                size,
                SpinWaitStrategy::new(),
                i64::default,
                Arc::new(HazardPointerDomain::new()),
            ).unwrap();
            prop_assert_eq!(buffer.buffer_size(), size);
            prop_assert_eq!(buffer.remaining_capacity(), size as i64);
        }

        #[test]
        fn ring_buffer_rejects_other_sizes(size in 3usize..10_000) {
            prop_assume!(!size.is_power_of_two());
            let result = SingleProducerRingBuffer::<i64, SpinWaitStrategy>::new(size, SpinWaitStrategy::new());
            prop_assert!(result.is_err());
        }
    }
}

/// Property tests for sequencers
mod sequencer_properties {
    use super::*;

    proptest! {
        #[test]
        fn single_producer_never_laps_consumer(
            size_power in 1u32..6,
            consumer_position in -1i64..64,
            batch in 1i64..4,
        ) {
            let size = 1usize << size_power;
            prop_assume!(batch <= size as i64);
            let sequencer = SingleProducerSequencer::new(size, Duration::ZERO);
            let consumer = Arc::new(Sequence::new(consumer_position));
            let gating = SequenceArray::from_sequences(&[consumer]);

            let mut highest = -1;
            while let Ok(claimed) = sequencer.try_next_n(&gating, batch) {
                prop_assert!(claimed - consumer_position <= size as i64);
                highest = claimed;
            }
            // Whatever was claimed, the consumer is lapped by at most one ring.
            prop_assert!(highest - consumer_position <= size as i64);
            prop_assert!(sequencer.remaining_capacity(&gating) < batch);
        }

        #[test]
        fn multi_producer_claims_are_contiguous(batches in prop::collection::vec(1i64..8, 1..20)) {
            let sequencer = MultiProducerSequencer::new(8, Duration::ZERO);
            let gating = SequenceArray::default();
            let mut expected = -1;
            for n in batches {
                expected += n;
                prop_assert_eq!(sequencer.next_n(&gating, n), expected);
            }
        }

        #[test]
        fn multi_producer_highest_published_stops_at_gap(published in prop::collection::vec(any::<bool>(), 1..16)) {
            let publisher = MultiProducerPublisher::with_buffer_size(16);
            for (sequence, &is_published) in published.iter().enumerate() {
                if is_published {
                    publisher.publish(sequence as i64);
                }
            }
            let expected = published.iter().position(|&p| !p).map_or(published.len() as i64 - 1, |gap| gap as i64 - 1);
            prop_assert_eq!(
                publisher.highest_published_sequence(0, published.len() as i64 - 1),
                expected
            );
        }
    }
}
