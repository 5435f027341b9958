//! Sequencer Implementation
//!
//! Sequencers hand out sequence numbers to producers and keep them from
//! lapping the slowest consumer. A producer may claim sequence `s` only when
//! `s - buffer_size <= min(gating)`; the gating minimum is read through a
//! [`MinimumReader`] so the ring buffer decides how the gating snapshot is
//! protected.

use crate::disruptor::{
    is_power_of_two, DisruptorError, MinimumReader, Result, Sequence, INITIAL_CURSOR_VALUE,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Default sleep between gating polls while a producer is backpressured
pub const DEFAULT_PRODUCER_BACKOFF: Duration = Duration::from_micros(1);

/// Trait for sequencers that coordinate access to the ring buffer
///
/// `gating` is consulted whenever the cached wrap boundary does not already
/// prove that a claim is safe. A reader that reports no gating sequences
/// returns its `default` argument, which the sequencers pass as their own
/// position so that a ring without consumers never blocks.
pub trait Sequencer: Send + Sync + std::fmt::Debug {
    /// Whether the owning ring buffer may keep one hazard record cached for
    /// this sequencer's claims
    ///
    /// Only sound when a single thread claims at a time.
    const RETAINS_HAZARD_RECORD: bool;

    /// Create a sequencer for a ring of `buffer_size` slots
    ///
    /// # Arguments
    /// * `buffer_size` - Ring size, must be a power of 2
    /// * `backoff` - Sleep between gating polls while waiting for capacity
    ///
    /// # Panics
    /// Panics if `buffer_size` is not a power of 2
    fn new(buffer_size: usize, backoff: Duration) -> Self
    where
        Self: Sized;

    /// Get the buffer size
    fn buffer_size(&self) -> usize;

    /// The claim cursor: the highest sequence handed out so far
    fn cursor(&self) -> Arc<Sequence>;

    /// Claim the next sequence, blocking while the ring is full
    fn next<G: MinimumReader + ?Sized>(&self, gating: &G) -> i64 {
        self.next_n(gating, 1)
    }

    /// Claim the next `n` sequences, blocking while the ring is full
    ///
    /// # Returns
    /// The highest sequence claimed; the batch is `result - n + 1..=result`
    ///
    /// # Panics
    /// Panics if `n` is not in `1..=buffer_size`
    fn next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> i64;

    /// Claim the next sequence without blocking
    ///
    /// # Errors
    /// Returns [`DisruptorError::InsufficientCapacity`] if the ring is full
    fn try_next<G: MinimumReader + ?Sized>(&self, gating: &G) -> Result<i64> {
        self.try_next_n(gating, 1)
    }

    /// Claim the next `n` sequences without blocking
    ///
    /// # Errors
    /// Returns [`DisruptorError::InsufficientCapacity`] if fewer than `n`
    /// slots are free
    fn try_next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> Result<i64>;

    /// Whether `required` slots could be claimed right now
    fn has_available_capacity<G: MinimumReader + ?Sized>(&self, gating: &G, required: i64)
        -> bool;

    /// Number of slots that are free to claim
    fn remaining_capacity<G: MinimumReader + ?Sized>(&self, gating: &G) -> i64;

    /// Move the claim cursor to `sequence`
    ///
    /// Only meaningful before any consumer is attached.
    fn claim(&self, sequence: i64);
}

fn check_batch_size(n: i64, buffer_size: usize) {
    assert!(
        n >= 1 && n <= buffer_size as i64,
        "n must be > 0 and <= buffer size, got: {n}"
    );
}

/// Sequencer for a single producer thread
///
/// The claim cursor is only written by the owning producer, so claims are a
/// plain read-modify-store. The last observed gating minimum is cached and
/// the gating sequences are only re-read when a claim would cross it.
#[derive(Debug)]
pub struct SingleProducerSequencer {
    buffer_size: usize,
    backoff: Duration,
    next_value: Arc<Sequence>,
    cached_value: Sequence,
}

impl Sequencer for SingleProducerSequencer {
    const RETAINS_HAZARD_RECORD: bool = true;

    fn new(buffer_size: usize, backoff: Duration) -> Self {
        assert!(is_power_of_two(buffer_size), "Buffer size must be a power of 2");
        Self {
            buffer_size,
            backoff,
            next_value: Arc::new(Sequence::new(INITIAL_CURSOR_VALUE)),
            cached_value: Sequence::new(INITIAL_CURSOR_VALUE),
        }
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.next_value)
    }

    fn next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> i64 {
        check_batch_size(n, self.buffer_size);

        let next_value = self.next_value.value();
        let next_sequence = next_value + n;
        let wrap_point = next_sequence - self.buffer_size as i64;
        let cached_gating_sequence = self.cached_value.value();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            let mut min_sequence = gating.minimum_sequence(next_value);
            while wrap_point > min_sequence {
                thread::sleep(self.backoff);
                min_sequence = gating.minimum_sequence(next_value);
            }
            self.cached_value.change_value(min_sequence);
        }

        self.next_value.change_value(next_sequence);
        next_sequence
    }

    fn try_next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> Result<i64> {
        check_batch_size(n, self.buffer_size);

        if !self.has_available_capacity(gating, n) {
            return Err(DisruptorError::InsufficientCapacity);
        }

        let next_sequence = self.next_value.value() + n;
        self.next_value.change_value(next_sequence);
        Ok(next_sequence)
    }

    fn has_available_capacity<G: MinimumReader + ?Sized>(
        &self,
        gating: &G,
        required: i64,
    ) -> bool {
        let next_value = self.next_value.value();
        let wrap_point = next_value + required - self.buffer_size as i64;
        let cached_gating_sequence = self.cached_value.value();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > next_value {
            let min_sequence = gating.minimum_sequence(next_value);
            self.cached_value.change_value(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }

    fn remaining_capacity<G: MinimumReader + ?Sized>(&self, gating: &G) -> i64 {
        let next_value = self.next_value.value();
        let consumed = gating.minimum_sequence(next_value);
        self.buffer_size as i64 - (next_value - consumed)
    }

    fn claim(&self, sequence: i64) {
        self.next_value.change_value(sequence);
    }
}

/// Sequencer for concurrent producers
///
/// Claims race on the shared cursor with compare-and-set. The gating cache is
/// shared between producers; a stale value only causes an extra gating read.
#[derive(Debug)]
pub struct MultiProducerSequencer {
    buffer_size: usize,
    backoff: Duration,
    cursor: Arc<Sequence>,
    gating_sequence_cache: Sequence,
}

impl Sequencer for MultiProducerSequencer {
    const RETAINS_HAZARD_RECORD: bool = false;

    fn new(buffer_size: usize, backoff: Duration) -> Self {
        assert!(is_power_of_two(buffer_size), "Buffer size must be a power of 2");
        Self {
            buffer_size,
            backoff,
            cursor: Arc::new(Sequence::new(INITIAL_CURSOR_VALUE)),
            gating_sequence_cache: Sequence::new(INITIAL_CURSOR_VALUE),
        }
    }

    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn cursor(&self) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }

    fn next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> i64 {
        check_batch_size(n, self.buffer_size);

        loop {
            let current = self.cursor.value();
            let next = current + n;
            let wrap_point = next - self.buffer_size as i64;
            let cached_gating_sequence = self.gating_sequence_cache.value();

            if wrap_point > cached_gating_sequence || cached_gating_sequence > current {
                let gating_sequence = gating.minimum_sequence(current);
                if wrap_point > gating_sequence {
                    thread::sleep(self.backoff);
                    continue;
                }
                self.gating_sequence_cache.change_value(gating_sequence);
            } else if self.cursor.compare_and_set(current, next) {
                return next;
            }
        }
    }

    fn try_next_n<G: MinimumReader + ?Sized>(&self, gating: &G, n: i64) -> Result<i64> {
        check_batch_size(n, self.buffer_size);

        loop {
            let current = self.cursor.value();
            let next = current + n;

            if !self.has_capacity_at(gating, current, n) {
                return Err(DisruptorError::InsufficientCapacity);
            }

            if self.cursor.compare_and_set(current, next) {
                return Ok(next);
            }
        }
    }

    fn has_available_capacity<G: MinimumReader + ?Sized>(
        &self,
        gating: &G,
        required: i64,
    ) -> bool {
        self.has_capacity_at(gating, self.cursor.value(), required)
    }

    fn remaining_capacity<G: MinimumReader + ?Sized>(&self, gating: &G) -> i64 {
        let produced = self.cursor.value();
        let consumed = gating.minimum_sequence(produced);
        self.buffer_size as i64 - (produced - consumed)
    }

    fn claim(&self, sequence: i64) {
        self.cursor.change_value(sequence);
    }
}

impl MultiProducerSequencer {
    fn has_capacity_at<G: MinimumReader + ?Sized>(
        &self,
        gating: &G,
        cursor_value: i64,
        required: i64,
    ) -> bool {
        let wrap_point = cursor_value + required - self.buffer_size as i64;
        let cached_gating_sequence = self.gating_sequence_cache.value();

        if wrap_point > cached_gating_sequence || cached_gating_sequence > cursor_value {
            let min_sequence = gating.minimum_sequence(cursor_value);
            self.gating_sequence_cache.change_value(min_sequence);
            if wrap_point > min_sequence {
                return false;
            }
        }
        true
    }
}
