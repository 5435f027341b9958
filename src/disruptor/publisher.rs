//! Publisher Implementation
//!
//! A publisher makes a written slot visible to consumers. The single-producer
//! variant relies on strictly increasing publication and keeps one cursor;
//! the multi-producer variant tracks every slot separately because writers
//! can finish out of order.

use crate::disruptor::{is_power_of_two, Sequence, INITIAL_CURSOR_VALUE};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Sleep between availability polls once spinning has backed off completely
const AVAILABILITY_POLL: Duration = Duration::from_micros(1);

/// Makes claimed sequences visible to consumers
pub trait Publisher: Send + Sync + std::fmt::Debug {
    /// Create a publisher for a ring of `buffer_size` slots
    ///
    /// # Panics
    /// Panics if `buffer_size` is not a power of 2
    fn with_buffer_size(buffer_size: usize) -> Self
    where
        Self: Sized;

    /// Mark `sequence` as fully written
    fn publish(&self, sequence: i64);

    /// Mark every sequence in `low..=high` as fully written
    fn publish_range(&self, low: i64, high: i64) {
        for sequence in low..=high {
            self.publish(sequence);
        }
    }

    /// Whether `sequence` has been published
    fn is_available(&self, sequence: i64) -> bool;

    /// Block until `sequence` has been published
    fn ensure_available(&self, sequence: i64) {
        let backoff = Backoff::new();
        while !self.is_available(sequence) {
            if backoff.is_completed() {
                thread::sleep(AVAILABILITY_POLL);
            } else {
                backoff.snooze();
            }
        }
    }

    /// Highest sequence in `next_sequence..=available_sequence` such that
    /// every sequence up to it is published
    ///
    /// Returns `next_sequence - 1` when `next_sequence` itself is not yet
    /// published.
    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64;

    /// The sequence consumers should wait on
    ///
    /// `claim_cursor` is the sequencer's claim position, used when the
    /// publisher has no monotonic cursor of its own.
    fn progress_cursor(&self, claim_cursor: &Arc<Sequence>) -> Arc<Sequence>;
}

/// Publisher for a single producer writing in strictly increasing order
///
/// Because sequences are published in order, `cursor >= x` implies that `x`
/// and everything before it is fully written.
#[derive(Debug)]
pub struct SingleProducerPublisher {
    cursor: Arc<Sequence>,
}

impl SingleProducerPublisher {
    /// The published cursor
    pub fn cursor(&self) -> &Arc<Sequence> {
        &self.cursor
    }
}

impl Publisher for SingleProducerPublisher {
    fn with_buffer_size(buffer_size: usize) -> Self {
        assert!(is_power_of_two(buffer_size), "Buffer size must be a power of 2");
        Self {
            cursor: Arc::new(Sequence::default()),
        }
    }

    fn publish(&self, sequence: i64) {
        self.cursor.change_value(sequence);
    }

    fn publish_range(&self, _low: i64, high: i64) {
        self.publish(high);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let cursor = self.cursor.value();
        cursor != INITIAL_CURSOR_VALUE && sequence <= cursor
    }

    fn highest_published_sequence(&self, _next_sequence: i64, available_sequence: i64) -> i64 {
        available_sequence
    }

    fn progress_cursor(&self, _claim_cursor: &Arc<Sequence>) -> Arc<Sequence> {
        Arc::clone(&self.cursor)
    }
}

/// Publisher for concurrent producers that may finish out of order
///
/// Each slot index stores the lap (`sequence >> log2(buffer_size)`) at which
/// it was last published, which distinguishes the current occupant of an
/// index from a stale one left over from the previous lap.
#[derive(Debug)]
pub struct MultiProducerPublisher {
    /// Lap number of the last publication for each slot index
    available_buffer: Box<[AtomicI32]>,
    /// Index mask for fast modulo operations (buffer_size - 1)
    index_mask: i64,
    /// log2(buffer_size)
    index_shift: u32,
}

impl MultiProducerPublisher {
    fn calculate_index(&self, sequence: i64) -> usize {
        (sequence & self.index_mask) as usize
    }

    /// Lap number truncated to 32 bits; only compared for equality
    fn calculate_availability_flag(&self, sequence: i64) -> i32 {
        (sequence >> self.index_shift) as i32
    }
}

impl Publisher for MultiProducerPublisher {
    fn with_buffer_size(buffer_size: usize) -> Self {
        assert!(is_power_of_two(buffer_size), "Buffer size must be a power of 2");
        Self {
            available_buffer: (0..buffer_size).map(|_| AtomicI32::new(-1)).collect(),
            index_mask: (buffer_size - 1) as i64,
            index_shift: buffer_size.trailing_zeros(),
        }
    }

    fn publish(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].store(flag, Ordering::Release);
    }

    fn is_available(&self, sequence: i64) -> bool {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        self.available_buffer[index].load(Ordering::Acquire) == flag
    }

    fn ensure_available(&self, sequence: i64) {
        let index = self.calculate_index(sequence);
        let flag = self.calculate_availability_flag(sequence);
        let backoff = Backoff::new();
        loop {
            let current = self.available_buffer[index].load(Ordering::Acquire);
            if current == flag {
                return;
            }
            if backoff.is_completed() {
                thread::sleep(AVAILABILITY_POLL);
            } else {
                backoff.snooze();
            }
        }
    }

    fn highest_published_sequence(&self, next_sequence: i64, available_sequence: i64) -> i64 {
        let mut sequence = next_sequence;
        while sequence <= available_sequence {
            if !self.is_available(sequence) {
                return sequence - 1;
            }
            sequence += 1;
        }
        available_sequence
    }

    fn progress_cursor(&self, claim_cursor: &Arc<Sequence>) -> Arc<Sequence> {
        Arc::clone(claim_cursor)
    }
}
