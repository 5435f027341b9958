//! Sequence implementation for the ring buffer
//!
//! The Sequence is used to track progress through the ring buffer and coordinate
//! between producers and consumers. It provides atomic operations while preventing
//! false sharing through careful memory layout.

use crate::disruptor::INITIAL_CURSOR_VALUE;
use std::sync::atomic::{AtomicI64, Ordering};

/// Cache line size for padding to prevent false sharing
const CACHE_LINE_SIZE: usize = 64;

/// A monotonic position counter that prevents false sharing
///
/// A sequence is mutated only by its owner: a producer's cursor or a
/// consumer's gating position. Everyone else only reads it.
/// [`INITIAL_CURSOR_VALUE`] means "never published" for cursors and
/// "not started" for consumers.
#[repr(align(64))]
pub struct Sequence {
    /// The actual sequence value
    value: AtomicI64,
    /// Padding to prevent false sharing (cache line size - size of AtomicI64)
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
}

impl Sequence {
    /// Create a new sequence with the given initial value
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: AtomicI64::new(initial_value),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicI64>()],
        }
    }

    /// Get the current sequence value
    #[inline]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Whether the sequence still holds [`INITIAL_CURSOR_VALUE`]
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.value() == INITIAL_CURSOR_VALUE
    }

    /// Store a new value
    ///
    /// Release ordering: everything written before this call is visible to a
    /// reader that observes the new value.
    #[inline]
    pub fn change_value(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Increment by one and return the new value
    #[inline]
    pub fn inc(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Add `increment` and return the new value
    #[inline]
    pub fn add(&self, increment: i64) -> i64 {
        self.value.fetch_add(increment, Ordering::AcqRel) + increment
    }

    /// Atomically replace `expected` with `new`
    ///
    /// Returns `true` if the swap happened. Spurious failures are not
    /// reported, so callers may use this outside of a retry loop.
    #[inline]
    pub fn compare_and_set(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_CURSOR_VALUE)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("value", &self.value())
            .finish()
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}
