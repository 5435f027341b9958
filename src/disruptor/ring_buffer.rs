//! Ring Buffer Implementation
//!
//! The ring buffer pre-allocates its slots and composes a sequencer, a
//! publisher and a wait strategy. Consumers register gating sequences that
//! producers must not lap; the set of gating sequences is an immutable
//! [`SequenceArray`] snapshot replaced by compare-and-swap, and producers read
//! it under a hazard pointer so a concurrent replacement never frees a
//! snapshot that is still being scanned.

use crate::config::RingBufferConfig;
use crate::disruptor::sequencer::DEFAULT_PRODUCER_BACKOFF;
use crate::disruptor::{
    is_power_of_two, BlockingWaitStrategy, DisruptorError, MinimumReader, MultiProducerPublisher,
    MultiProducerSequencer, ProcessingSequenceBarrier, Publisher, Result, Sequence, SequenceArray,
    Sequencer, SingleProducerPublisher, SingleProducerSequencer, WaitStrategy,
};
use crate::hazard::{HazardPointerDomain, HazardRecord, HpRecord};
use crate::internal_debug;
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Ring buffer claimed by one producer thread at a time
pub type SingleProducerRingBuffer<T, W = BlockingWaitStrategy> =
    RingBuffer<T, W, SingleProducerSequencer, SingleProducerPublisher>;

/// Ring buffer shared by any number of producer threads
pub type MultiProducerRingBuffer<T, W = BlockingWaitStrategy> =
    RingBuffer<T, W, MultiProducerSequencer, MultiProducerPublisher>;

/// Bounded, pre-allocated circular buffer of `T`
///
/// # Type Parameters
/// * `T` - The slot type
/// * `W` - The wait strategy consumers block with
/// * `S` - The sequencer producers claim with
/// * `P` - The publisher that makes claimed slots visible
///
/// The producing side calls [`next`](Self::next), writes the slot through
/// [`preallocated`](Self::preallocated) and calls [`publish`](Self::publish),
/// or does all three with [`publish_with`](Self::publish_with). The consuming
/// side waits on a barrier from [`new_barrier`](Self::new_barrier), reads
/// with [`get`](Self::get) and advances its gating sequence.
pub struct RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    /// Slots, accessed through `UnsafeCell` under sequence ordering
    slots: Box<[UnsafeCell<T>]>,
    /// Mask for fast modulo operations (buffer_size - 1)
    index_mask: i64,
    sequencer: S,
    publisher: Arc<P>,
    wait_strategy: Arc<W>,
    /// Current gating snapshot, null when no sequence was ever attached
    gating_sequences: AtomicPtr<SequenceArray>,
    domain: Arc<HazardPointerDomain>,
    /// Hazard record kept between claims by a single-producer ring
    cached_record: AtomicPtr<HpRecord>,
}

impl<T, W, S, P> RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    /// Create a ring buffer whose slots start as `T::default()`
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn new(buffer_size: usize, wait_strategy: W) -> Result<Self>
    where
        T: Default,
    {
        Self::with_factory(buffer_size, wait_strategy, T::default)
    }

    /// Create a ring buffer whose slots are produced by `factory`
    ///
    /// Uses the process-wide hazard-pointer domain.
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn with_factory<F>(buffer_size: usize, wait_strategy: W, factory: F) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        Self::with_domain(
            buffer_size,
            wait_strategy,
            factory,
            HazardPointerDomain::global(),
        )
    }

    /// Create a ring buffer that protects its gating snapshots with `domain`
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidBufferSize` if buffer_size is not a power of 2
    pub fn with_domain<F>(
        buffer_size: usize,
        wait_strategy: W,
        factory: F,
        domain: Arc<HazardPointerDomain>,
    ) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        Self::build(
            buffer_size,
            wait_strategy,
            factory,
            domain,
            DEFAULT_PRODUCER_BACKOFF,
        )
    }

    fn build<F>(
        buffer_size: usize,
        wait_strategy: W,
        mut factory: F,
        domain: Arc<HazardPointerDomain>,
        producer_backoff: Duration,
    ) -> Result<Self>
    where
        F: FnMut() -> T,
    {
        if !is_power_of_two(buffer_size) {
            return Err(DisruptorError::InvalidBufferSize(buffer_size));
        }

        let slots: Box<[UnsafeCell<T>]> = (0..buffer_size)
            .map(|_| UnsafeCell::new(factory()))
            .collect();

        internal_debug!(buffer_size, "ring buffer created");

        Ok(Self {
            slots,
            index_mask: (buffer_size - 1) as i64,
            sequencer: S::new(buffer_size, producer_backoff),
            publisher: Arc::new(P::with_buffer_size(buffer_size)),
            wait_strategy: Arc::new(wait_strategy),
            gating_sequences: AtomicPtr::new(ptr::null_mut()),
            domain,
            cached_record: AtomicPtr::new(ptr::null_mut()),
        })
    }

    fn slot(&self, sequence: i64) -> *mut T {
        let index = (sequence & self.index_mask) as usize;
        // SAFETY: the index mask keeps the index below `slots.len()`.
        unsafe { self.slots.get_unchecked(index) }.get()
    }

    /// Get the slot for a published sequence, waiting until it is published
    ///
    /// # Arguments
    /// * `sequence` - The sequence number of the slot
    ///
    /// The returned reference is valid until the slot is reused, which
    /// happens only after every gating sequence has moved past `sequence`.
    pub fn get(&self, sequence: i64) -> &T {
        self.publisher.ensure_available(sequence);
        // SAFETY: the slot is published and producers will not claim it
        // again until the gating sequences pass it.
        unsafe { &*self.slot(sequence) }
    }

    /// Get the slot for `sequence` if it has been published
    pub fn try_get(&self, sequence: i64) -> Option<&T> {
        if self.publisher.is_available(sequence) {
            // SAFETY: as for `get`.
            Some(unsafe { &*self.slot(sequence) })
        } else {
            None
        }
    }

    /// Mutable access to a claimed slot before it is published
    ///
    /// # Safety
    /// `sequence` must have been claimed by the caller through
    /// [`next`](Self::next) or a sibling and not yet published, and no other
    /// reference to the slot may be alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn preallocated(&self, sequence: i64) -> &mut T {
        &mut *self.slot(sequence)
    }

    /// Iterate mutably over the claimed range `start..=end`
    ///
    /// # Safety
    /// The caller must have claimed the whole range and not yet published any
    /// of it.
    pub unsafe fn batch_iter_mut(&self, start: i64, end: i64) -> BatchIterMut<'_, T, W, S, P> {
        BatchIterMut {
            ring_buffer: self,
            current: start,
            last: end,
        }
    }

    /// Claim the next sequence, blocking while the ring is full
    pub fn next(&self) -> i64 {
        self.with_gating(|gating| self.sequencer.next(gating))
    }

    /// Claim the next `n` sequences, blocking while the ring is full
    ///
    /// # Returns
    /// The highest sequence claimed
    ///
    /// # Panics
    /// Panics if `n` is not in `1..=buffer_size`
    pub fn next_n(&self, n: i64) -> i64 {
        self.with_gating(|gating| self.sequencer.next_n(gating, n))
    }

    /// Claim the next sequence without blocking
    ///
    /// # Errors
    /// Returns `DisruptorError::InsufficientCapacity` if the ring is full
    pub fn try_next(&self) -> Result<i64> {
        self.with_gating(|gating| self.sequencer.try_next(gating))
    }

    /// Claim the next `n` sequences without blocking
    ///
    /// # Errors
    /// Returns `DisruptorError::InsufficientCapacity` if fewer than `n` slots
    /// are free
    pub fn try_next_n(&self, n: i64) -> Result<i64> {
        self.with_gating(|gating| self.sequencer.try_next_n(gating, n))
    }

    /// Publish a claimed sequence and wake blocked consumers
    pub fn publish(&self, sequence: i64) {
        self.publisher.publish(sequence);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Publish every sequence in `low..=high` and wake blocked consumers
    pub fn publish_range(&self, low: i64, high: i64) {
        self.publisher.publish_range(low, high);
        self.wait_strategy.signal_all_when_blocking();
    }

    /// Claim a slot, let `translate` fill it and publish it
    ///
    /// # Returns
    /// The published sequence
    pub fn publish_with<F>(&self, translate: F) -> i64
    where
        F: FnOnce(&mut T),
    {
        let sequence = self.next();
        // SAFETY: `sequence` was just claimed and is not yet published.
        translate(unsafe { self.preallocated(sequence) });
        self.publish(sequence);
        sequence
    }

    /// Like [`publish_with`](Self::publish_with) but fails instead of
    /// blocking when the ring is full
    ///
    /// # Errors
    /// Returns `DisruptorError::InsufficientCapacity` if the ring is full;
    /// `translate` is not called in that case
    pub fn try_publish_with<F>(&self, translate: F) -> Result<i64>
    where
        F: FnOnce(&mut T),
    {
        let sequence = self.try_next()?;
        // SAFETY: `sequence` was just claimed and is not yet published.
        translate(unsafe { self.preallocated(sequence) });
        self.publish(sequence);
        Ok(sequence)
    }

    /// Claim `n` slots, fill each with `translate` and publish them together
    ///
    /// # Returns
    /// The highest published sequence
    pub fn publish_batch_with<F>(&self, n: i64, mut translate: F) -> i64
    where
        F: FnMut(i64, &mut T),
    {
        let high = self.next_n(n);
        let low = high - n + 1;
        // SAFETY: `low..=high` was just claimed and is not yet published.
        for (sequence, slot) in (low..=high).zip(unsafe { self.batch_iter_mut(low, high) }) {
            translate(sequence, slot);
        }
        self.publish_range(low, high);
        high
    }

    /// Claim a slot, store `value` in it and publish it
    pub fn publish_and_assign(&self, value: T) -> i64 {
        self.publish_with(|slot| *slot = value)
    }

    /// Whether `sequence` has been published
    pub fn is_available(&self, sequence: i64) -> bool {
        self.publisher.is_available(sequence)
    }

    /// Whether `required` slots could be claimed right now
    pub fn has_available_capacity(&self, required: i64) -> bool {
        self.with_gating(|gating| self.sequencer.has_available_capacity(gating, required))
    }

    /// Number of slots that are free to claim
    pub fn remaining_capacity(&self) -> i64 {
        self.with_gating(|gating| self.sequencer.remaining_capacity(gating))
    }

    /// Attach a consumer sequence that producers must not lap
    pub fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.add_gating_sequences(&[sequence]);
    }

    /// Attach several consumer sequences in one snapshot replacement
    pub fn add_gating_sequences(&self, sequences: &[Arc<Sequence>]) {
        self.update_gating(|current| Some(SequenceArray::add_sequences(current, sequences)));
        internal_debug!(added = sequences.len(), "gating sequences attached");
    }

    /// Detach a consumer sequence
    ///
    /// # Returns
    /// `false` if `sequence` was not attached, in which case the snapshot is
    /// left untouched
    pub fn remove_gating_sequence(&self, sequence: &Arc<Sequence>) -> bool {
        let removed = self.update_gating(|current| {
            let current = current?;
            if current.contains(sequence) {
                Some(SequenceArray::remove_sequence(current, sequence))
            } else {
                None
            }
        });
        if removed {
            internal_debug!(%sequence, "gating sequence detached");
        }
        removed
    }

    /// A copy of the attached gating sequences
    pub fn gating_sequences(&self) -> SequenceArray {
        self.with_gating_snapshot(|snapshot| snapshot.cloned().unwrap_or_default())
    }

    /// Minimum of the attached gating sequences, `None` if none are attached
    pub fn minimum_gating_sequence(&self) -> Option<i64> {
        self.with_gating_snapshot(|snapshot| {
            snapshot
                .filter(|array| !array.is_empty())
                .map(|array| array.minimum_sequence(i64::MAX))
        })
    }

    /// Move the cursor to `sequence` as if everything up to it was published
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidState` if gating sequences are attached
    pub fn initialise_to(&self, sequence: i64) -> Result<()> {
        let attached = self.with_gating_snapshot(|snapshot| snapshot.is_some_and(|a| !a.is_empty()));
        if attached {
            return Err(DisruptorError::InvalidState(
                "cursor can only be initialised before gating sequences are attached".to_string(),
            ));
        }
        self.sequencer.claim(sequence);
        self.publisher.publish(sequence);
        Ok(())
    }

    /// Create a barrier for a consumer that follows `dependents`
    ///
    /// With no dependents the consumer follows the producer cursor.
    pub fn new_barrier(&self, dependents: &[Arc<Sequence>]) -> ProcessingSequenceBarrier<W, P> {
        ProcessingSequenceBarrier::new(
            Arc::clone(&self.wait_strategy),
            self.progress_cursor(),
            SequenceArray::from_sequences(dependents),
            Arc::clone(&self.publisher),
        )
    }

    fn progress_cursor(&self) -> Arc<Sequence> {
        self.publisher.progress_cursor(&self.sequencer.cursor())
    }

    /// The producer cursor consumers wait on
    pub fn cursor(&self) -> i64 {
        self.progress_cursor().value()
    }

    /// Get the size of the buffer
    pub fn buffer_size(&self) -> usize {
        self.slots.len()
    }

    pub fn wait_strategy(&self) -> &Arc<W> {
        &self.wait_strategy
    }

    /// The domain protecting this ring's gating snapshots
    pub fn hazard_domain(&self) -> &Arc<HazardPointerDomain> {
        &self.domain
    }

    /// Run `f` against the live gating snapshot, re-secured on every read
    fn with_gating<R>(&self, f: impl FnOnce(&SecuredGating<'_, '_>) -> R) -> R {
        let record = self.acquire_record();
        let result = f(&SecuredGating {
            source: &self.gating_sequences,
            record: &record,
        });
        self.release_record(record);
        result
    }

    /// Run `f` against one protected read of the gating snapshot
    fn with_gating_snapshot<R>(&self, f: impl FnOnce(Option<&SequenceArray>) -> R) -> R {
        let record = self.acquire_record();
        let snapshot = record.secure(&self.gating_sequences);
        // SAFETY: `snapshot` is protected by `record` until it is released
        // below, and snapshots are never mutated after publication.
        let result = f(unsafe { snapshot.as_ref() });
        self.release_record(record);
        result
    }

    fn acquire_record(&self) -> HazardRecord<'_> {
        if S::RETAINS_HAZARD_RECORD {
            let cached = self.cached_record.swap(ptr::null_mut(), Ordering::Acquire);
            if let Some(cached) = NonNull::new(cached) {
                // SAFETY: cached records come from `into_raw` on a record of
                // `self.domain`, which this ring keeps alive, and the swap
                // above took sole ownership.
                return unsafe { HazardRecord::from_raw(cached) };
            }
        }
        self.domain.acquire()
    }

    fn release_record(&self, record: HazardRecord<'_>) {
        if !S::RETAINS_HAZARD_RECORD {
            record.release_record();
            return;
        }

        record.release_ptr();
        let raw = record.into_raw();
        if self
            .cached_record
            .compare_exchange(ptr::null_mut(), raw.as_ptr(), Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            // SAFETY: `raw` came from `into_raw` just above and was not stored.
            drop(unsafe { HazardRecord::from_raw(raw) });
        }
    }

    /// Replace the gating snapshot with `edit(current)` by compare-and-swap
    ///
    /// Returns `false` without touching the snapshot when `edit` returns
    /// `None`. The replaced snapshot is retired to the hazard domain.
    fn update_gating<F>(&self, edit: F) -> bool
    where
        F: Fn(Option<&SequenceArray>) -> Option<SequenceArray>,
    {
        let record = self.domain.acquire();
        let previous = loop {
            let current = record.secure(&self.gating_sequences);
            // SAFETY: `current` is protected by `record`.
            let Some(replacement) = edit(unsafe { current.as_ref() }) else {
                return false;
            };
            let replacement = Box::into_raw(Box::new(replacement));
            match self.gating_sequences.compare_exchange(
                current,
                replacement,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(previous) => break previous,
                // SAFETY: `replacement` was never published.
                Err(_) => drop(unsafe { Box::from_raw(replacement) }),
            }
        };
        record.release_record();

        if !previous.is_null() {
            // SAFETY: the successful swap unlinked `previous`, so this is its
            // only retirement, and it was allocated by `Box::into_raw`.
            unsafe {
                self.domain
                    .retire_ptr(previous, |p: *mut SequenceArray| drop(Box::from_raw(p)));
            }
        }
        true
    }
}

impl<T, S, P> RingBuffer<T, Box<dyn WaitStrategy>, S, P>
where
    T: Default,
    S: Sequencer,
    P: Publisher,
{
    /// Create a ring buffer from a validated configuration
    ///
    /// # Errors
    /// Returns `DisruptorError::InvalidConfig` or
    /// `DisruptorError::InvalidBufferSize` for a bad configuration
    pub fn from_config(config: &RingBufferConfig, domain: Arc<HazardPointerDomain>) -> Result<Self> {
        config.validate()?;
        Self::build(
            config.buffer_size,
            config.wait_strategy.build(),
            T::default,
            domain,
            config.producer_backoff(),
        )
    }
}

impl<T, W, S, P> Drop for RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    fn drop(&mut self) {
        if let Some(cached) = NonNull::new(*self.cached_record.get_mut()) {
            // SAFETY: the record came from `into_raw` and the domain is still
            // alive through `self.domain`.
            drop(unsafe { HazardRecord::from_raw(cached) });
        }

        // Every reader borrows the ring, so nothing can hold this snapshot.
        let gating = std::mem::replace(self.gating_sequences.get_mut(), ptr::null_mut());
        if !gating.is_null() {
            // SAFETY: allocated by `Box::into_raw` in `update_gating`.
            drop(unsafe { Box::from_raw(gating) });
        }
    }
}

impl<T, W, S, P> std::fmt::Debug for RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("buffer_size", &self.buffer_size())
            .field("cursor", &self.cursor())
            .field("sequencer", &self.sequencer)
            .field("wait_strategy", &self.wait_strategy)
            .finish()
    }
}

// SAFETY: slot access is coordinated by the sequencer and publisher: a slot
// is written only by the producer that claimed it and read only after it is
// published. The gating snapshot is shared through hazard pointers.
unsafe impl<T: Send + Sync, W, S, P> Send for RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
}

unsafe impl<T: Send + Sync, W, S, P> Sync for RingBuffer<T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
}

/// Gating reader that re-secures the live snapshot on every poll
///
/// A producer spinning on backpressure therefore observes sequences that
/// are attached or detached while it waits.
struct SecuredGating<'a, 'r> {
    source: &'a AtomicPtr<SequenceArray>,
    record: &'a HazardRecord<'r>,
}

impl MinimumReader for SecuredGating<'_, '_> {
    fn minimum_sequence(&self, default: i64) -> i64 {
        let snapshot = self.record.secure(self.source);
        // SAFETY: `snapshot` stays protected by the record until the next
        // `secure` or until the record is released.
        match unsafe { snapshot.as_ref() } {
            Some(array) => array.minimum_sequence(default),
            None => default,
        }
    }
}

/// Iterator for batch mutable access to claimed slots
pub struct BatchIterMut<'a, T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    ring_buffer: &'a RingBuffer<T, W, S, P>,
    current: i64,
    last: i64,
}

impl<T, W, S, P> BatchIterMut<'_, T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    fn remaining(&self) -> usize {
        (self.last - self.current + 1).max(0) as usize
    }
}

impl<'a, T, W, S, P> Iterator for BatchIterMut<'a, T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
    type Item = &'a mut T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current > self.last {
            return None;
        }
        // SAFETY: the creator of the iterator owns the claimed range, and
        // each slot is yielded once.
        let slot = unsafe { &mut *self.ring_buffer.slot(self.current) };
        self.current += 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<T, W, S, P> ExactSizeIterator for BatchIterMut<'_, T, W, S, P>
where
    W: WaitStrategy,
    S: Sequencer,
    P: Publisher,
{
}
