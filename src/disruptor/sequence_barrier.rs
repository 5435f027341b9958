//! Sequence Barrier Implementation
//!
//! A barrier is what a consumer waits on: it combines the ring's progress
//! cursor, the sequences of upstream consumers, the wait strategy and a
//! cancellation flag.

use crate::disruptor::{
    DisruptorError, MinimumReader, Publisher, Result, Sequence, SequenceArray, WaitStrategy,
};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Coordination point for a consumer
pub trait SequenceBarrier: Send + Sync {
    /// Wait until `sequence` is available to this consumer
    ///
    /// # Returns
    /// The highest available sequence, which is at least `sequence`
    ///
    /// # Errors
    /// Returns [`DisruptorError::Cancelled`] if the barrier is alerted
    /// before the sequence becomes available
    fn wait_for(&self, sequence: i64) -> Result<i64>;

    /// The highest sequence this consumer may currently read
    fn cursor(&self) -> i64;

    /// Whether the barrier has been alerted
    fn is_alerted(&self) -> bool;

    /// Alert the barrier and wake any blocked consumer
    fn alert(&self);

    /// Clear the alert so the barrier can be waited on again
    fn clear_alert(&self);

    /// Fail with [`DisruptorError::Cancelled`] if the barrier is alerted
    fn check_alert(&self) -> Result<()> {
        if self.is_alerted() {
            Err(DisruptorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Reads the dependent sequences, falling back to the cursor when there are
/// none
struct DependentSequences<'a> {
    cursor: &'a Sequence,
    dependents: &'a SequenceArray,
}

impl MinimumReader for DependentSequences<'_> {
    fn minimum_sequence(&self, default: i64) -> i64 {
        if self.dependents.is_empty() {
            self.cursor.value()
        } else {
            self.dependents.minimum_sequence(default)
        }
    }
}

/// Barrier handed out by [`RingBuffer::new_barrier`](crate::disruptor::RingBuffer::new_barrier)
pub struct ProcessingSequenceBarrier<W, P>
where
    W: WaitStrategy + ?Sized,
    P: Publisher,
{
    wait_strategy: Arc<W>,
    cursor: Arc<Sequence>,
    dependents: SequenceArray,
    publisher: Arc<P>,
    alerted: AtomicBool,
}

impl<W, P> ProcessingSequenceBarrier<W, P>
where
    W: WaitStrategy + ?Sized,
    P: Publisher,
{
    /// Create a barrier
    ///
    /// # Arguments
    /// * `wait_strategy` - Strategy used while the sequence is unavailable
    /// * `cursor` - The ring's progress cursor
    /// * `dependents` - Upstream consumer sequences; empty to follow the cursor
    /// * `publisher` - Publisher used to skip over unpublished claims
    pub fn new(
        wait_strategy: Arc<W>,
        cursor: Arc<Sequence>,
        dependents: SequenceArray,
        publisher: Arc<P>,
    ) -> Self {
        Self {
            wait_strategy,
            cursor,
            dependents,
            publisher,
            alerted: AtomicBool::new(false),
        }
    }

    fn dependent_sequences(&self) -> DependentSequences<'_> {
        DependentSequences {
            cursor: &self.cursor,
            dependents: &self.dependents,
        }
    }
}

impl<W, P> SequenceBarrier for ProcessingSequenceBarrier<W, P>
where
    W: WaitStrategy + ?Sized,
    P: Publisher,
{
    fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.check_alert()?;

        let dependents = self.dependent_sequences();
        let backoff = Backoff::new();
        loop {
            let available =
                self.wait_strategy
                    .wait_for(sequence, &self.cursor, &dependents, self)?;

            // A multi-producer cursor can run ahead of slots that are still
            // being written.
            let highest = self
                .publisher
                .highest_published_sequence(sequence, available);
            if highest >= sequence {
                return Ok(highest);
            }

            self.check_alert()?;
            backoff.snooze();
        }
    }

    fn cursor(&self) -> i64 {
        self.dependent_sequences().minimum_sequence(i64::MAX)
    }

    fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }

    fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.wait_strategy.signal_all_when_blocking();
    }

    fn clear_alert(&self) {
        self.alerted.store(false, Ordering::Release);
    }
}

impl<W, P> std::fmt::Debug for ProcessingSequenceBarrier<W, P>
where
    W: WaitStrategy + ?Sized,
    P: Publisher,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingSequenceBarrier")
            .field("cursor", &self.cursor)
            .field("dependents", &self.dependents)
            .field("alerted", &self.is_alerted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disruptor::{
        BlockingWaitStrategy, MultiProducerPublisher, SingleProducerPublisher, SpinWaitStrategy,
    };
    use std::thread;
    use std::time::Duration;

    fn single_producer_barrier(
        dependents: SequenceArray,
    ) -> (
        Arc<SingleProducerPublisher>,
        ProcessingSequenceBarrier<SpinWaitStrategy, SingleProducerPublisher>,
    ) {
        let publisher = Arc::new(SingleProducerPublisher::with_buffer_size(8));
        let cursor = publisher.progress_cursor(&Arc::new(Sequence::default()));
        let barrier = ProcessingSequenceBarrier::new(
            Arc::new(SpinWaitStrategy::new()),
            cursor,
            dependents,
            Arc::clone(&publisher),
        );
        (publisher, barrier)
    }

    #[test]
    fn test_wait_for_published_sequence() {
        let (publisher, barrier) = single_producer_barrier(SequenceArray::default());
        publisher.publish(4);

        assert_eq!(barrier.wait_for(2).unwrap(), 4);
        assert_eq!(barrier.cursor(), 4);
    }

    #[test]
    fn test_dependents_limit_progress() {
        let upstream = Arc::new(Sequence::new(1));
        let (publisher, barrier) =
            single_producer_barrier(SequenceArray::from_sequences(&[Arc::clone(&upstream)]));
        publisher.publish(6);

        assert_eq!(barrier.wait_for(1).unwrap(), 1);
        assert_eq!(barrier.cursor(), 1);

        upstream.change_value(5);
        assert_eq!(barrier.wait_for(2).unwrap(), 5);
    }

    #[test]
    fn test_alerted_barrier_fails_fast() {
        let (publisher, barrier) = single_producer_barrier(SequenceArray::default());
        publisher.publish(4);

        barrier.alert();
        assert!(barrier.is_alerted());
        assert!(matches!(barrier.wait_for(0), Err(DisruptorError::Cancelled)));

        barrier.clear_alert();
        assert_eq!(barrier.wait_for(0).unwrap(), 4);
    }

    #[test]
    fn test_alert_wakes_blocked_consumer() {
        let publisher = Arc::new(SingleProducerPublisher::with_buffer_size(8));
        let barrier = Arc::new(ProcessingSequenceBarrier::new(
            Arc::new(BlockingWaitStrategy::new()),
            publisher.progress_cursor(&Arc::new(Sequence::default())),
            SequenceArray::default(),
            publisher,
        ));

        let handle = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(0))
        };

        thread::sleep(Duration::from_millis(10));
        barrier.alert();
        assert!(matches!(
            handle.join().unwrap(),
            Err(DisruptorError::Cancelled)
        ));
    }

    #[test]
    fn test_multi_producer_gaps_hold_back_consumer() {
        let publisher = Arc::new(MultiProducerPublisher::with_buffer_size(8));
        let claim_cursor = Arc::new(Sequence::new(2));
        let barrier = Arc::new(ProcessingSequenceBarrier::new(
            Arc::new(SpinWaitStrategy::new()),
            publisher.progress_cursor(&claim_cursor),
            SequenceArray::default(),
            Arc::clone(&publisher),
        ));

        publisher.publish(0);
        publisher.publish(2);
        assert_eq!(barrier.wait_for(0).unwrap(), 0);

        let handle = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait_for(1))
        };
        thread::sleep(Duration::from_millis(10));
        publisher.publish(1);

        assert_eq!(handle.join().unwrap().unwrap(), 2);
    }
}
