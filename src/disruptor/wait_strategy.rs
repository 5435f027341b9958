//! Wait Strategy Implementation
//!
//! Wait strategies decide how a consumer spends its time until the sequence it
//! needs becomes available. Every strategy checks the barrier's alert flag on
//! each poll, so a cancelled wait returns within one poll interval.

use crate::disruptor::{MinimumReader, Result, Sequence, SequenceBarrier};
use parking_lot::{Condvar, Mutex};
use std::hint;
use std::thread;
use std::time::Duration;

/// Strategy employed by consumers waiting on a sequence
pub trait WaitStrategy: Send + Sync + std::fmt::Debug {
    /// Wait for `sequence` to become available
    ///
    /// # Arguments
    /// * `sequence` - The sequence to wait for
    /// * `cursor` - The ring's progress cursor
    /// * `dependents` - Sequences the consumer must stay behind; reads the
    ///   cursor when there are none
    /// * `barrier` - Barrier whose alert flag cancels the wait
    ///
    /// # Returns
    /// The highest sequence the dependents allow, at least `sequence`
    ///
    /// # Errors
    /// Returns [`DisruptorError::Cancelled`](crate::disruptor::DisruptorError::Cancelled)
    /// if the barrier is alerted before the sequence becomes available
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64>;

    /// Wake every consumer blocked in [`wait_for`](Self::wait_for)
    fn signal_all_when_blocking(&self);
}

impl<W: WaitStrategy + ?Sized> WaitStrategy for Box<W> {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        (**self).wait_for(sequence, cursor, dependents, barrier)
    }

    fn signal_all_when_blocking(&self) {
        (**self).signal_all_when_blocking();
    }
}

/// Spins over the dependents until `sequence` is reached, checking the alert
/// between polls
fn spin_on_dependents(
    sequence: i64,
    dependents: &dyn MinimumReader,
    barrier: &dyn SequenceBarrier,
) -> Result<i64> {
    loop {
        let available = dependents.minimum_sequence(i64::MAX);
        if available >= sequence {
            return Ok(available);
        }
        barrier.check_alert()?;
        hint::spin_loop();
    }
}

/// Blocking wait strategy that parks on a condition variable
///
/// Consumers park until the cursor reaches the sequence, waking at least
/// once per timeout to check the alert flag, then spin over their
/// dependents. Producers must call
/// [`signal_all_when_blocking`](WaitStrategy::signal_all_when_blocking)
/// after publishing.
#[derive(Debug)]
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
    timeout: Duration,
}

impl BlockingWaitStrategy {
    /// Default upper bound on a single park
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1);

    pub fn new() -> Self {
        Self::with_timeout(Self::DEFAULT_TIMEOUT)
    }

    /// Create a blocking strategy that parks for at most `timeout` at a time
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            timeout,
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        if cursor.value() < sequence {
            let mut guard = self.mutex.lock();
            while cursor.value() < sequence {
                barrier.check_alert()?;
                self.condvar.wait_for(&mut guard, self.timeout);
            }
        }

        spin_on_dependents(sequence, dependents, barrier)
    }

    fn signal_all_when_blocking(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }
}

/// Busy-spin wait strategy
///
/// Lowest latency, burns a full core per waiting consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpinWaitStrategy;

impl SpinWaitStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl WaitStrategy for SpinWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        spin_on_dependents(sequence, dependents, barrier)
    }

    fn signal_all_when_blocking(&self) {}
}

/// Spins, then yields, then spins again
///
/// The first `spin_tries` polls spin, the next `yield_tries` polls yield the
/// time slice. Once the budget is spent the consumer keeps spinning.
#[derive(Debug, Clone, Copy)]
pub struct SleepingWaitStrategy {
    spin_tries: u32,
    yield_tries: u32,
}

impl SleepingWaitStrategy {
    pub const DEFAULT_SPIN_TRIES: u32 = 100;
    pub const DEFAULT_YIELD_TRIES: u32 = 100;

    pub fn new() -> Self {
        Self::with_tries(Self::DEFAULT_SPIN_TRIES, Self::DEFAULT_YIELD_TRIES)
    }

    pub fn with_tries(spin_tries: u32, yield_tries: u32) -> Self {
        Self {
            spin_tries,
            yield_tries,
        }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.spin_tries + self.yield_tries;
        loop {
            let available = dependents.minimum_sequence(i64::MAX);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;

            if counter > self.yield_tries {
                counter -= 1;
                hint::spin_loop();
            } else if counter > 0 {
                counter -= 1;
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}

/// Sleeps briefly for a bounded number of polls, then yields
#[derive(Debug, Clone, Copy)]
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub const DEFAULT_SPIN_TRIES: u32 = 100;

    /// Sleep used for each of the initial polls
    const POLL_SLEEP: Duration = Duration::from_micros(1);

    pub fn new() -> Self {
        Self::with_spin_tries(Self::DEFAULT_SPIN_TRIES)
    }

    pub fn with_spin_tries(spin_tries: u32) -> Self {
        Self { spin_tries }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn wait_for(
        &self,
        sequence: i64,
        _cursor: &Sequence,
        dependents: &dyn MinimumReader,
        barrier: &dyn SequenceBarrier,
    ) -> Result<i64> {
        let mut counter = self.spin_tries;
        loop {
            let available = dependents.minimum_sequence(i64::MAX);
            if available >= sequence {
                return Ok(available);
            }
            barrier.check_alert()?;

            if counter == 0 {
                thread::yield_now();
            } else {
                counter -= 1;
                thread::sleep(Self::POLL_SLEEP);
            }
        }
    }

    fn signal_all_when_blocking(&self) {}
}
