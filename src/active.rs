//! Active Object
//!
//! An [`Active`] owns one worker thread that executes messages in the order
//! they were sent. Any number of threads may send; the messages travel over a
//! multi-producer ring buffer and the worker is its only consumer.

use crate::config::ActiveConfig;
use crate::disruptor::{
    DisruptorError, MultiProducerPublisher, MultiProducerRingBuffer, ProcessingSequenceBarrier,
    Result, Sequence, SequenceBarrier, WaitStrategy,
};
use crate::hazard::HazardPointerDomain;
use crate::{internal_debug, internal_warn};
use core_affinity::CoreId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A unit of work executed on the worker thread
pub trait Message: Send {
    /// Run the message
    ///
    /// Returning `true` makes the worker stop draining the current batch and
    /// go back to waiting.
    fn execute(&mut self) -> bool;
}

impl<F> Message for F
where
    F: FnMut() -> bool + Send,
{
    fn execute(&mut self) -> bool {
        self()
    }
}

type Slot = Mutex<Option<Box<dyn Message>>>;
type MessageRing = MultiProducerRingBuffer<Slot, Box<dyn WaitStrategy>>;
type MessageBarrier = ProcessingSequenceBarrier<Box<dyn WaitStrategy>, MultiProducerPublisher>;

/// Executes messages sequentially on a dedicated thread
pub struct Active {
    ring: Arc<MessageRing>,
    barrier: Arc<MessageBarrier>,
    done: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    pending: Option<PendingWorker>,
}

/// A worker that has not been given a thread yet
struct PendingWorker {
    worker: Worker,
    thread_name: String,
    affinity: Option<CoreId>,
}

impl Active {
    /// Create an active object with default settings
    ///
    /// # Errors
    /// Returns `DisruptorError::ThreadSpawn` if the worker cannot be started
    pub fn new() -> Result<Self> {
        Self::with_config(ActiveConfig::default())
    }

    /// Create an active object using the process-wide hazard-pointer domain
    ///
    /// # Errors
    /// Returns a validation error for a bad configuration and
    /// `DisruptorError::ThreadSpawn` if the worker cannot be started
    pub fn with_config(config: ActiveConfig) -> Result<Self> {
        Self::with_domain(config, HazardPointerDomain::global())
    }

    /// Create an active object whose queue uses `domain`
    ///
    /// The worker is spawned right away unless the configuration defers it.
    ///
    /// # Errors
    /// Returns a validation error for a bad configuration and
    /// `DisruptorError::ThreadSpawn` if the worker cannot be started
    pub fn with_domain(config: ActiveConfig, domain: Arc<HazardPointerDomain>) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(MessageRing::from_config(
            &config.ring_buffer_config(),
            domain,
        )?);
        let consumed = Arc::new(Sequence::default());
        ring.add_gating_sequence(Arc::clone(&consumed));

        let barrier = Arc::new(ring.new_barrier(&[]));
        let done = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            ring: Arc::clone(&ring),
            barrier: Arc::clone(&barrier),
            consumed,
            done: Arc::clone(&done),
        };

        let mut active = Self {
            ring,
            barrier,
            done,
            worker: None,
            pending: Some(PendingWorker {
                worker,
                thread_name: config.thread_name,
                affinity: config.core_affinity.map(|id| CoreId { id }),
            }),
        };
        if config.start_immediately {
            active.start()?;
        }
        internal_debug!(
            queue_size = config.queue_size,
            started = active.is_started(),
            "active object created"
        );
        Ok(active)
    }

    /// Spawn the worker thread if it is not running yet
    ///
    /// Messages sent before the start are kept and run first.
    ///
    /// # Errors
    /// Returns `DisruptorError::ThreadSpawn` if the worker cannot be started;
    /// the active object stays unstarted and `start` may be retried
    pub fn start(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let PendingWorker {
            worker,
            thread_name,
            affinity,
        } = pending;

        // Shared so a failed spawn can hand the worker back.
        let slot = Arc::new(Mutex::new(Some(worker)));
        let handoff = Arc::clone(&slot);
        let name = thread_name.clone();
        let spawned = thread::Builder::new().name(thread_name.clone()).spawn(move || {
            set_affinity_if_defined(affinity, &name);
            let worker = handoff.lock().take();
            if let Some(worker) = worker {
                worker.run();
            }
        });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                internal_debug!(thread = %thread_name, "active object started");
                Ok(())
            }
            Err(error) => {
                if let Some(worker) = slot.lock().take() {
                    self.pending = Some(PendingWorker {
                        worker,
                        thread_name,
                        affinity,
                    });
                }
                Err(error.into())
            }
        }
    }

    /// Whether the worker thread has been spawned
    pub fn is_started(&self) -> bool {
        self.worker.is_some()
    }

    /// Queue a message, blocking while the queue is full
    ///
    /// Before [`Active::start`] nothing drains the queue, so this blocks
    /// once `queue_size` messages are waiting.
    ///
    /// # Returns
    /// The sequence the message was published at
    pub fn send(&self, message: Box<dyn Message>) -> i64 {
        self.ring.publish_with(|slot| *slot.get_mut() = Some(message))
    }

    /// Queue a message without blocking
    ///
    /// # Errors
    /// Returns `DisruptorError::InsufficientCapacity` if the queue is full;
    /// the message is dropped in that case
    pub fn try_send(&self, message: Box<dyn Message>) -> Result<i64> {
        self.ring
            .try_publish_with(|slot| *slot.get_mut() = Some(message))
    }

    /// Queue a closure that runs once on the worker thread
    pub fn post<F>(&self, task: F) -> i64
    where
        F: FnOnce() + Send + 'static,
    {
        let mut task = Some(task);
        self.send(Box::new(move || {
            if let Some(task) = task.take() {
                task();
            }
            false
        }))
    }

    /// Whether `required` messages could be queued without blocking
    pub fn has_available_capacity(&self, required: i64) -> bool {
        self.ring.has_available_capacity(required)
    }

    /// Queue the stop message
    ///
    /// Messages sent before it still run; the worker exits once it executes
    /// the stop message.
    pub fn finish(&self) {
        self.send(self.finish_message());
    }

    fn try_finish(&self) -> Result<i64> {
        self.try_send(self.finish_message())
    }

    fn finish_message(&self) -> Box<dyn Message> {
        let done = Arc::clone(&self.done);
        Box::new(move || {
            done.store(true, Ordering::Release);
            true
        })
    }

    /// Stop the worker without running the queued messages
    pub fn halt(&self) {
        self.barrier.alert();
    }

    /// Whether the worker has executed the stop message
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        // A full queue drains as long as the worker is alive.
        while !self.is_done()
            && !self.barrier.is_alerted()
            && !worker.is_finished()
            && self.try_finish().is_err()
        {
            thread::yield_now();
        }

        if worker.join().is_err() {
            internal_warn!("active object worker panicked");
        }
    }
}

impl std::fmt::Debug for Active {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Active")
            .field("ring", &self.ring)
            .field("started", &self.is_started())
            .field("done", &self.is_done())
            .finish()
    }
}

struct Worker {
    ring: Arc<MessageRing>,
    barrier: Arc<MessageBarrier>,
    consumed: Arc<Sequence>,
    done: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let mut next = self.consumed.value() + 1;
        while !self.done.load(Ordering::Acquire) {
            let available = match self.barrier.wait_for(next) {
                Ok(available) => available,
                Err(DisruptorError::Cancelled) => {
                    internal_debug!("active object halted");
                    break;
                }
                Err(error) => {
                    internal_warn!(%error, "active object stopped unexpectedly");
                    break;
                }
            };

            while next <= available {
                let message = self.ring.get(next).lock().take();
                self.consumed.change_value(next);
                next += 1;

                if let Some(mut message) = message {
                    if message.execute() {
                        break;
                    }
                }
            }
        }
    }
}

fn set_affinity_if_defined(affinity: Option<CoreId>, thread_name: &str) {
    if let Some(core_id) = affinity {
        if core_affinity::set_for_current(core_id) {
            internal_debug!("pinned thread '{thread_name}' to CPU core {}", core_id.id);
        } else {
            internal_warn!(
                "could not pin thread '{thread_name}' to CPU core {}",
                core_id.id
            );
        }
    }
}
