//! `LockRing` - Lock-Free Ring Buffer with Hazard-Pointer Reclamation
//!
//! A disruptor-style bounded ring buffer for inter-thread messaging. Slots
//! are pre-allocated, producers claim sequence numbers, and consumers wait on
//! barriers with a choice of wait strategies.
//!
//! The set of consumer sequences that producers must not lap can change while
//! producers are running. It is kept as an immutable snapshot replaced by
//! compare-and-swap, and readers protect the snapshot they scan with a hazard
//! pointer so that a replaced snapshot is only freed once nobody reads it.
//!
//! ## Features
//!
//! - **Lock-free claims**: single-producer and multi-producer sequencers
//! - **Zero-allocation**: slots are created once, up front
//! - **Dynamic consumers**: gating sequences can be attached and detached at any time
//! - **Safe reclamation**: a general-purpose [`hazard::HazardPointerDomain`]
//! - **Cancellation**: every wait strategy honours barrier alerts
//!
//! ## Quick Start
//!
//! ```rust
//! use lockring::disruptor::{
//!     Sequence, SequenceBarrier, SingleProducerRingBuffer, YieldingWaitStrategy,
//! };
//! use std::sync::Arc;
//! use std::thread;
//!
//! let ring: Arc<SingleProducerRingBuffer<i64, YieldingWaitStrategy>> =
//!     Arc::new(SingleProducerRingBuffer::new(8, YieldingWaitStrategy::new()).unwrap());
//!
//! let consumed = Arc::new(Sequence::default());
//! ring.add_gating_sequence(Arc::clone(&consumed));
//! let barrier = ring.new_barrier(&[]);
//!
//! let consumer = {
//!     let ring = Arc::clone(&ring);
//!     thread::spawn(move || {
//!         let mut total = 0;
//!         let mut next = 0;
//!         while next < 100 {
//!             let available = barrier.wait_for(next).unwrap();
//!             while next <= available {
//!                 total += *ring.get(next);
//!                 consumed.change_value(next);
//!                 next += 1;
//!             }
//!         }
//!         total
//!     })
//! };
//!
//! for value in 0..100 {
//!     ring.publish_and_assign(value);
//! }
//! assert_eq!(consumer.join().unwrap(), (0..100).sum::<i64>());
//! ```
//!
//! ## Architecture
//!
//! - **`Sequence`**: padded atomic counter
//! - **`SequenceArray`**: immutable snapshot of gating sequences
//! - **`Sequencer`**: hands out sequences under wrap-point backpressure
//! - **`Publisher`**: marks written slots visible
//! - **`WaitStrategy`**: how consumers wait
//! - **`SequenceBarrier`**: what consumers wait on, with cancellation
//! - **`RingBuffer`**: composes all of the above
//! - **`Active`**: a worker thread fed through a multi-producer ring

pub mod active;
pub mod config;
pub mod disruptor;
pub mod hazard;

// Re-export the main types for convenience
pub use active::{Active, Message};
pub use config::{ActiveConfig, RingBufferConfig, WaitStrategyConfig};
pub use disruptor::{
    // Utility functions
    is_power_of_two,
    BlockingWaitStrategy,
    // Error types
    DisruptorError,
    MinimumReader,
    MultiProducerPublisher,
    MultiProducerRingBuffer,
    MultiProducerSequencer,
    ProcessingSequenceBarrier,
    Publisher,
    Result,
    // Core types
    RingBuffer,
    Sequence,
    SequenceArray,
    SequenceBarrier,
    // Sequencing
    Sequencer,
    SingleProducerPublisher,
    SingleProducerRingBuffer,
    SingleProducerSequencer,
    SleepingWaitStrategy,
    SpinWaitStrategy,
    // Wait strategies
    WaitStrategy,
    YieldingWaitStrategy,
    // Constants
    INITIAL_CURSOR_VALUE,
};
pub use hazard::{HazardPointerDomain, HazardRecord};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the version of the `LockRing` library
#[must_use]
pub fn version() -> &'static str {
    VERSION
}
