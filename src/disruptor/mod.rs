//! LockRing Disruptor Implementation
//!
//! The ring buffer core: sequences, the gating snapshot, sequencers,
//! publishers, wait strategies and sequence barriers, composed by
//! [`RingBuffer`].

pub mod internal_log;
pub mod publisher;
pub mod ring_buffer;
pub mod sequence;
pub mod sequence_array;
pub mod sequence_barrier;
pub mod sequencer;
pub mod wait_strategy;

#[cfg(test)]
mod property_tests;

pub use publisher::{MultiProducerPublisher, Publisher, SingleProducerPublisher};
pub use ring_buffer::{MultiProducerRingBuffer, RingBuffer, SingleProducerRingBuffer};
pub use sequence::Sequence;
pub use sequence_array::{MinimumReader, SequenceArray};
pub use sequence_barrier::{ProcessingSequenceBarrier, SequenceBarrier};
pub use sequencer::{MultiProducerSequencer, Sequencer, SingleProducerSequencer};
pub use wait_strategy::{
    BlockingWaitStrategy, SleepingWaitStrategy, SpinWaitStrategy, WaitStrategy,
    YieldingWaitStrategy,
};

/// The initial cursor value for sequences
pub const INITIAL_CURSOR_VALUE: i64 = -1;

/// Errors that can occur in the ring buffer
#[derive(Debug, thiserror::Error)]
pub enum DisruptorError {
    /// A non-blocking claim found no free slot
    #[error("Insufficient capacity in ring buffer")]
    InsufficientCapacity,

    /// A barrier was alerted while a consumer waited
    #[error("Wait cancelled by barrier alert")]
    Cancelled,

    /// Programmer error, such as initialising the cursor after gating
    /// sequences were attached
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Buffer size must be a power of 2, got: {0}")]
    InvalidBufferSize(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DisruptorError>;

/// Utility function to check if a number is a power of 2
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_power_of_two() {
        assert!(is_power_of_two(1));
        assert!(is_power_of_two(2));
        assert!(is_power_of_two(8));
        assert!(is_power_of_two(1024));

        assert!(!is_power_of_two(0));
        assert!(!is_power_of_two(3));
        assert!(!is_power_of_two(1023));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DisruptorError::InvalidBufferSize(3).to_string(),
            "Buffer size must be a power of 2, got: 3"
        );
        assert_eq!(
            DisruptorError::Cancelled.to_string(),
            "Wait cancelled by barrier alert"
        );
    }
}
