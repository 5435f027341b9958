//! Configuration
//!
//! Serializable settings for ring buffers and active objects. Every field has
//! a default, so a partial JSON document only needs to name what it changes.

use crate::disruptor::{
    is_power_of_two, BlockingWaitStrategy, DisruptorError, Result, SleepingWaitStrategy,
    SpinWaitStrategy, WaitStrategy, YieldingWaitStrategy,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wait strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitStrategyConfig {
    /// Park on a condition variable, waking at least every `timeout_ms`
    Blocking {
        #[serde(default = "default_blocking_timeout_ms")]
        timeout_ms: u64,
    },
    /// Busy-spin
    Spinning,
    /// Spin, then yield, then spin
    Sleeping {
        #[serde(default = "default_tries")]
        spin_tries: u32,
        #[serde(default = "default_tries")]
        yield_tries: u32,
    },
    /// Sleep briefly, then yield
    Yielding {
        #[serde(default = "default_tries")]
        spin_tries: u32,
    },
}

fn default_blocking_timeout_ms() -> u64 {
    1
}

fn default_tries() -> u32 {
    100
}

impl Default for WaitStrategyConfig {
    fn default() -> Self {
        Self::Blocking {
            timeout_ms: default_blocking_timeout_ms(),
        }
    }
}

impl WaitStrategyConfig {
    /// Instantiate the configured strategy
    pub fn build(&self) -> Box<dyn WaitStrategy> {
        match *self {
            Self::Blocking { timeout_ms } => Box::new(BlockingWaitStrategy::with_timeout(
                Duration::from_millis(timeout_ms),
            )),
            Self::Spinning => Box::new(SpinWaitStrategy::new()),
            Self::Sleeping {
                spin_tries,
                yield_tries,
            } => Box::new(SleepingWaitStrategy::with_tries(spin_tries, yield_tries)),
            Self::Yielding { spin_tries } => {
                Box::new(YieldingWaitStrategy::with_spin_tries(spin_tries))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if let Self::Blocking { timeout_ms: 0 } = self {
            return Err(DisruptorError::InvalidConfig(
                "blocking timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ring buffer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingBufferConfig {
    /// Number of slots, must be a power of 2
    pub buffer_size: usize,

    /// Sleep between gating polls while a producer waits for capacity
    pub producer_backoff_us: u64,

    /// Strategy consumers wait with
    pub wait_strategy: WaitStrategyConfig,
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            producer_backoff_us: 1,
            wait_strategy: WaitStrategyConfig::default(),
        }
    }
}

impl RingBufferConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the producer backoff
    pub fn with_producer_backoff(mut self, backoff: Duration) -> Self {
        self.producer_backoff_us = backoff.as_micros() as u64;
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategyConfig) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    /// Returns `DisruptorError::Json` for malformed input and
    /// `DisruptorError::InvalidBufferSize` or `DisruptorError::InvalidConfig`
    /// for rejected values
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn producer_backoff(&self) -> Duration {
        Duration::from_micros(self.producer_backoff_us)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.buffer_size) {
            return Err(DisruptorError::InvalidBufferSize(self.buffer_size));
        }
        self.wait_strategy.validate()
    }
}

/// Active object configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveConfig {
    /// Capacity of the message ring, must be a power of 2
    pub queue_size: usize,

    /// Name of the worker thread
    pub thread_name: String,

    /// Core to pin the worker thread to
    pub core_affinity: Option<usize>,

    /// Strategy the worker waits for messages with
    pub wait_strategy: WaitStrategyConfig,

    /// Spawn the worker on construction; otherwise it waits for `Active::start`
    pub start_immediately: bool,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self {
            queue_size: 32,
            thread_name: "lockring-active".to_string(),
            core_affinity: None,
            wait_strategy: WaitStrategyConfig::default(),
            start_immediately: true,
        }
    }
}

impl ActiveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue size
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Set the worker thread name
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Pin the worker thread to `core`
    pub fn with_core_affinity(mut self, core: usize) -> Self {
        self.core_affinity = Some(core);
        self
    }

    /// Set the wait strategy
    pub fn with_wait_strategy(mut self, wait_strategy: WaitStrategyConfig) -> Self {
        self.wait_strategy = wait_strategy;
        self
    }

    /// Leave the worker stopped until `Active::start` is called
    pub fn with_deferred_start(mut self) -> Self {
        self.start_immediately = false;
        self
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    /// Returns `DisruptorError::Json` for malformed input and a validation
    /// error for rejected values
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_power_of_two(self.queue_size) {
            return Err(DisruptorError::InvalidBufferSize(self.queue_size));
        }
        if self.thread_name.is_empty() {
            return Err(DisruptorError::InvalidConfig(
                "thread_name must not be empty".to_string(),
            ));
        }
        self.wait_strategy.validate()
    }

    /// The ring buffer settings for the message queue
    pub fn ring_buffer_config(&self) -> RingBufferConfig {
        RingBufferConfig::default()
            .with_buffer_size(self.queue_size)
            .with_wait_strategy(self.wait_strategy)
    }
}
