//! Ring Buffer End-to-End Tests
//!
//! Producers and consumers on real threads: ordering, backpressure,
//! out-of-order multi-producer publication, cancellation and gating changes
//! while producers are blocked.

use lockring::config::{RingBufferConfig, WaitStrategyConfig};
use lockring::disruptor::{
    BlockingWaitStrategy, DisruptorError, MultiProducerRingBuffer, Sequence, SequenceBarrier,
    SingleProducerRingBuffer, WaitStrategy, YieldingWaitStrategy,
};
use lockring::hazard::HazardPointerDomain;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
struct TestEvent {
    producer_id: u64,
    value: i64,
    checksum: i64,
}

impl TestEvent {
    fn fill(&mut self, producer_id: u64, value: i64) {
        self.producer_id = producer_id;
        self.value = value;
        self.checksum = value * 31 + producer_id as i64;
    }

    fn is_consistent(&self) -> bool {
        self.checksum == self.value * 31 + self.producer_id as i64
    }
}

/// A single consumer reads every value in order and the producer never gets
/// more than one ring ahead of it
#[test]
fn test_spsc_ordering_and_backpressure() {
    const CAPACITY: i64 = 8;
    const COUNT: i64 = 100;

    let ring: Arc<SingleProducerRingBuffer<i64, BlockingWaitStrategy>> = Arc::new(
        SingleProducerRingBuffer::with_domain(
            CAPACITY as usize,
            BlockingWaitStrategy::new(),
            i64::default,
            Arc::new(HazardPointerDomain::new()),
        )
        .unwrap(),
    );
    let consumed = Arc::new(Sequence::default());
    ring.add_gating_sequence(Arc::clone(&consumed));
    let barrier = ring.new_barrier(&[]);

    let consumer = {
        let ring = Arc::clone(&ring);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut received = Vec::with_capacity(COUNT as usize);
            let mut next = 0;
            while next < COUNT {
                let available = barrier.wait_for(next).unwrap();
                while next <= available {
                    received.push(*ring.get(next));
                    consumed.change_value(next);
                    next += 1;
                }
            }
            received
        })
    };

    for value in 0..COUNT {
        let sequence = ring.next();
        assert!(
            sequence - consumed.value() <= CAPACITY,
            "claimed {sequence} while consumer was at {}",
            consumed.value()
        );
        unsafe { *ring.preallocated(sequence) = value * 10 };
        ring.publish(sequence);
    }

    let received = consumer.join().unwrap();
    assert_eq!(received, (0..COUNT).map(|v| v * 10).collect::<Vec<_>>());
}

/// A full ring rejects non-blocking claims until the consumer moves
#[test]
fn test_try_next_backpressure() {
    let ring = SingleProducerRingBuffer::<i64, YieldingWaitStrategy>::with_domain(
        4,
        YieldingWaitStrategy::new(),
        i64::default,
        Arc::new(HazardPointerDomain::new()),
    )
    .unwrap();
    let consumed = Arc::new(Sequence::default());
    ring.add_gating_sequence(Arc::clone(&consumed));

    for value in 0..4 {
        ring.try_publish_with(|slot| *slot = value).unwrap();
    }
    assert!(matches!(
        ring.try_publish_with(|slot| *slot = 99),
        Err(DisruptorError::InsufficientCapacity)
    ));
    assert_eq!(*ring.get(0), 0);

    consumed.change_value(0);
    assert_eq!(ring.try_publish_with(|slot| *slot = 4).unwrap(), 4);
    assert_eq!(*ring.get(4), 4);
}

/// Concurrent producers publish out of order; the consumer only ever sees
/// fully written slots, and each producer's values arrive in order
#[test]
fn test_multi_producer_availability() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: i64 = 2_000;
    const TOTAL: i64 = PRODUCERS as i64 * PER_PRODUCER;

    let ring: Arc<MultiProducerRingBuffer<TestEvent, YieldingWaitStrategy>> = Arc::new(
        MultiProducerRingBuffer::with_domain(
            64,
            YieldingWaitStrategy::new(),
            TestEvent::default,
            Arc::new(HazardPointerDomain::new()),
        )
        .unwrap(),
    );
    let consumed = Arc::new(Sequence::default());
    ring.add_gating_sequence(Arc::clone(&consumed));
    let barrier = ring.new_barrier(&[]);

    let consumer = {
        let ring = Arc::clone(&ring);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut last_seen = vec![-1_i64; PRODUCERS as usize];
            let mut next = 0;
            while next < TOTAL {
                let available = barrier.wait_for(next).unwrap();
                while next <= available {
                    let event = ring.get(next);
                    assert!(event.is_consistent(), "torn read at {next}: {event:?}");
                    let last = &mut last_seen[event.producer_id as usize];
                    assert!(event.value > *last, "producer order broken at {next}");
                    *last = event.value;
                    consumed.change_value(next);
                    next += 1;
                }
            }
            last_seen
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer_id| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for value in 0..PER_PRODUCER {
                    ring.publish_with(|event| event.fill(producer_id, value));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let last_seen = consumer.join().unwrap();
    assert!(last_seen.iter().all(|&last| last == PER_PRODUCER - 1));
    assert_eq!(ring.cursor(), TOTAL - 1);
}

/// Alerting a barrier cancels a consumer blocked on it, for every strategy
#[test]
fn test_barrier_cancellation_for_every_strategy() {
    let strategies = [
        WaitStrategyConfig::Blocking { timeout_ms: 1 },
        WaitStrategyConfig::Spinning,
        WaitStrategyConfig::Sleeping {
            spin_tries: 100,
            yield_tries: 100,
        },
        WaitStrategyConfig::Yielding { spin_tries: 100 },
    ];

    for strategy in strategies {
        let config = RingBufferConfig::new()
            .with_buffer_size(16)
            .with_wait_strategy(strategy);
        let ring = SingleProducerRingBuffer::<i64, Box<dyn WaitStrategy>>::from_config(
            &config,
            Arc::new(HazardPointerDomain::new()),
        )
        .unwrap();
        let barrier = Arc::new(ring.new_barrier(&[]));

        let waiter = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let result = barrier.wait_for(0);
                (result, Instant::now())
            })
        };

        thread::sleep(Duration::from_millis(20));
        let alerted_at = Instant::now();
        barrier.alert();

        let (result, returned_at) = waiter.join().unwrap();
        assert!(
            matches!(result, Err(DisruptorError::Cancelled)),
            "{strategy:?} returned {result:?}"
        );
        assert!(
            returned_at.duration_since(alerted_at) < Duration::from_millis(500),
            "{strategy:?} took too long to observe the alert"
        );

        barrier.clear_alert();
        ring.publish_and_assign(1);
        assert_eq!(barrier.wait_for(0).unwrap(), 0);
    }
}

/// Churning far-ahead gating sequences in and out never lets the producer
/// lap the real consumer
#[test]
fn test_gating_changes_while_producing() {
    const CAPACITY: i64 = 8;
    const COUNT: i64 = 20_000;

    let domain = Arc::new(HazardPointerDomain::new());
    let ring: Arc<SingleProducerRingBuffer<i64, YieldingWaitStrategy>> = Arc::new(
        SingleProducerRingBuffer::with_domain(
            CAPACITY as usize,
            YieldingWaitStrategy::new(),
            i64::default,
            Arc::clone(&domain),
        )
        .unwrap(),
    );
    let consumed = Arc::new(Sequence::default());
    ring.add_gating_sequence(Arc::clone(&consumed));
    let barrier = ring.new_barrier(&[]);
    let stop = Arc::new(AtomicBool::new(false));

    let churn = {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut rounds = 0_u64;
            while !stop.load(Ordering::Acquire) {
                let far_ahead = Arc::new(Sequence::new(1_000_000));
                ring.add_gating_sequence(Arc::clone(&far_ahead));
                assert!(ring.remove_gating_sequence(&far_ahead));
                rounds += 1;
            }
            ring.hazard_domain().retire_thread();
            rounds
        })
    };

    let consumer = {
        let ring = Arc::clone(&ring);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut next = 0;
            while next < COUNT {
                let available = barrier.wait_for(next).unwrap();
                while next <= available {
                    assert_eq!(*ring.get(next), next, "slot overwritten before it was read");
                    consumed.change_value(next);
                    next += 1;
                }
            }
        })
    };

    for value in 0..COUNT {
        let sequence = ring.next();
        assert!(sequence - consumed.value() <= CAPACITY);
        unsafe { *ring.preallocated(sequence) = value };
        ring.publish(sequence);
    }

    consumer.join().unwrap();
    stop.store(true, Ordering::Release);
    let rounds = churn.join().unwrap();
    assert!(rounds > 0);

    let remaining = ring.gating_sequences();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains(&consumed));
}

/// Several threads editing the gating set at once lose no update: the final
/// snapshot holds exactly the sequences each editor left attached
#[test]
fn test_concurrent_gating_edits_lose_no_update() {
    const EDITORS: usize = 6;
    const ROUNDS: usize = 3_000;
    const KEEP_EVERY: usize = 100;
    const PUBLISHED: i64 = 50_000;

    let ring: Arc<MultiProducerRingBuffer<i64, YieldingWaitStrategy>> = Arc::new(
        MultiProducerRingBuffer::with_domain(
            16,
            YieldingWaitStrategy::new(),
            i64::default,
            Arc::new(HazardPointerDomain::new()),
        )
        .unwrap(),
    );
    let start = Arc::new(std::sync::Barrier::new(EDITORS + 1));

    let editors: Vec<_> = (0..EDITORS)
        .map(|_| {
            let ring = Arc::clone(&ring);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    // Far ahead of the producer so gating never blocks it.
                    let sequence = Arc::new(Sequence::new(i64::MAX / 2));
                    ring.add_gating_sequence(Arc::clone(&sequence));
                    if round % KEEP_EVERY == 0 {
                        kept.push(sequence);
                    } else {
                        assert!(ring.remove_gating_sequence(&sequence));
                    }
                }
                ring.hazard_domain().retire_thread();
                kept
            })
        })
        .collect();

    let producer = {
        let ring = Arc::clone(&ring);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            start.wait();
            for value in 0..PUBLISHED {
                ring.publish_and_assign(value);
            }
        })
    };

    let kept: Vec<Arc<Sequence>> = editors
        .into_iter()
        .flat_map(|editor| editor.join().unwrap())
        .collect();
    producer.join().unwrap();

    let snapshot = ring.gating_sequences();
    assert_eq!(kept.len(), EDITORS * ROUNDS / KEEP_EVERY);
    assert_eq!(snapshot.len(), kept.len());
    assert!(kept.iter().all(|sequence| snapshot.contains(sequence)));
    assert_eq!(ring.cursor(), PUBLISHED - 1);
}

/// Detaching the only consumer releases a blocked producer
#[test]
fn test_removing_consumer_unblocks_producer() {
    let ring: Arc<MultiProducerRingBuffer<i64, YieldingWaitStrategy>> = Arc::new(
        MultiProducerRingBuffer::with_domain(
            2,
            YieldingWaitStrategy::new(),
            i64::default,
            Arc::new(HazardPointerDomain::new()),
        )
        .unwrap(),
    );
    let stalled = Arc::new(Sequence::default());
    ring.add_gating_sequence(Arc::clone(&stalled));
    ring.publish_and_assign(1);
    ring.publish_and_assign(2);

    let producer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || ring.publish_and_assign(3))
    };

    thread::sleep(Duration::from_millis(20));
    assert!(!producer.is_finished());

    assert!(ring.remove_gating_sequence(&stalled));
    assert_eq!(producer.join().unwrap(), 2);
    assert_eq!(ring.minimum_gating_sequence(), None);
}
