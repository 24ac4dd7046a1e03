//! Cross-topology integration and stress tests.
//!
//! The heavy multi-thread tests are serialized so they are not fighting
//! each other for cores while asserting progress-dependent properties.

use std::collections::HashSet;
use std::thread;

use corral::{Bounded, CapacityError, Drain, Occupancy, Progress, mpmc, mpsc, spsc};

#[test]
fn capacity_rounds_to_a_power_of_two_everywhere() {
    for requested in 1..=64 {
        let expected = corral::round_to_power_of_two(requested).unwrap();
        assert!(expected.is_power_of_two());

        let (producer, _consumer) = spsc::channel::<u64>(requested).unwrap();
        assert_eq!(Bounded::capacity(&producer), expected);

        let (producer, _consumer) = mpsc::channel::<u64>(requested).unwrap();
        assert_eq!(Bounded::capacity(&producer), expected);

        let (producer, _consumer) = mpmc::channel::<u64>(requested).unwrap();
        assert_eq!(Bounded::capacity(&producer), expected.max(2));
    }
}

#[test]
fn zero_capacity_is_rejected_everywhere() {
    assert_eq!(spsc::channel::<u64>(0).unwrap_err(), CapacityError::Zero);
    assert_eq!(mpsc::channel::<u64>(0).unwrap_err(), CapacityError::Zero);
    assert_eq!(mpmc::channel::<u64>(0).unwrap_err(), CapacityError::Zero);
}

/// Requesting 5 slots yields 8; 8 pushes succeed, the 9th is rejected
/// without corrupting anything, and a drain leaves the queue empty.
#[test]
fn fill_reject_and_drain_scenario() {
    let (producer, consumer) = mpmc::channel::<u64>(5).unwrap();
    assert_eq!(producer.capacity(), 8);

    for i in 0..8 {
        assert!(producer.push(i).is_ok());
    }
    assert_eq!(producer.push(8), Err(8));
    assert_eq!(consumer.len(), 8);

    consumer.clear();
    assert_eq!(consumer.len(), 0);
    assert!(consumer.is_empty());

    // The rejection left the slots intact: a full cycle still works.
    for i in 0..8 {
        assert!(producer.push(i).is_ok());
    }
    for i in 0..8 {
        assert_eq!(consumer.pop(), Some(i));
    }
}

/// SPSC returns elements in push order, then reports empty.
#[test]
fn spsc_is_fifo() {
    let (producer, consumer) = spsc::channel::<&str>(4).unwrap();

    producer.push("a").unwrap();
    producer.push("b").unwrap();
    producer.push("c").unwrap();

    assert_eq!(consumer.pop(), Some("a"));
    assert_eq!(consumer.pop(), Some("b"));
    assert_eq!(consumer.pop(), Some("c"));
    assert_eq!(consumer.pop(), None);
}

#[test]
fn size_tracks_uncontended_pushes() {
    let (producer, consumer) = spsc::channel::<u64>(16).unwrap();
    assert!(consumer.is_empty());

    for n in 1..=10 {
        producer.push(n).unwrap();
        assert_eq!(consumer.len(), n as usize);
        assert!(!consumer.is_empty());
    }
}

#[test]
fn clear_terminates_without_producers() {
    let (producer, consumer) = mpmc::channel::<u64>(32).unwrap();
    for i in 0..20 {
        producer.push(i).unwrap();
    }
    drop(producer);

    consumer.clear();
    assert!(consumer.is_empty());
    assert_eq!(consumer.pop(), None);
}

/// One producer, one consumer, every element exactly once, in order.
#[test]
#[serial_test::serial]
fn spsc_stress_no_loss_no_duplication() {
    const COUNT: u64 = 200_000;
    let (producer, consumer) = spsc::channel::<u64>(128).unwrap();

    let producer_thread = thread::spawn(move || {
        for i in 0..COUNT {
            let mut item = i;
            while let Err(returned) = producer.push(item) {
                item = returned;
                std::hint::spin_loop();
            }
        }
    });

    let mut next = 0u64;
    while next < COUNT {
        if let Some(item) = consumer.pop() {
            assert_eq!(item, next, "SPSC broke FIFO order");
            next += 1;
        } else {
            std::hint::spin_loop();
        }
    }

    producer_thread.join().unwrap();
    assert_eq!(consumer.pop(), None);
    assert!(consumer.is_empty());
}

/// N producers with disjoint element sets, one consumer: the union of
/// everything popped equals the union of everything pushed, exactly once.
#[test]
#[serial_test::serial]
fn mpsc_stress_union_is_exact() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 50_000;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let (producer, consumer) = mpsc::channel::<u64>(256).unwrap();

    let mut handles = vec![];
    for p in 0..PRODUCERS {
        let producer = producer.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let mut item = p * PER_PRODUCER + i;
                while let Err(returned) = producer.push(item) {
                    item = returned;
                    thread::yield_now();
                }
            }
        }));
    }
    drop(producer);

    let mut seen = HashSet::with_capacity(TOTAL);
    while seen.len() < TOTAL {
        if let Some(item) = consumer.pop() {
            assert!(seen.insert(item), "duplicate element {item}");
        } else {
            thread::yield_now();
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(seen.len(), TOTAL);
    assert_eq!(consumer.pop(), None);
}

/// N producers and M consumers on the MPMC queue: exactly-once delivery.
#[test]
#[serial_test::serial]
fn mpmc_stress_union_is_exact() {
    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 50_000;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize;

    let (producer, consumer) = mpmc::channel::<u64>(256).unwrap();

    let mut producer_handles = vec![];
    for p in 0..PRODUCERS {
        let producer = producer.clone();
        producer_handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                let mut item = p * PER_PRODUCER + i;
                while let Err(returned) = producer.push(item) {
                    item = returned;
                    thread::yield_now();
                }
            }
        }));
    }

    let popped = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut consumer_handles = vec![];
    for _ in 0..CONSUMERS {
        let consumer = consumer.clone();
        let popped = std::sync::Arc::clone(&popped);
        consumer_handles.push(thread::spawn(move || {
            let mut local = Vec::new();
            while popped.load(std::sync::atomic::Ordering::Relaxed) < TOTAL {
                if let Some(item) = consumer.pop() {
                    popped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    local.push(item);
                } else {
                    thread::yield_now();
                }
            }
            local
        }));
    }

    for handle in producer_handles {
        handle.join().unwrap();
    }

    let mut seen = HashSet::with_capacity(TOTAL);
    for handle in consumer_handles {
        for item in handle.join().unwrap() {
            assert!(seen.insert(item), "duplicate element {item}");
        }
    }
    assert_eq!(seen.len(), TOTAL);
    assert_eq!(consumer.pop(), None);
}

/// The size estimate stays within [0, capacity] no matter how the reader
/// interleaves with concurrent pushes and pops.
#[test]
#[serial_test::serial]
fn size_stays_in_bounds_under_contention() {
    const ROUNDS: u64 = 100_000;
    let (producer, consumer) = mpmc::channel::<u64>(64).unwrap();
    let capacity = producer.capacity();

    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));

    let producer_stop = std::sync::Arc::clone(&stop);
    let producer_thread = thread::spawn(move || {
        for i in 0..ROUNDS {
            let _ = producer.push(i);
            if producer_stop.load(std::sync::atomic::Ordering::Relaxed) {
                break;
            }
        }
    });

    let consumer_stop = std::sync::Arc::clone(&stop);
    let drainer = consumer.clone();
    let consumer_thread = thread::spawn(move || {
        while !consumer_stop.load(std::sync::atomic::Ordering::Relaxed) {
            let _ = drainer.pop();
        }
        drainer.clear();
    });

    let mut last_produced = 0u64;
    let mut last_consumed = 0u64;
    for _ in 0..ROUNDS {
        let len = consumer.len();
        assert!(len <= capacity, "estimate {len} exceeded capacity {capacity}");

        let produced = consumer.producer_index();
        let consumed = consumer.consumer_index();
        assert!(produced >= last_produced, "producer index went backwards");
        assert!(consumed >= last_consumed, "consumer index went backwards");
        last_produced = produced;
        last_consumed = consumed;
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    producer_thread.join().unwrap();
    consumer_thread.join().unwrap();
}
