//! Queue throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin queue_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use corral::{mpmc, spsc};

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: usize = 1 << 24;

type Payload = u64;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_spsc_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for expected in 0..ITERATIONS as Payload {
            loop {
                if let Some(value) = consumer.pop() {
                    if value != expected {
                        panic!("Data corruption: expected {}, got {}", expected, value);
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS as Payload {
        let mut item = i;
        while let Err(returned) = producer.push(item) {
            item = returned;
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("spsc: {} ops/ms", ops_per_ms);
}

fn bench_spsc_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (q1_producer, q1_consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();
    let (q2_producer, q2_consumer) = spsc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let responder = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..ITERATIONS {
            loop {
                if let Some(value) = q1_consumer.pop() {
                    q2_producer.push(value).unwrap();
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS as Payload {
        q1_producer.push(i).unwrap();
        loop {
            if q2_consumer.pop().is_some() {
                break;
            }
            hint::spin_loop();
        }
    }

    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / ITERATIONS as u128;
    println!("spsc: {} ns RTT", rtt_ns);
}

fn bench_mpmc_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) {
    let (producer, consumer) = mpmc::channel::<Payload>(QUEUE_SIZE).unwrap();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        let mut received = 0usize;
        while received < ITERATIONS {
            if consumer.pop().is_some() {
                received += 1;
            } else {
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS as Payload {
        let mut item = i;
        while let Err(returned) = producer.push(item) {
            item = returned;
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("mpmc (1p/1c): {} ops/ms", ops_per_ms);
}

fn main() {
    corral::init_tracing();
    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!("corral (size={}, iters={}):", QUEUE_SIZE, ITERATIONS);
    bench_spsc_throughput(producer_cpu, consumer_cpu);
    bench_spsc_rtt(producer_cpu, consumer_cpu);
    bench_mpmc_throughput(producer_cpu, consumer_cpu);
}
