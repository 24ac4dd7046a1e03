//! Bounded lock-free array-backed concurrent queues.
//!
//! One slot-array core ([`slots`]) and three topologies built on it:
//!
//! - [`spsc`] - single producer, single consumer; FIFO
//! - [`mpsc`] - multiple producers, single consumer
//! - [`mpmc`] - multiple producers, multiple consumers
//!
//! Every queue is allocated once at a power-of-two capacity and never
//! resized; push and pop never block. Occupancy reporting ([`Occupancy`])
//! is a best-effort estimate under concurrency, by design.
//!
//! # Example
//!
//! ```
//! use corral::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024).unwrap();
//!
//! producer.push(42).expect("queue full");
//! assert_eq!(consumer.pop(), Some(42));
//! ```

pub mod mpmc;
pub mod mpsc;
pub mod pow2;
pub mod slots;
pub mod spsc;

mod cell;
mod size;
mod trace;

pub use pow2::{CapacityError, round_to_power_of_two};
pub use trace::init_tracing;

/// Read access to a queue's monotonic progress counters.
///
/// The producer index counts elements ever pushed, the consumer index
/// elements ever popped; both are lock-free-readable from any thread and
/// only ever advance. Intended for external monitoring such as computing
/// queue lag, not for driving the queue protocols themselves.
pub trait Progress {
    /// Total elements ever pushed.
    fn producer_index(&self) -> u64;
    /// Total elements ever popped.
    fn consumer_index(&self) -> u64;
}

/// Fixed capacity established at construction.
pub trait Bounded {
    /// The power-of-two slot count; never changes.
    fn capacity(&self) -> usize;
}

/// Occupancy estimates derived from the progress counters.
///
/// Blanket-implemented for every [`Progress`] type. Both methods read the
/// two counters independently, so under concurrent push/pop the results are
/// snapshots: `len` can lag either side, and a `false` from `is_empty` can
/// be stale by the time it is observed. A `true` from `is_empty` means the
/// counters agreed at the instant of the second read.
pub trait Occupancy: Progress {
    /// Best-effort element count; never negative, never retried.
    fn len(&self) -> usize {
        let producer = self.producer_index();
        size::estimate(producer, self.consumer_index())
    }

    /// Whether the two progress counters currently agree.
    fn is_empty(&self) -> bool {
        // Consumer first: a pop between the reads then shows up as
        // "non-empty", never as a false "empty".
        let consumer = self.consumer_index();
        self.producer_index() == consumer
    }
}

impl<Q: Progress + ?Sized> Occupancy for Q {}

/// The consuming end of a queue: removal plus draining.
pub trait Drain<T: Send>: Progress {
    /// Removes and returns the next element, or `None` if no element is
    /// available right now.
    fn pop(&self) -> Option<T>;

    /// Drains the queue by popping until it reports empty.
    ///
    /// The extra emptiness test matters for the multi-consumer topology,
    /// where `pop` can spuriously report "no element" under contention.
    /// With producers still pushing concurrently this loop need not
    /// terminate; that is the accepted cost of an unbounded lock-free
    /// drain.
    fn clear(&self) {
        while self.pop().is_some() || !self.is_empty() {}
    }
}
