//! Lock-free SPSC queue over the shared slot array.
//!
//! A bounded single-producer single-consumer queue with strict FIFO order.
//!
//! # Overview
//!
//! - [`Producer`] - write end (single producer per queue)
//! - [`Consumer`] - read end (single consumer per queue)
//! - Lock-free: no mutexes or syscalls anywhere in push/pop
//!
//! # Example
//!
//! ```
//! use corral::spsc;
//!
//! let (producer, consumer) = spsc::channel::<u64>(1024).unwrap();
//!
//! // Producer thread
//! producer.push(42).expect("queue full");
//!
//! // Consumer thread
//! assert_eq!(consumer.pop(), Some(42));
//! ```
//!
//! # Algorithm
//!
//! The element slot itself is the synchronization point: the producer
//! release-stores an element, the consumer acquire-loads it, and a null slot
//! means "nothing here yet". The producer additionally keeps a private
//! look-ahead cache: instead of probing its own slot on every push, it
//! probes `look_ahead_step` slots ahead, and one empty slot there proves the
//! whole stretch up to it is writable (the consumer clears slots in order).
//! That amortizes the cross-thread probe over up to `capacity / 4` pushes.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cell::ProducerCache;
use crate::pow2::{self, CapacityError};
use crate::slots::{self, SlotArray};
use crate::trace::debug;
use crate::{Drain, Progress};

/// Upper bound on the producer's look-ahead distance, in slots.
const MAX_LOOK_AHEAD_STEP: u64 = 4096;

/// Producer-side state: producer index plus the private look-ahead cache.
#[repr(align(64))]
struct ProducerState {
    /// Next logical index to write. Written by the producer, read by anyone.
    index: AtomicU64,
    /// Highest index known writable without re-probing a slot.
    /// Owned by the producer; never read across threads.
    look_ahead: ProducerCache<u64>,
}

/// Consumer-side state, padded onto its own cache line.
#[repr(align(64))]
struct ConsumerState {
    /// Next logical index to read. Written by the consumer, read by anyone.
    index: AtomicU64,
}

struct SpscRing<T> {
    producer: ProducerState,
    consumer: ConsumerState,
    slots: SlotArray<T>,
    look_ahead_step: u64,
}

impl<T> SpscRing<T> {
    fn with_capacity(requested: usize) -> Result<Self, CapacityError> {
        let capacity = pow2::round_to_power_of_two(requested)?;
        Ok(Self {
            producer: ProducerState {
                index: AtomicU64::new(0),
                look_ahead: ProducerCache::new(0),
            },
            consumer: ConsumerState {
                index: AtomicU64::new(0),
            },
            look_ahead_step: (capacity as u64 / 4).min(MAX_LOOK_AHEAD_STEP),
            slots: SlotArray::new(capacity),
        })
    }

    /// Attempts to push an item.
    ///
    /// # Safety
    ///
    /// Caller must ensure only one thread at a time calls this (single
    /// producer).
    #[inline]
    unsafe fn push(&self, value: T) -> Result<(), T> {
        let buffer = self.slots.slots();
        let mask = self.slots.mask();
        // Producer-owned counter; plain load is this thread re-reading it.
        let index = self.producer.index.load(Ordering::Relaxed);
        let offset = slots::offset(index, mask);

        // SAFETY: the look-ahead cache is producer-owned and the caller
        // guarantees we are the only producer.
        let look_ahead = unsafe { self.producer.look_ahead.read() };
        if index >= look_ahead {
            let step = self.look_ahead_step;
            if slots::load_acquire(buffer, slots::offset(index + step, mask)).is_none() {
                // The consumer clears slots in order, so an empty slot
                // `step` ahead proves every slot up to it is empty too.
                // SAFETY: producer-owned cache, as above.
                unsafe { self.producer.look_ahead.write(index + step) };
            } else if slots::load_acquire(buffer, offset).is_some() {
                return Err(value);
            }
        }

        // SAFETY: the slot at `offset` was observed empty and the consumer
        // never writes elements, so the fresh cell is the sole occupant.
        unsafe { slots::store_release(buffer, offset, Some(slots::into_element(value))) };
        self.producer.index.store(index + 1, Ordering::Release);
        Ok(())
    }

    /// Attempts to pop an item.
    ///
    /// # Safety
    ///
    /// Caller must ensure only one thread at a time calls this (single
    /// consumer).
    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        let buffer = self.slots.slots();
        // Consumer-owned counter; plain load is this thread re-reading it.
        let index = self.consumer.index.load(Ordering::Relaxed);
        let offset = self.slots.offset_of(index);

        let element = slots::load_acquire(buffer, offset)?;
        // SAFETY: clearing the consumed slot; the element pointer now lives
        // only on this stack.
        unsafe { slots::store_release(buffer, offset, None) };
        self.consumer.index.store(index + 1, Ordering::Release);
        // SAFETY: the acquire load observed a fully published element, and
        // the slot no longer references it; unique consumption.
        Some(unsafe { slots::from_element(element) })
    }
}

impl<T> Progress for SpscRing<T> {
    #[inline]
    fn producer_index(&self) -> u64 {
        self.producer.index.load(Ordering::Acquire)
    }

    #[inline]
    fn consumer_index(&self) -> u64 {
        self.consumer.index.load(Ordering::Acquire)
    }
}

// SAFETY: the ring owns elements of T behind atomic slots; moving the whole
// ring between threads is sound whenever T is.
unsafe impl<T: Send> Send for SpscRing<T> {}
// SAFETY: cross-thread access is mediated by the atomic indices and slots;
// the single-producer/single-consumer contract is enforced by the endpoint
// handle types below.
unsafe impl<T: Send> Sync for SpscRing<T> {}

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the SPSC queue.
///
/// # Thread safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]: it can move to another
/// thread, but `&Producer` cannot be shared, so exactly one thread pushes
/// at a time.
pub struct Producer<T: Send> {
    ring: Arc<SpscRing<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the SPSC queue.
///
/// Same thread-safety shape as [`Producer`]: one thread pops at a time.
pub struct Consumer<T: Send> {
    ring: Arc<SpscRing<T>>,
    _unsync: PhantomUnsync,
}

/// Creates an SPSC queue and returns its endpoint pair.
///
/// `capacity` is rounded up to the next power of two.
///
/// # Errors
///
/// Returns a [`CapacityError`] if `capacity` is zero or too large to round.
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
    let ring = Arc::new(SpscRing::with_capacity(capacity)?);
    debug!(
        requested = capacity,
        capacity = ring.slots.capacity(),
        "spsc channel created"
    );

    let producer = Producer {
        ring: Arc::clone(&ring),
        _unsync: PhantomData,
    };
    let consumer = Consumer {
        ring,
        _unsync: PhantomData,
    };
    Ok((producer, consumer))
}

impl<T: Send> Producer<T> {
    /// Attempts to push an item.
    ///
    /// # Errors
    ///
    /// Returns `Err(item)` if the queue is full, allowing retry.
    #[inline]
    pub fn push(&self, item: T) -> Result<(), T> {
        // SAFETY: this handle is neither Sync nor Clone, so it is the only
        // producer; the ring was initialized at construction.
        unsafe { self.ring.push(item) }
    }

    /// The fixed power-of-two capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item; `None` if the queue is empty.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        // SAFETY: this handle is neither Sync nor Clone, so it is the only
        // consumer; the ring was initialized at construction.
        unsafe { self.ring.pop() }
    }

    /// The fixed power-of-two capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }
}

impl<T: Send> Progress for Producer<T> {
    fn producer_index(&self) -> u64 {
        self.ring.producer_index()
    }

    fn consumer_index(&self) -> u64 {
        self.ring.consumer_index()
    }
}

impl<T: Send> Progress for Consumer<T> {
    fn producer_index(&self) -> u64 {
        self.ring.producer_index()
    }

    fn consumer_index(&self) -> u64 {
        self.ring.consumer_index()
    }
}

impl<T: Send> crate::Bounded for Producer<T> {
    fn capacity(&self) -> usize {
        Producer::capacity(self)
    }
}

impl<T: Send> crate::Bounded for Consumer<T> {
    fn capacity(&self) -> usize {
        Consumer::capacity(self)
    }
}

impl<T: Send> Drain<T> for Consumer<T> {
    fn pop(&self) -> Option<T> {
        Consumer::pop(self)
    }
}

impl<T: Send> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("spsc::Producer")
    }
}

impl<T: Send> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("spsc::Consumer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Occupancy;

    #[test]
    fn test_basic_push_pop() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        assert!(producer.push(42).is_ok());
        assert_eq!(consumer.pop(), Some(42));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_multiple_items_in_order() {
        let (producer, consumer) = channel::<u64>(16).unwrap();

        for i in 0..10 {
            assert!(producer.push(i).is_ok());
        }

        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }

        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_queue_full() {
        let (producer, consumer) = channel::<u64>(4).unwrap();

        for i in 0..4 {
            assert!(producer.push(i).is_ok(), "failed to push item {i}");
        }

        assert_eq!(producer.push(999), Err(999));

        assert_eq!(consumer.pop(), Some(0));
        assert!(producer.push(4).is_ok());
        assert_eq!(producer.push(1000), Err(1000));
    }

    #[test]
    fn test_capacity_rounds_up() {
        let (producer, consumer) = channel::<u64>(5).unwrap();
        assert_eq!(producer.capacity(), 8);
        assert_eq!(consumer.capacity(), 8);

        for i in 0..8 {
            assert!(producer.push(i).is_ok());
        }
        assert!(producer.push(8).is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(channel::<u64>(0).unwrap_err(), CapacityError::Zero);
    }

    #[test]
    fn test_wrapping_behavior() {
        let (producer, consumer) = channel::<u64>(4).unwrap();

        for round in 0..5 {
            for i in 0..4 {
                assert!(producer.push(round * 10 + i).is_ok());
            }
            for i in 0..4 {
                assert_eq!(consumer.pop(), Some(round * 10 + i));
            }
            assert_eq!(consumer.pop(), None);
        }
    }

    #[test]
    fn test_interleaved_operations() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        producer.push(1).unwrap();
        producer.push(2).unwrap();
        assert_eq!(consumer.pop(), Some(1));
        producer.push(3).unwrap();
        assert_eq!(consumer.pop(), Some(2));
        assert_eq!(consumer.pop(), Some(3));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_progress_and_len() {
        let (producer, consumer) = channel::<u64>(8).unwrap();

        assert!(consumer.is_empty());
        assert_eq!(consumer.len(), 0);

        for i in 0..5 {
            producer.push(i).unwrap();
        }
        assert_eq!(producer.producer_index(), 5);
        assert_eq!(producer.consumer_index(), 0);
        assert_eq!(consumer.len(), 5);
        assert!(!consumer.is_empty());

        consumer.pop().unwrap();
        assert_eq!(consumer.consumer_index(), 1);
        assert_eq!(consumer.len(), 4);
    }

    #[test]
    fn test_clear_drains_everything() {
        let (producer, consumer) = channel::<u64>(8).unwrap();
        for i in 0..6 {
            producer.push(i).unwrap();
        }

        consumer.clear();
        assert!(consumer.is_empty());
        assert_eq!(consumer.len(), 0);
        assert_eq!(consumer.pop(), None);
        // The slots really are free again.
        for i in 0..8 {
            assert!(producer.push(i).is_ok());
        }
    }

    #[test]
    fn test_send_to_thread() {
        let (producer, consumer) = channel::<u64>(16).unwrap();

        let handle = std::thread::spawn(move || {
            for i in 0..10 {
                producer.push(i).unwrap();
            }
        });
        handle.join().unwrap();

        for i in 0..10 {
            assert_eq!(consumer.pop(), Some(i));
        }
    }

    #[test]
    fn test_concurrent_push_pop_is_fifo() {
        let (producer, consumer) = channel::<u64>(64).unwrap();
        let count = 10_000u64;

        let producer_handle = std::thread::spawn(move || {
            for i in 0..count {
                let mut item = i;
                while let Err(returned) = producer.push(item) {
                    item = returned;
                    std::hint::spin_loop();
                }
            }
        });

        let consumer_handle = std::thread::spawn(move || {
            let mut received = Vec::with_capacity(count as usize);
            while received.len() < count as usize {
                if let Some(item) = consumer.pop() {
                    received.push(item);
                } else {
                    std::hint::spin_loop();
                }
            }
            received
        });

        producer_handle.join().unwrap();
        let received = consumer_handle.join().unwrap();

        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }

    #[test]
    fn test_non_copy_type() {
        let (producer, consumer) = channel::<String>(8).unwrap();

        producer.push("hello".to_string()).unwrap();
        producer.push("world".to_string()).unwrap();

        assert_eq!(consumer.pop(), Some("hello".to_string()));
        assert_eq!(consumer.pop(), Some("world".to_string()));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_dropping_queue_drops_elements() {
        use std::sync::atomic::AtomicUsize;

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (producer, consumer) = channel::<Tracked>(8).unwrap();
        for _ in 0..5 {
            assert!(producer.push(Tracked(Arc::clone(&drops))).is_ok());
        }
        drop(consumer.pop());
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        drop(producer);
        drop(consumer);
        assert_eq!(drops.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_debug_is_just_the_type_name() {
        let (producer, consumer) = channel::<u64>(4).unwrap();
        assert_eq!(format!("{producer:?}"), "spsc::Producer");
        assert_eq!(format!("{consumer:?}"), "spsc::Consumer");
    }
}
