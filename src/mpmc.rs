//! Lock-free MPMC queue over the shared slot array.
//!
//! A bounded multi-producer multi-consumer queue. Both sides contend on
//! their index with CAS, coordinated through a per-slot sequence array.
//!
//! # Algorithm
//!
//! Alongside the element slots sits an array of sequence counters, seeded
//! with each slot's own offset:
//!
//! - a producer may claim index `i` when `seq == i`; after writing the
//!   element it publishes `seq = i + 1`
//! - a consumer may claim index `i` when `seq == i + 1`; after taking the
//!   element it releases the slot with `seq = i + capacity`, which is the
//!   claim condition for the producer that next wraps onto it
//!
//! The sequence handshake orders the element accesses: the producer writes
//! the element before its sequence release-store, and a claimant's acquire
//! read of the sequence therefore observes the element write, so the
//! element itself needs no stronger load than plain after a claim.
//!
//! # Weak pop
//!
//! `pop` reports "no element" when the consumer index catches up with the
//! producer index. Under contention that view can be momentarily stale, so
//! a `None` does not prove the queue was empty at any single instant; the
//! drain loop in [`Drain::clear`] re-tests emptiness for exactly this
//! reason.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pow2::{self, CapacityError};
use crate::slots::{self, SlotArray};
use crate::trace::debug;
use crate::{Drain, Progress};

/// Producer-side index, padded onto its own cache line.
#[repr(align(64))]
struct ProducerState {
    index: AtomicU64,
}

/// Consumer-side index, padded onto its own cache line.
#[repr(align(64))]
struct ConsumerState {
    index: AtomicU64,
}

struct MpmcRing<T> {
    producer: ProducerState,
    consumer: ConsumerState,
    /// Per-slot claim state; same length and masking as the element slots.
    sequence: Box<[AtomicU64]>,
    slots: SlotArray<T>,
}

impl<T> MpmcRing<T> {
    fn with_capacity(requested: usize) -> Result<Self, CapacityError> {
        // The sequence handshake needs one slot of slack between the two
        // sides, so two slots is the floor.
        let capacity = pow2::round_to_power_of_two(requested)?.max(2);
        let sequence = (0..capacity as u64).map(AtomicU64::new).collect();
        Ok(Self {
            producer: ProducerState {
                index: AtomicU64::new(0),
            },
            consumer: ConsumerState {
                index: AtomicU64::new(0),
            },
            sequence,
            slots: SlotArray::new(capacity),
        })
    }

    /// Attempts to push an item. Safe for any number of concurrent callers.
    #[inline]
    fn push(&self, value: T) -> Result<(), T> {
        let mask = self.slots.mask();
        let capacity = mask + 1;
        let mut index;
        let mut offset;
        loop {
            index = self.producer.index.load(Ordering::Acquire);
            offset = slots::offset(index, mask);
            let seq = self.sequence[offset].load(Ordering::Acquire);

            if seq == index {
                // Slot released for this cycle; race other producers for it.
                if self
                    .producer
                    .index
                    .compare_exchange_weak(index, index + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else if seq < index {
                // Not yet released by a consumer: full, unless the sequence
                // read was stale and the consumer side has moved on.
                if index >= self.consumer.index.load(Ordering::Acquire) + capacity {
                    return Err(value);
                }
            }
            // seq > index: another producer already owns this cycle of the
            // slot; retry with a fresh producer index.
        }

        // Index `index` is claimed exclusively; publish element, then slot.
        // SAFETY: `seq == index` meant the previous cycle's element was
        // taken and the slot cleared, and the claim is exclusive.
        unsafe { slots::store_release(self.slots.slots(), offset, Some(slots::into_element(value))) };
        self.sequence[offset].store(index + 1, Ordering::Release);
        Ok(())
    }

    /// Attempts to pop an item. Safe for any number of concurrent callers.
    #[inline]
    fn pop(&self) -> Option<T> {
        let mask = self.slots.mask();
        let capacity = mask + 1;
        let mut index;
        let mut offset;
        loop {
            index = self.consumer.index.load(Ordering::Acquire);
            offset = slots::offset(index, mask);
            let seq = self.sequence[offset].load(Ordering::Acquire);
            let published = index + 1;

            if seq == published {
                if self
                    .consumer
                    .index
                    .compare_exchange_weak(index, index + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
            } else if seq < published {
                // Nothing published in this slot's current cycle. Empty if
                // the producer side agrees; its view may already be stale
                // by the return, which is the documented weak-pop case.
                if index == self.producer.index.load(Ordering::Acquire) {
                    return None;
                }
            }
            // seq > published: another consumer already took this cycle;
            // retry with a fresh consumer index.
        }

        let buffer = self.slots.slots();
        let element = slots::load_plain(buffer, offset);
        // SAFETY: the sequence acquire observed `index + 1`, which the
        // producer publishes only after its element store, so the slot is
        // non-null and fully visible.
        let element = unsafe { element.unwrap_unchecked() };

        // Clear the slot, then release it to the producer that next wraps
        // onto it.
        // SAFETY: the element pointer now lives only on this stack.
        unsafe { slots::store_release(buffer, offset, None) };
        self.sequence[offset].store(index + capacity, Ordering::Release);
        // SAFETY: unique consumption of the claimed element.
        Some(unsafe { slots::from_element(element) })
    }
}

impl<T> Progress for MpmcRing<T> {
    #[inline]
    fn producer_index(&self) -> u64 {
        self.producer.index.load(Ordering::Acquire)
    }

    #[inline]
    fn consumer_index(&self) -> u64 {
        self.consumer.index.load(Ordering::Acquire)
    }
}

// SAFETY: as for the other rings; element handoff goes through the atomic
// slots under the sequence protocol.
unsafe impl<T: Send> Send for MpmcRing<T> {}
// SAFETY: both push and pop tolerate any number of concurrent callers, so
// the ring can be shared freely once T is Send.
unsafe impl<T: Send> Sync for MpmcRing<T> {}

/// Write end of the MPMC queue. Cloneable and shareable.
pub struct Producer<T: Send> {
    ring: Arc<MpmcRing<T>>,
}

/// Read end of the MPMC queue. Cloneable and shareable.
pub struct Consumer<T: Send> {
    ring: Arc<MpmcRing<T>>,
}

/// Creates an MPMC queue and returns its endpoint pair.
///
/// `capacity` is rounded up to the next power of two, with a floor of two
/// slots. Clone each endpoint once per thread using it.
///
/// # Errors
///
/// Returns a [`CapacityError`] if `capacity` is zero or too large to round.
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
    let ring = Arc::new(MpmcRing::with_capacity(capacity)?);
    debug!(
        requested = capacity,
        capacity = ring.slots.capacity(),
        "mpmc channel created"
    );

    let producer = Producer {
        ring: Arc::clone(&ring),
    };
    let consumer = Consumer { ring };
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
        self.ring.push(item)
    }

    /// The fixed power-of-two capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to pop an item; `None` if no element is available.
    ///
    /// Under contention a `None` can be momentarily stale; see the module
    /// docs.
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<T> {
        self.ring.pop()
    }

    /// The fixed power-of-two capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.slots.capacity()
    }
}

impl<T: Send> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T: Send> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
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
        f.pad("mpmc::Producer")
    }
}

impl<T: Send> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("mpmc::Consumer")
    }
}
