//! Lock-free MPSC queue over the shared slot array.
//!
//! A bounded multi-producer single-consumer queue. Producers contend on the
//! producer index with CAS; the consumer is a single thread.
//!
//! # Algorithm
//!
//! Producers claim a logical index by CAS and then publish the element into
//! the claimed slot with a release store. Claiming is gated by a shared
//! `limit` cache (`consumer index + capacity`): one acquire read of the
//! consumer index is amortized over up to `capacity` claims, so producers
//! mostly stay off the consumer's cache line.
//!
//! Claim and publication are two steps, so the consumer can observe a slot
//! that is claimed but not yet written. When that happens it compares its
//! index against the producer index: if a claim is ahead of it the
//! publication is imminent and the consumer spins for it; otherwise the
//! queue is empty.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pow2::{self, CapacityError};
use crate::slots::{self, SlotArray};
use crate::trace::debug;
use crate::{Drain, Progress};

/// Producer-side state, padded onto its own cache line.
#[repr(align(64))]
struct ProducerState {
    /// Next logical index to claim. Producers CAS this.
    index: AtomicU64,
    /// Cached claim bound: `consumer index + capacity` at the last refresh.
    /// An index below the bound is claimable without reading the consumer
    /// index again.
    limit: AtomicU64,
}

/// Consumer-side state, padded onto its own cache line.
#[repr(align(64))]
struct ConsumerState {
    /// Next logical index to read. Only the consumer writes this.
    index: AtomicU64,
}

struct MpscRing<T> {
    producer: ProducerState,
    consumer: ConsumerState,
    slots: SlotArray<T>,
}

impl<T> MpscRing<T> {
    fn with_capacity(requested: usize) -> Result<Self, CapacityError> {
        let capacity = pow2::round_to_power_of_two(requested)?;
        Ok(Self {
            producer: ProducerState {
                index: AtomicU64::new(0),
                limit: AtomicU64::new(capacity as u64),
            },
            consumer: ConsumerState {
                index: AtomicU64::new(0),
            },
            slots: SlotArray::new(capacity),
        })
    }

    /// Attempts to push an item. Safe for any number of concurrent callers.
    #[inline]
    fn push(&self, value: T) -> Result<(), T> {
        let capacity = self.slots.mask() + 1;
        let mut limit = self.producer.limit.load(Ordering::Acquire);
        let mut index;
        loop {
            index = self.producer.index.load(Ordering::Acquire);
            if index >= limit {
                let consumer = self.consumer.index.load(Ordering::Acquire);
                limit = consumer + capacity;
                if index >= limit {
                    return Err(value);
                }
                // Share the refreshed bound so other producers skip the
                // consumer-index read.
                self.producer.limit.store(limit, Ordering::Release);
            }
            // Relaxed claim: publication order is carried by the element
            // store below, not by the index CAS.
            if self
                .producer
                .index
                .compare_exchange_weak(index, index + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }

        // Index `index` is claimed exclusively; publish into its slot.
        // SAFETY: the limit check proved the consumer is done with this
        // slot, and no other producer can claim the same index.
        unsafe {
            slots::store_release(
                self.slots.slots(),
                self.slots.offset_of(index),
                Some(slots::into_element(value)),
            );
        }
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

        let mut element = slots::load_acquire(buffer, offset);
        if element.is_none() {
            if index == self.producer.index.load(Ordering::Acquire) {
                return None;
            }
            // A producer claimed this index but has not published yet; the
            // store is imminent, so wait it out.
            element = loop {
                if let Some(e) = slots::load_acquire(buffer, offset) {
                    break Some(e);
                }
                std::hint::spin_loop();
            };
        }
        let element = element?;

        // The cleared slot is released to producers by the index store
        // below, so the plain store suffices here.
        // SAFETY: the element pointer now lives only on this stack.
        unsafe { slots::store_plain(buffer, offset, None) };
        self.consumer.index.store(index + 1, Ordering::Release);
        // SAFETY: the acquire load observed a fully published element, and
        // the slot no longer references it; unique consumption.
        Some(unsafe { slots::from_element(element) })
    }
}

impl<T> Progress for MpscRing<T> {
    #[inline]
    fn producer_index(&self) -> u64 {
        self.producer.index.load(Ordering::Acquire)
    }

    #[inline]
    fn consumer_index(&self) -> u64 {
        self.consumer.index.load(Ordering::Acquire)
    }
}

// SAFETY: as for the SPSC ring; element handoff goes through atomic slots.
unsafe impl<T: Send> Send for MpscRing<T> {}
// SAFETY: push is multi-producer tolerant by construction; the
// single-consumer contract is enforced by the Consumer handle type.
unsafe impl<T: Send> Sync for MpscRing<T> {}

/// Marker type to opt out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the MPSC queue.
///
/// Cloneable and shareable: any number of threads may push through any
/// number of `Producer` handles concurrently.
pub struct Producer<T: Send> {
    ring: Arc<MpscRing<T>>,
}

/// Read end of the MPSC queue.
///
/// [`Send`] but **not** [`Sync`] and not cloneable: exactly one thread pops
/// at a time.
pub struct Consumer<T: Send> {
    ring: Arc<MpscRing<T>>,
    _unsync: PhantomUnsync,
}

/// Creates an MPSC queue and returns its endpoint pair.
///
/// `capacity` is rounded up to the next power of two. Clone the
/// [`Producer`] once per producing thread.
///
/// # Errors
///
/// Returns a [`CapacityError`] if `capacity` is zero or too large to round.
pub fn channel<T: Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>), CapacityError> {
    let ring = Arc::new(MpscRing::with_capacity(capacity)?);
    debug!(
        requested = capacity,
        capacity = ring.slots.capacity(),
        "mpsc channel created"
    );

    let producer = Producer {
        ring: Arc::clone(&ring),
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
        self.ring.push(item)
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
        f.pad("mpsc::Producer")
    }
}

impl<T: Send> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("mpsc::Consumer")
    }
}
