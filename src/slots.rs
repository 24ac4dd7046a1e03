//! Fixed slot array with ordering-qualified access.
//!
//! This module is the shared foundation of every queue in the crate: a
//! power-of-two-sized array of element slots, wraparound index arithmetic,
//! and a small vocabulary of memory-ordering-qualified slot accessors. The
//! topology modules ([`crate::spsc`], [`crate::mpsc`], [`crate::mpmc`])
//! supply their own index-advancement protocols on top of it; the accessors
//! here guarantee only the ordering of the single slot access they perform.
//!
//! # Slots and the empty sentinel
//!
//! Each slot holds either the null pointer ("empty") or a pointer to a heap
//! cell produced by [`into_element`]. Because every stored element is a real
//! heap cell, no user value can ever collide with the sentinel, and the
//! accessor API speaks [`Option<NonNull<T>>`]: `None` is structurally
//! distinct from any stored element.
//!
//! # Access modes
//!
//! | accessor          | ordering  | use |
//! |-------------------|-----------|-----|
//! | [`load_plain`]    | `Relaxed` | owning thread re-reading a slot it alone operates on |
//! | [`load_acquire`]  | `Acquire` | consuming a slot published by another thread |
//! | [`store_plain`]   | `Release` | bookkeeping writes not relied on for handoff (see below) |
//! | [`store_release`] | `Release` | publishing an element, or a cleared slot |
//! | [`store_fenced`]  | `SeqCst`  | a store that must be a total-order point |
//!
//! `store_plain` is deliberately as strong as `store_release`: the plain
//! mode records intent only, and stays on the conservative release store
//! until profiling shows a relaxed store is worth providing for real.
//!
//! Each accessor exists as a free function over an explicit `&[AtomicPtr<T>]`
//! (so hot paths can resolve the array reference once per operation) and as a
//! method on [`SlotArray`] that defaults to the instance's own slots.
//!
//! # Safety
//!
//! Loads are safe: they hand out pointers without dereferencing them. Stores
//! are `unsafe` because a slot owns whatever element pointer it holds — see
//! the per-function contracts.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// Fixed-length array of element slots addressed by masking a monotonic
/// 64-bit logical index onto the physical range.
///
/// Allocated once at construction and never resized. The array is shared by
/// every producer and consumer thread of the owning queue for its whole
/// lifetime; which thread may touch which slot, and when, is entirely the
/// topology protocol's business.
pub struct SlotArray<T> {
    slots: Box<[AtomicPtr<T>]>,
    mask: u64,
}

impl<T> SlotArray<T> {
    /// Allocates an array of `capacity` empty slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two; callers normalize through
    /// [`crate::pow2::round_to_power_of_two`] first.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "slot count must be a power of two");
        let slots = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            slots,
            mask: capacity as u64 - 1,
        }
    }

    /// Number of slots; always `mask + 1` and a power of two.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The wraparound mask, `capacity - 1`.
    #[inline]
    #[must_use]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// The raw slots, for hot paths that resolve the array once per
    /// operation and then use the free-function accessors.
    #[inline]
    #[must_use]
    pub fn slots(&self) -> &[AtomicPtr<T>] {
        &self.slots
    }

    /// Physical offset of a logical index in this array.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, index: u64) -> usize {
        offset(index, self.mask)
    }

    /// [`load_plain`] on this array.
    #[inline]
    pub fn load_plain(&self, offset: usize) -> Option<NonNull<T>> {
        load_plain(&self.slots, offset)
    }

    /// [`load_acquire`] on this array.
    #[inline]
    pub fn load_acquire(&self, offset: usize) -> Option<NonNull<T>> {
        load_acquire(&self.slots, offset)
    }

    /// [`store_plain`] on this array.
    ///
    /// # Safety
    ///
    /// Same contract as [`store_plain`].
    #[inline]
    pub unsafe fn store_plain(&self, offset: usize, element: Option<NonNull<T>>) {
        // SAFETY: forwarded caller contract.
        unsafe { store_plain(&self.slots, offset, element) }
    }

    /// [`store_release`] on this array.
    ///
    /// # Safety
    ///
    /// Same contract as [`store_release`].
    #[inline]
    pub unsafe fn store_release(&self, offset: usize, element: Option<NonNull<T>>) {
        // SAFETY: forwarded caller contract.
        unsafe { store_release(&self.slots, offset, element) }
    }

    /// [`store_fenced`] on this array.
    ///
    /// # Safety
    ///
    /// Same contract as [`store_fenced`].
    #[inline]
    pub unsafe fn store_fenced(&self, offset: usize, element: Option<NonNull<T>>) {
        // SAFETY: forwarded caller contract.
        unsafe { store_fenced(&self.slots, offset, element) }
    }
}

impl<T> Drop for SlotArray<T> {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            let raw = *slot.get_mut();
            if !raw.is_null() {
                // SAFETY: a non-null slot holds an element from into_element
                // that no pop consumed; `&mut self` rules out concurrent
                // access, so reclaiming it here is the unique reclamation.
                drop(unsafe { Box::from_raw(raw) });
            }
        }
    }
}

// SAFETY: slots are atomics and every element pointer they hold refers to a
// heap cell whose T is Send; the array can move between threads with them.
unsafe impl<T: Send> Send for SlotArray<T> {}
// SAFETY: all shared mutation goes through the atomic slots; cross-thread
// element handoff is sound for any Send payload.
unsafe impl<T: Send> Sync for SlotArray<T> {}

/// Physical offset of `index` in an array with the given power-of-two mask.
///
/// Pure and total: every 64-bit index pattern maps to an in-range offset.
#[inline]
#[must_use]
pub fn offset(index: u64, mask: u64) -> usize {
    (index & mask) as usize
}

/// Plain load of a slot: no cross-thread ordering guarantee.
///
/// For the owning thread re-reading a slot it alone is responsible for
/// within one logical operation.
#[inline]
pub fn load_plain<T>(slots: &[AtomicPtr<T>], offset: usize) -> Option<NonNull<T>> {
    NonNull::new(slots[offset].load(Ordering::Relaxed))
}

/// Acquire load of a slot: observes any element (and everything sequenced
/// before it) that another thread release-stored to this slot.
#[inline]
pub fn load_acquire<T>(slots: &[AtomicPtr<T>], offset: usize) -> Option<NonNull<T>> {
    NonNull::new(slots[offset].load(Ordering::Acquire))
}

/// Plain store of a slot.
///
/// Currently performs a release store (see the module docs); callers must
/// not rely on it for cross-thread handoff regardless.
///
/// # Safety
///
/// `element` must be `None` or a pointer from [`into_element`] that nothing
/// else owns; the slot takes ownership of it. Overwriting a non-null slot
/// leaks the previous element, so the topology protocol must ensure the
/// slot is empty or its element already consumed.
#[inline]
pub unsafe fn store_plain<T>(slots: &[AtomicPtr<T>], offset: usize, element: Option<NonNull<T>>) {
    // SAFETY: forwarded caller contract.
    unsafe { store_release(slots, offset, element) }
}

/// Release store of a slot: publishes the element so that a subsequent
/// acquire load by another thread observes it and everything sequenced
/// before this store.
///
/// # Safety
///
/// Same ownership contract as [`store_plain`].
#[inline]
pub unsafe fn store_release<T>(slots: &[AtomicPtr<T>], offset: usize, element: Option<NonNull<T>>) {
    slots[offset].store(as_raw(element), Ordering::Release);
}

/// Sequentially consistent store of a slot: a release store that is also a
/// total-order point, for the rare protocol step where release alone cannot
/// pair with a concurrently fenced read elsewhere.
///
/// # Safety
///
/// Same ownership contract as [`store_plain`].
#[inline]
pub unsafe fn store_fenced<T>(slots: &[AtomicPtr<T>], offset: usize, element: Option<NonNull<T>>) {
    slots[offset].store(as_raw(element), Ordering::SeqCst);
}

#[inline]
fn as_raw<T>(element: Option<NonNull<T>>) -> *mut T {
    element.map_or(ptr::null_mut(), NonNull::as_ptr)
}

/// Moves a value into a heap cell ready to be stored in a slot.
#[inline]
#[must_use]
pub fn into_element<T>(value: T) -> NonNull<T> {
    // SAFETY: Box::into_raw never returns null.
    unsafe { NonNull::new_unchecked(Box::into_raw(Box::new(value))) }
}

/// Reclaims a heap cell and returns its value.
///
/// # Safety
///
/// `element` must come from [`into_element`] and must not be reclaimed (or
/// left reachable from a slot) afterwards; this is the unique consumption
/// of that cell.
#[inline]
pub unsafe fn from_element<T>(element: NonNull<T>) -> T {
    // SAFETY: unique ownership per the caller contract.
    unsafe { *Box::from_raw(element.as_ptr()) }
}
