//! Role-marked plain cells for state owned by exactly one protocol side.
//!
//! A `RoleCell` wraps an `UnsafeCell` with a phantom role parameter. The role
//! has no runtime effect; it makes different logical kinds of single-owner
//! cells distinct types so a producer-owned cache cannot be handed to the
//! consumer side by accident.

use std::cell::UnsafeCell;
use std::marker::PhantomData;

/// Marker: state owned exclusively by the producing side of a queue.
pub(crate) struct ProducerRole;

/// Interior-mutable cell tagged with the protocol role that owns it.
#[repr(transparent)]
pub(crate) struct RoleCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T: Copy, Role> RoleCell<T, Role> {
    pub(crate) const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    /// Reads the cell without synchronization.
    ///
    /// # Safety
    ///
    /// Only the single owning role may call this; any other thread reading
    /// concurrently with the owner's writes is a data race.
    #[inline]
    pub(crate) unsafe fn read(&self) -> T {
        // SAFETY: exclusive-role access per the caller contract.
        unsafe { *self.0.get() }
    }

    /// Writes the cell without synchronization.
    ///
    /// # Safety
    ///
    /// Same single-owning-role contract as [`RoleCell::read`].
    #[inline]
    pub(crate) unsafe fn write(&self, value: T) {
        // SAFETY: exclusive-role access per the caller contract.
        unsafe { *self.0.get() = value }
    }
}

// SAFETY: the cell itself provides no synchronization; the owning-role
// contract on read/write guarantees a single accessor, which is what makes
// sharing the containing struct across threads sound.
unsafe impl<T: Send, Role> Sync for RoleCell<T, Role> {}
unsafe impl<T: Send, Role> Send for RoleCell<T, Role> {}

/// Cache cell owned exclusively by the producer side.
pub(crate) type ProducerCache<T> = RoleCell<T, ProducerRole>;
