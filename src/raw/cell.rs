//! Epoch-protected atomic slots over reference-counted nodes.
//!
//! The trie has exactly three kinds of mutable location: an I-node's main
//! pointer, a main node's `prev` pointer and a map handle's root pointer.
//! Everything else is immutable after publication and shared freely between
//! tree copies and snapshots, so the nodes themselves are `Arc`-allocated.
//!
//! A [`Slot`] is an atomic pointer to such an `Arc`-allocated node and owns
//! exactly one strong count of its pointee. A successful compare-exchange
//! transfers the count of the new value into the slot and releases the count
//! of the displaced value *after the current epoch ends*, so a thread that
//! loaded the old pointer under a still-pinned guard can keep reading it, or
//! promote it to an owning `Arc` with [`arc_from_shared`].

use std::mem;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_epoch::{Atomic, Guard, Shared};

/// An atomic pointer to an `Arc`-allocated `T`, holding one strong count.
///
/// All accesses are sequentially consistent; the protocols built on top
/// (GCAS and RDCSS) are specified against that ordering.
pub(crate) struct Slot<T> {
    inner: Atomic<T>,
}

impl<T> Slot<T> {
    pub fn null() -> Self {
        Slot {
            inner: Atomic::null(),
        }
    }

    /// A slot initially holding `value`, taking over its strong count.
    pub fn new(value: Option<Arc<T>>) -> Self {
        let inner = match value {
            Some(value) => Atomic::from(Arc::into_raw(value) as *const T),
            None => Atomic::null(),
        };
        Slot { inner }
    }

    pub fn load<'g>(&self, guard: &'g Guard) -> Shared<'g, T> {
        self.inner.load(Ordering::SeqCst, guard)
    }

    /// Compare-exchange from `current` to `new`.
    ///
    /// On success the slot takes over `new`'s strong count and schedules the
    /// release of `current`'s for after the grace period. On failure `new`
    /// is dropped right here and the slot is untouched.
    ///
    /// # Safety
    ///
    /// `current` must have been loaded from this slot under `guard`, and
    /// every value ever stored in the slot must be `Arc`-allocated.
    pub unsafe fn compare_exchange<'g>(
        &self,
        current: Shared<'g, T>,
        new: Option<Arc<T>>,
        guard: &'g Guard,
    ) -> bool {
        let new_ptr = match &new {
            Some(arc) => Shared::from(Arc::as_ptr(arc)),
            None => Shared::null(),
        };
        match self
            .inner
            .compare_exchange(current, new_ptr, Ordering::SeqCst, Ordering::SeqCst, guard)
        {
            Ok(_) => {
                // The slot owns the new count now; forgetting the Arc keeps it.
                mem::forget(new);
                if !current.is_null() {
                    defer_release(current, guard);
                }
                true
            }
            Err(_) => false,
        }
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        // We have exclusive access, so the pointee cannot be swapped out
        // under us and the count can be released synchronously.
        let ptr = unsafe {
            self.inner
                .load(Ordering::Relaxed, crossbeam_epoch::unprotected())
        };
        if !ptr.is_null() {
            unsafe { drop(Arc::from_raw(ptr.as_raw())) };
        }
    }
}

/// Clones an owning `Arc` out of a pointer loaded from a [`Slot`].
///
/// # Safety
///
/// `shared` must be non-null, `Arc`-allocated, and loaded under a guard that
/// is still pinned (so the pointee's count cannot have dropped to zero).
pub(crate) unsafe fn arc_from_shared<T>(shared: Shared<'_, T>) -> Arc<T> {
    let ptr = shared.as_raw();
    Arc::increment_strong_count(ptr);
    Arc::from_raw(ptr)
}

/// A borrowed view of an `Arc` as an epoch pointer, for CAS comparisons.
pub(crate) fn shared_from_arc<'g, T>(arc: &Arc<T>) -> Shared<'g, T> {
    Shared::from(Arc::as_ptr(arc))
}

/// Schedules one strong-count release for after the grace period.
///
/// # Safety
///
/// `shared` must be non-null and `Arc`-allocated, and the caller must own
/// the count being released.
pub(crate) unsafe fn defer_release<T>(shared: Shared<'_, T>, guard: &Guard) {
    let ptr = shared.as_raw();
    guard.defer_unchecked(move || drop(Arc::from_raw(ptr)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_transfers_counts() {
        let first = Arc::new(1u32);
        let observer = Arc::clone(&first);
        let slot = Slot::new(Some(first));

        let guard = crossbeam_epoch::pin();
        let current = slot.load(&guard);
        assert_eq!(1, unsafe { *current.deref() });

        assert!(unsafe { slot.compare_exchange(current, Some(Arc::new(2)), &guard) });
        assert_eq!(2, unsafe { *slot.load(&guard).deref() });

        // A stale expected value must not swap.
        assert!(!unsafe { slot.compare_exchange(current, Some(Arc::new(3)), &guard) });
        assert_eq!(2, unsafe { *slot.load(&guard).deref() });

        // The observer keeps the displaced value alive regardless of when
        // the deferred release runs.
        drop(guard);
        assert_eq!(1, *observer);
    }

    #[test]
    fn drop_releases_pointee() {
        let value = Arc::new(7u32);
        let slot = Slot::new(Some(Arc::clone(&value)));
        assert_eq!(2, Arc::strong_count(&value));
        drop(slot);
        assert_eq!(1, Arc::strong_count(&value));
    }
}
