//! Hazard records: the nodes of a domain's lock-free record list

use super::retired::RetiredList;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

/// One node of the global record list
///
/// A record is either active (owned by exactly one thread) or free (claimable
/// by any thread). Nodes are never freed while the domain is shared, so a
/// pointer to a node stays valid for the domain's lifetime.
pub(crate) struct HpRecord {
    hazard: AtomicPtr<()>,
    pub(super) next: AtomicPtr<HpRecord>,
    pub(super) active: AtomicBool,
    /// Retired pointers inherited from a thread that retired while this
    /// record was free. Only the current owner touches it.
    pub(super) leftover: UnsafeCell<RetiredList>,
}

// SAFETY: every field except `leftover` is atomic. `leftover` is accessed only
// by the thread that won the `active` compare-and-set (acquire) and is handed
// over by the release store in `release`, so there is never concurrent access.
unsafe impl Sync for HpRecord {}

impl HpRecord {
    pub(super) fn new_active() -> Self {
        Self {
            hazard: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(true),
            leftover: UnsafeCell::new(RetiredList::new()),
        }
    }

    /// Claim a free record for the calling thread
    pub(super) fn try_claim(&self) -> bool {
        !self.active.load(Ordering::Relaxed)
            && self
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    pub(super) fn next(&self) -> *mut HpRecord {
        self.next.load(Ordering::Acquire)
    }

    pub(super) fn hazard(&self) -> *mut () {
        self.hazard.load(Ordering::SeqCst)
    }

    fn publish(&self, ptr: *mut ()) {
        self.hazard.store(ptr, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.hazard.store(ptr::null_mut(), Ordering::Release);
    }

    /// Clear the hazard slot and hand the record back to the pool
    pub(super) fn release(&self) {
        self.clear();
        self.active.store(false, Ordering::Release);
    }

    /// Drain the inherited retired pointers
    ///
    /// # Safety
    /// The caller must own the record (it claimed it and has not released it).
    pub(super) unsafe fn take_leftover(&self) -> RetiredList {
        std::mem::take(&mut *self.leftover.get())
    }

    /// Append retired pointers for a future owner to inherit
    ///
    /// # Safety
    /// The caller must own the record (it claimed it and has not released it).
    pub(super) unsafe fn extend_leftover(&self, entries: RetiredList) {
        (*self.leftover.get()).extend(entries);
    }
}

/// A hazard record owned by the calling thread
///
/// Obtained from [`HazardPointerDomain::acquire`](super::HazardPointerDomain::acquire).
/// Dropping the guard clears the hazard slot and returns the record to the
/// pool, exactly like [`release_record`](Self::release_record).
pub struct HazardRecord<'a> {
    record: NonNull<HpRecord>,
    _domain: PhantomData<&'a HpRecord>,
}

// SAFETY: the guard only exposes atomic operations on the record, and the
// record outlives `'a`.
unsafe impl Send for HazardRecord<'_> {}

impl<'a> HazardRecord<'a> {
    pub(super) fn new(record: &'a HpRecord) -> Self {
        Self {
            record: NonNull::from(record),
            _domain: PhantomData,
        }
    }

    fn record(&self) -> &HpRecord {
        // SAFETY: records are only freed by `HazardPointerDomain::cleanup`,
        // which needs exclusive access to the domain borrowed for `'a`.
        unsafe { self.record.as_ref() }
    }

    /// Load `source` and protect the loaded pointer
    ///
    /// Publishes the candidate in the hazard slot and reloads `source` until
    /// both reads agree. Once this returns, the pointee cannot be reclaimed
    /// by the domain until the slot is cleared or overwritten, even if
    /// `source` is swapped and the old pointer retired.
    pub fn secure<T>(&self, source: &AtomicPtr<T>) -> *mut T {
        let record = self.record();
        let mut ptr = source.load(Ordering::Acquire);
        loop {
            record.publish(ptr.cast());
            let current = source.load(Ordering::SeqCst);
            if current == ptr {
                return ptr;
            }
            ptr = current;
        }
    }

    /// Publish `ptr` as hazardous without validation
    ///
    /// The caller is responsible for re-checking that `ptr` is still
    /// reachable after this call before dereferencing it.
    pub fn protect<T>(&self, ptr: *mut T) {
        self.record().publish(ptr.cast());
    }

    /// The currently published pointer, null if none
    pub fn hazard(&self) -> *mut () {
        self.record().hazard()
    }

    /// Clear the hazard slot but keep owning the record
    pub fn release_ptr(&self) {
        self.record().clear();
    }

    /// Clear the hazard slot and return the record to the pool
    pub fn release_record(self) {
        drop(self);
    }

    /// Give up the guard without releasing the record
    pub(crate) fn into_raw(self) -> NonNull<HpRecord> {
        let record = self.record;
        std::mem::forget(self);
        record
    }

    /// Rebuild a guard from [`into_raw`](Self::into_raw)
    ///
    /// # Safety
    /// `record` must come from `into_raw` on a guard of a domain that is still
    /// alive for `'a`, and no other guard may exist for it.
    pub(crate) unsafe fn from_raw(record: NonNull<HpRecord>) -> Self {
        Self {
            record,
            _domain: PhantomData,
        }
    }
}

impl Drop for HazardRecord<'_> {
    fn drop(&mut self) {
        self.record().release();
    }
}

impl std::fmt::Debug for HazardRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardRecord")
            .field("hazard", &self.hazard())
            .finish()
    }
}
