//! The hazard-pointer domain
//!
//! Michael, Maged M. "Hazard Pointers: Safe Memory Reclamation for Lock-Free
//! Objects", IEEE TPDS 15(6), 2004.

use super::record::{HazardRecord, HpRecord};
use super::retired::{self, RetiredList, RetiredPtr};
use std::ptr;
use std::sync::atomic::{fence, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Retired-list length above which `retire` triggers a scan
pub const RETIRED_THRESHOLD: usize = 20;

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL_DOMAIN: OnceLock<Arc<HazardPointerDomain>> = OnceLock::new();

/// Registry of hazard records plus the per-thread retired lists feeding it
///
/// All list mutation is compare-and-set without locks. Record nodes are only
/// freed by [`cleanup`](Self::cleanup), which needs `&mut self`; while the
/// domain is shared, a node's address is stable, so the list head cannot
/// suffer ABA.
///
/// Every thread that retires pointers into a domain should call
/// [`retire_thread`](Self::retire_thread) before exiting. Otherwise its pending
/// retirements are never reclaimed (they leak, nothing is corrupted).
pub struct HazardPointerDomain {
    id: u64,
    head: AtomicPtr<HpRecord>,
    record_count: AtomicUsize,
}

impl HazardPointerDomain {
    /// Create an isolated domain
    pub fn new() -> Self {
        let id = NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed);
        crate::internal_debug!(domain = id, "hazard pointer domain created");
        Self {
            id,
            head: AtomicPtr::new(ptr::null_mut()),
            record_count: AtomicUsize::new(0),
        }
    }

    /// The lazily-initialised process-wide domain
    pub fn global() -> Arc<HazardPointerDomain> {
        Arc::clone(GLOBAL_DOMAIN.get_or_init(|| Arc::new(HazardPointerDomain::new())))
    }

    /// Take ownership of a hazard record
    ///
    /// Reuses a free record when one exists, otherwise allocates a node and
    /// prepends it to the list. Retired pointers left on a reused record by a
    /// departed thread move into the caller's retired list.
    pub fn acquire(&self) -> HazardRecord<'_> {
        HazardRecord::new(self.acquire_record())
    }

    fn acquire_record(&self) -> &HpRecord {
        let mut node = self.head.load(Ordering::Acquire);
        // SAFETY: nodes are only freed by `cleanup`, which requires `&mut self`.
        while let Some(record) = unsafe { node.as_ref() } {
            if record.try_claim() {
                self.adopt_leftover(record);
                return record;
            }
            node = record.next();
        }

        let record: &HpRecord = Box::leak(Box::new(HpRecord::new_active()));
        let raw = record as *const HpRecord as *mut HpRecord;
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            record.next.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, raw, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(current) => head = current,
            }
        }
        let count = self.record_count.fetch_add(1, Ordering::Relaxed) + 1;
        crate::internal_debug!(domain = self.id, records = count, "allocated hazard record");
        record
    }

    fn adopt_leftover(&self, record: &HpRecord) {
        // SAFETY: the caller just claimed `record`.
        let leftover = unsafe { record.take_leftover() };
        if leftover.is_empty() {
            return;
        }
        if let Err(leftover) = retired::extend_local(self.id, leftover) {
            // Thread-local storage is gone; keep them for the next owner.
            // SAFETY: the caller still owns `record`.
            unsafe { record.extend_leftover(leftover) };
        }
    }

    /// Retire a boxed value
    ///
    /// The value is dropped once no hazard record of this domain publishes
    /// its address.
    pub fn retire<T: Send + 'static>(&self, value: Box<T>) {
        let ptr = Box::into_raw(value);
        // SAFETY: `ptr` came from `Box::into_raw` and is handed over exactly once.
        unsafe {
            self.retire_ptr(ptr, |ptr: *mut T| drop(Box::from_raw(ptr)));
        }
    }

    /// Retire a raw pointer with a custom deleter
    ///
    /// Appends `(ptr, deleter)` to the calling thread's retired list and scans
    /// once the list grows past [`RETIRED_THRESHOLD`]. Null pointers are
    /// ignored.
    ///
    /// # Safety
    /// `ptr` must no longer be reachable from shared state, must not be
    /// retired twice, and `deleter` must be safe to run on any thread once no
    /// hazard record protects `ptr`.
    pub unsafe fn retire_ptr<T, D>(&self, ptr: *mut T, deleter: D)
    where
        T: 'static,
        D: FnOnce(*mut T) + Send + 'static,
    {
        if ptr.is_null() {
            return;
        }
        match retired::push_local(self.id, RetiredPtr::new(ptr, deleter)) {
            Ok(len) if len > RETIRED_THRESHOLD => {
                self.scan();
            }
            Ok(_) => {}
            Err(_leaked) => {
                crate::internal_warn!(
                    "thread-local storage already torn down; retired pointer {ptr:p} will leak"
                );
            }
        }
    }

    /// Reclaim every pointer in the calling thread's list that is not hazardous
    ///
    /// Returns how many pointers were reclaimed.
    pub fn scan(&self) -> usize {
        let Some(mut list) = retired::take_local(self.id) else {
            return 0;
        };
        let reclaimed = self.scan_list(&mut list);
        if !list.is_empty() {
            if let Err(remaining) = retired::extend_local(self.id, list) {
                crate::internal_warn!(
                    "thread-local storage torn down during scan; {} retired pointers will leak",
                    remaining.len()
                );
            }
        }
        reclaimed
    }

    /// Snapshot every published hazard pointer, sorted
    fn hazard_snapshot(&self) -> Vec<*mut ()> {
        let mut hazards = Vec::with_capacity(self.record_count.load(Ordering::Relaxed));
        let mut node = self.head.load(Ordering::Acquire);
        // SAFETY: nodes are only freed by `cleanup`, which requires `&mut self`.
        while let Some(record) = unsafe { node.as_ref() } {
            let hazard = record.hazard();
            if !hazard.is_null() {
                hazards.push(hazard);
            }
            node = record.next();
        }
        hazards.sort_unstable();
        hazards
    }

    /// Reclaim the entries of `list` that no record publishes
    ///
    /// Reclaimed entries are removed by swapping with the last element, so
    /// the order of the survivors is not preserved.
    fn scan_list(&self, list: &mut RetiredList) -> usize {
        // Pairs with the SeqCst publication in `HazardRecord::secure`: a
        // reader that published after the pointer was unlinked must see the
        // unlink and retry.
        fence(Ordering::SeqCst);
        let hazards = self.hazard_snapshot();

        let before = list.len();
        let mut index = 0;
        while index < list.len() {
            if hazards.binary_search(&list[index].addr()).is_ok() {
                index += 1;
            } else {
                list.swap_remove(index).reclaim();
            }
        }
        let reclaimed = before - list.len();
        crate::internal_debug!(
            domain = self.id,
            reclaimed,
            remaining = list.len(),
            hazards = hazards.len(),
            "hazard scan finished"
        );
        reclaimed
    }

    /// Hand the calling thread's pending retirements to the record pool
    ///
    /// Runs a scan first, then moves whatever is still hazardous into the
    /// leftover queue of a record that is immediately freed again. The next
    /// thread to acquire that record inherits the entries.
    pub fn retire_thread(&self) {
        self.scan();
        if retired::local_len(self.id) == 0 {
            let _ = retired::remove_local(self.id);
            return;
        }

        let record = self.acquire_record();
        match retired::remove_local(self.id) {
            Some(pending) => {
                crate::internal_debug!(
                    domain = self.id,
                    pending = pending.len(),
                    "handing retired pointers to the record pool"
                );
                // SAFETY: `record` was acquired above and not yet released.
                unsafe { record.extend_leftover(pending) };
            }
            None => {
                crate::internal_warn!(
                    "thread-local storage already torn down while retiring thread"
                );
            }
        }
        record.release();
    }

    /// Free every inactive record and reclaim everything not still hazardous
    ///
    /// Leftover queues of freed records join the calling thread's list for a
    /// final scan. Entries that are still hazardous after that are leaked on
    /// purpose, with a warning, rather than freed while possibly referenced.
    /// Active records are left linked.
    pub fn cleanup(&mut self) {
        let mut inherited = retired::remove_local(self.id).unwrap_or_default();

        let mut node = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        let mut kept: Vec<*mut HpRecord> = Vec::new();
        while !node.is_null() {
            // SAFETY: every node was leaked from a `Box` in `acquire_record`,
            // and `&mut self` guarantees no other thread traverses the list.
            let mut record = unsafe { Box::from_raw(node) };
            node = *record.next.get_mut();
            if *record.active.get_mut() {
                crate::internal_warn!(domain = self.id, "found an active hazard record during cleanup");
                kept.push(Box::into_raw(record));
            } else {
                inherited.append(record.leftover.get_mut());
                self.record_count.fetch_sub(1, Ordering::Relaxed);
            }
        }

        let mut head = ptr::null_mut();
        for &record in kept.iter().rev() {
            // SAFETY: `record` is a live node we just unlinked.
            unsafe { (*record).next.store(head, Ordering::Relaxed) };
            head = record;
        }
        *self.head.get_mut() = head;

        self.scan_list(&mut inherited);
        if !inherited.is_empty() {
            crate::internal_warn!(
                domain = self.id,
                "{} hazard pointers are still active; the referenced objects will leak",
                inherited.len()
            );
        }
    }

    /// Number of records currently linked into the domain
    pub fn record_count(&self) -> usize {
        self.record_count.load(Ordering::Relaxed)
    }

    /// Length of the calling thread's retired list for this domain
    pub fn local_retired_count(&self) -> usize {
        retired::local_len(self.id)
    }
}

impl Default for HazardPointerDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HazardPointerDomain {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl std::fmt::Debug for HazardPointerDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardPointerDomain")
            .field("id", &self.id)
            .field("records", &self.record_count())
            .finish()
    }
}
