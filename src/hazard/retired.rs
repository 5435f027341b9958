//! Retired pointers and the per-thread lists that hold them
//!
//! Each thread keeps one retired list per hazard-pointer domain it has
//! retired into. Lists live in thread-local storage; when that storage has
//! already been torn down the helpers report failure instead of panicking so
//! callers can degrade to leaking.

use std::cell::RefCell;

/// A logically deleted pointer waiting until no hazard record publishes it
pub(crate) struct RetiredPtr {
    addr: *mut (),
    reclaim: Box<dyn FnOnce(*mut ()) + Send>,
}

// SAFETY: retiring transfers ownership of the pointee to the reclamation
// machinery. `retire_ptr` requires the deleter to be `Send` and the pointee to
// be safe to destroy from any thread, so moving the record between threads
// (through a hazard record's leftover queue) is sound.
unsafe impl Send for RetiredPtr {}

impl RetiredPtr {
    /// Bundle `ptr` with its type-erased destruction closure
    pub(crate) fn new<T, D>(ptr: *mut T, deleter: D) -> Self
    where
        T: 'static,
        D: FnOnce(*mut T) + Send + 'static,
    {
        Self {
            addr: ptr.cast(),
            reclaim: Box::new(move |addr: *mut ()| deleter(addr.cast::<T>())),
        }
    }

    /// Address compared against published hazard pointers
    pub(crate) fn addr(&self) -> *mut () {
        self.addr
    }

    /// Run the deleter
    pub(crate) fn reclaim(self) {
        (self.reclaim)(self.addr);
    }
}

impl std::fmt::Debug for RetiredPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetiredPtr").field("addr", &self.addr).finish()
    }
}

/// Retired pointers owned by one thread for one domain
pub(crate) type RetiredList = Vec<RetiredPtr>;

#[derive(Default)]
struct LocalRetired {
    lists: Vec<(u64, RetiredList)>,
}

impl LocalRetired {
    fn list_mut(&mut self, domain_id: u64) -> &mut RetiredList {
        let index = match self.lists.iter().position(|(id, _)| *id == domain_id) {
            Some(index) => index,
            None => {
                self.lists.push((domain_id, RetiredList::new()));
                self.lists.len() - 1
            }
        };
        &mut self.lists[index].1
    }

    fn remove(&mut self, domain_id: u64) -> RetiredList {
        match self.lists.iter().position(|(id, _)| *id == domain_id) {
            Some(index) => self.lists.swap_remove(index).1,
            None => RetiredList::new(),
        }
    }
}

impl Drop for LocalRetired {
    fn drop(&mut self) {
        let pending: usize = self.lists.iter().map(|(_, list)| list.len()).sum();
        if pending > 0 {
            crate::internal_warn!(
                "thread exited with {pending} retired pointers without retiring from its hazard domains; they will leak"
            );
        }
    }
}

thread_local! {
    static LOCAL_RETIRED: RefCell<LocalRetired> = RefCell::new(LocalRetired::default());
}

/// Append to the calling thread's list and return its new length
///
/// Gives the pointer back when thread-local storage is gone.
pub(crate) fn push_local(domain_id: u64, retired: RetiredPtr) -> Result<usize, RetiredPtr> {
    let mut pending = Some(retired);
    let len = LOCAL_RETIRED.try_with(|local| {
        let mut local = local.borrow_mut();
        let list = local.list_mut(domain_id);
        list.extend(pending.take());
        list.len()
    });
    match (len, pending) {
        (Ok(len), _) => Ok(len),
        (Err(_), Some(retired)) => Err(retired),
        (Err(_), None) => Ok(0),
    }
}

/// Move every entry of `entries` into the calling thread's list
///
/// Gives the entries back when thread-local storage is gone.
pub(crate) fn extend_local(domain_id: u64, entries: RetiredList) -> Result<(), RetiredList> {
    let mut pending = Some(entries);
    let stored = LOCAL_RETIRED.try_with(|local| {
        if let Some(entries) = pending.take() {
            local.borrow_mut().list_mut(domain_id).extend(entries);
        }
    });
    match (stored, pending) {
        (Err(_), Some(entries)) => Err(entries),
        _ => Ok(()),
    }
}

/// Detach the calling thread's list, leaving an empty one behind
pub(crate) fn take_local(domain_id: u64) -> Option<RetiredList> {
    LOCAL_RETIRED
        .try_with(|local| std::mem::take(local.borrow_mut().list_mut(domain_id)))
        .ok()
}

/// Detach the calling thread's list and forget the domain entry
pub(crate) fn remove_local(domain_id: u64) -> Option<RetiredList> {
    LOCAL_RETIRED
        .try_with(|local| local.borrow_mut().remove(domain_id))
        .ok()
}

/// Number of entries in the calling thread's list
pub(crate) fn local_len(domain_id: u64) -> usize {
    LOCAL_RETIRED
        .try_with(|local| {
            local
                .borrow()
                .lists
                .iter()
                .find(|(id, _)| *id == domain_id)
                .map_or(0, |(_, list)| list.len())
        })
        .unwrap_or(0)
}
