//! Hazard-pointer safe memory reclamation
//!
//! A reader publishes the pointer it is about to dereference in a hazard
//! record; a writer that unlinks an object retires it instead of freeing it.
//! Retired objects are destroyed by a scan only once no record publishes
//! their address.
//!
//! ```rust
//! use lockring::hazard::HazardPointerDomain;
//! use std::sync::atomic::{AtomicPtr, Ordering};
//!
//! let domain = HazardPointerDomain::new();
//! let shared = AtomicPtr::new(Box::into_raw(Box::new(1_u32)));
//!
//! // Reader side
//! let record = domain.acquire();
//! let current = record.secure(&shared);
//! // SAFETY: `current` is protected until the record is released.
//! assert_eq!(unsafe { *current }, 1);
//!
//! // Writer side: swap in a replacement and retire the old value
//! let old = shared.swap(Box::into_raw(Box::new(2_u32)), Ordering::SeqCst);
//! // SAFETY: `old` is unreachable from `shared` and retired once.
//! unsafe { domain.retire_ptr(old, |p: *mut u32| drop(Box::from_raw(p))) };
//!
//! record.release_record();
//! domain.scan();
//! domain.retire_thread();
//! # drop(unsafe { Box::from_raw(shared.load(Ordering::SeqCst)) });
//! ```

mod domain;
mod record;
mod retired;

pub use domain::{HazardPointerDomain, RETIRED_THRESHOLD};
pub use record::HazardRecord;
pub(crate) use record::HpRecord;
