//! # Object Registry
//!
//! Maps small integer handles to live object references, one registry per
//! connected script. Registration deduplicates by object identity so the
//! same object always serializes to the same handle within a session.
//! Handle `0` is reserved for null and never allocated.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;

use crate::value::ObjectRef;

/// Reserved handle meaning "no object".
pub const NULL_HANDLE: u64 = 0;

pub struct ObjectRegistry {
    by_handle: DashMap<u64, ObjectRef>,
    by_identity: DashMap<usize, u64>,
    next: AtomicU64,
}

fn identity(obj: &ObjectRef) -> usize {
    Arc::as_ptr(obj) as *const () as usize
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self {
            by_handle: DashMap::new(),
            by_identity: DashMap::new(),
            next: AtomicU64::new(1),
        }
    }

    /// Register an object, returning its handle. Re-registering the same
    /// object returns the existing handle.
    pub fn register(&self, obj: &ObjectRef) -> u64 {
        let key = identity(obj);
        // Allocation happens under the identity entry lock so concurrent
        // registrations of the same object agree on one handle.
        *self.by_identity.entry(key).or_insert_with(|| {
            let handle = self.next.fetch_add(1, Ordering::Relaxed);
            self.by_handle.insert(handle, Arc::clone(obj));
            handle
        })
    }

    pub fn get(&self, handle: u64) -> Option<ObjectRef> {
        self.by_handle.get(&handle).map(|entry| Arc::clone(&entry))
    }

    /// Drop handles the script no longer holds. Unknown handles are ignored.
    pub fn release(&self, handles: &[u64]) {
        for handle in handles {
            if let Some((_, obj)) = self.by_handle.remove(handle) {
                self.by_identity.remove(&identity(&obj));
            }
        }
    }

    /// Drop everything, used at session teardown.
    pub fn clear(&self) {
        self.by_handle.clear();
        self.by_identity.clear();
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}

impl Default for ObjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}
