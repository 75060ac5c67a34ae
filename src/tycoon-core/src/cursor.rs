use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Server-side cursor identifier (`CUR`)
pub type CursorId = u64;

/// Table of cursor IDs currently held by iterators.
///
/// Cloning yields another handle to the same table. A new ID is always one
/// greater than the largest live ID, so an ID still bound to a server-side
/// cursor is never handed out twice.
#[derive(Clone, Default)]
pub struct CursorRegistry {
    live: Arc<Mutex<BTreeSet<CursorId>>>,
}

impl CursorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> CursorId {
        let mut live = self.live.lock();
        let id = live.last().map_or(1, |max| max + 1);
        live.insert(id);
        tracing::trace!(cursor = id, "allocated cursor");
        id
    }

    /// Remove an ID from the live set; releasing twice is harmless
    pub fn release(&self, id: CursorId) -> bool {
        let released = self.live.lock().remove(&id);
        if released {
            tracing::trace!(cursor = id, "released cursor");
        }
        released
    }

    /// Allocate an ID owned by a guard that releases it on drop
    pub fn lease(&self) -> CursorLease {
        CursorLease {
            id: self.allocate(),
            registry: self.clone(),
        }
    }

    pub fn is_live(&self, id: CursorId) -> bool {
        self.live.lock().contains(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl fmt::Debug for CursorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorRegistry")
            .field("live", &*self.live.lock())
            .finish()
    }
}

/// Exclusive hold on one cursor ID
#[derive(Debug)]
pub struct CursorLease {
    id: CursorId,
    registry: CursorRegistry,
}

impl CursorLease {
    pub fn id(&self) -> CursorId {
        self.id
    }
}

impl Drop for CursorLease {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
