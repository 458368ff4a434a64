//! Per-host hold on a local file object (spec section 4.3): associates a
//! host with a file-object identity, pinning it alive and carrying that
//! vhold's server-side sleeping-request list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::sleep_server::SleepingRequest;
use super::vfs::{LocalLockEngine, VfsHandle};

/// A host's hold on one file object. `refcnt` counts in-flight [`VholdTable::lookup`]
/// callers on top of the hold's own creation; a vhold with `refcnt == 0` is a
/// GC candidate, not yet garbage (spec section 3: garbage also requires no
/// remaining remote locks/shares for the host's sysid).
pub struct Vhold {
    pub vp: VfsHandle,
    refcnt: AtomicU32,
    pub(crate) sleeping: Mutex<Vec<SleepingRequest>>,
}

impl Vhold {
    fn new(vp: VfsHandle) -> Arc<Self> {
        Arc::new(Self { vp, refcnt: AtomicU32::new(1), sleeping: Mutex::new(Vec::new()) })
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    pub(crate) fn incref(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Releases one reference taken by a lookup. Does not destroy the
    /// vhold itself — that is strictly a GC decision (spec section 4.3/4.10).
    pub fn decref(&self) {
        self.refcnt.fetch_sub(1, Ordering::AcqRel);
    }
}

/// `true` unless `vhold` is garbage: referenced, still has a blocked
/// request on it, or the local engine still reports a lock/share for this
/// sysid anywhere (the only busy-ness query the collaborator exposes — see
/// [`LocalLockEngine::has_locks`]'s doc comment).
pub async fn vhold_busy(vhold: &Vhold, sysid: u32, engine: &dyn LocalLockEngine) -> bool {
    if vhold.refcnt() > 0 {
        return true;
    }
    if !vhold.sleeping.lock().await.is_empty() {
        return true;
    }
    engine.has_locks(sysid).await
}

/// Per-host table: file-object identity -> vhold.
#[derive(Default)]
pub struct VholdTable {
    by_vp: HashMap<VfsHandle, Arc<Vhold>>,
}

impl VholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an existing vhold for `vp`, bumping its refcount.
    pub fn lookup(&self, vp: &VfsHandle) -> Option<Arc<Vhold>> {
        let existing = self.by_vp.get(vp)?;
        existing.incref();
        Some(existing.clone())
    }

    /// Inserts a freshly-allocated candidate vhold for `vp`, unless a racing
    /// caller already inserted one first — in which case the candidate is
    /// discarded and the existing entry's refcount is bumped instead
    /// (spec section 4.3: "free the surplus if any").
    pub fn insert_or_get(&mut self, vp: VfsHandle, candidate: Arc<Vhold>) -> Arc<Vhold> {
        if let Some(existing) = self.by_vp.get(&vp) {
            existing.incref();
            return existing.clone();
        }
        self.by_vp.insert(vp, candidate.clone());
        candidate
    }

    /// Builds a brand-new, unshared vhold for `vp`. Kept separate from
    /// table insertion so the caller can allocate it without holding the
    /// host lock (spec section 4.3's coarsened create).
    pub fn new_vhold(vp: VfsHandle) -> Arc<Vhold> {
        Vhold::new(vp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Vhold>> {
        self.by_vp.values()
    }

    pub fn remove(&mut self, vp: &VfsHandle) {
        self.by_vp.remove(vp);
    }

    pub fn is_empty(&self) -> bool {
        self.by_vp.is_empty()
    }
}
