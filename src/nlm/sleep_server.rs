//! Server-side sleeping-request registry (spec section 4.4): the per-vhold
//! list of blocked `SETLKW` operations pending grant or cancel.

use super::vfs::LockRange;
use super::vhold::Vhold;

/// Identifies one blocked `SETLKW` by the 4-tuple `(l_start, l_len, l_pid,
/// l_type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SleepingRequest {
    offset: u64,
    len: u64,
    pid: u32,
    exclusive: bool,
}

impl From<&LockRange> for SleepingRequest {
    fn from(range: &LockRange) -> Self {
        Self { offset: range.offset, len: range.len, pid: range.pid, exclusive: range.exclusive }
    }
}

/// Outcome of [`register`]: whether this call owns the wait, or an
/// identical request was already registered by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registered {
    Owned,
    AlreadyRegistered,
}

/// Registers a blocked request on `vhold`. Idempotent on exact match: if an
/// equal `(offset, len, pid, exclusive)` entry already exists, the duplicate
/// caller is told so and must return without starting its own wait (spec
/// section 4.4: "the original handler owns the wait").
pub async fn register(vhold: &Vhold, lock: &LockRange) -> Registered {
    let candidate = SleepingRequest::from(lock);
    let mut sleeping = vhold.sleeping.lock().await;
    if sleeping.contains(&candidate) {
        return Registered::AlreadyRegistered;
    }
    sleeping.push(candidate);
    Registered::Owned
}

/// Removes a matching entry, returning whether one was found. Used directly
/// by `CANCEL` to learn whether it actually cancelled a wait (spec section
/// 4.11).
pub async fn unregister(vhold: &Vhold, lock: &LockRange) -> bool {
    let target = SleepingRequest::from(lock);
    let mut sleeping = vhold.sleeping.lock().await;
    if let Some(pos) = sleeping.iter().position(|entry| entry == &target) {
        sleeping.remove(pos);
        true
    } else {
        false
    }
}

/// Forced cleanup (spec section 4.4/4.8): collects every entry under the
/// lock and hands them back so the caller can drop them after releasing any
/// other locks it holds.
pub async fn drain(vhold: &Vhold) -> Vec<SleepingRequest> {
    let mut sleeping = vhold.sleeping.lock().await;
    std::mem::take(&mut *sleeping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlm::vfs::VfsHandle;
    use crate::nlm::vhold::VholdTable;

    fn range(offset: u64) -> LockRange {
        LockRange { offset, len: 10, pid: 1, exclusive: true, owner: vec![1, 2, 3] }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn register_then_unregister_leaves_list_empty() {
        let vhold = VholdTable::new_vhold(VfsHandle(b"f".to_vec()));
        assert_eq!(register(&vhold, &range(0)).await, Registered::Owned);
        assert!(unregister(&vhold, &range(0)).await);
        assert!(vhold.sleeping.lock().await.is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn duplicate_register_is_rejected() {
        let vhold = VholdTable::new_vhold(VfsHandle(b"f".to_vec()));
        assert_eq!(register(&vhold, &range(0)).await, Registered::Owned);
        assert_eq!(register(&vhold, &range(0)).await, Registered::AlreadyRegistered);
        assert_eq!(vhold.sleeping.lock().await.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unregister_nonexistent_reports_no_match() {
        let vhold = VholdTable::new_vhold(VfsHandle(b"f".to_vec()));
        assert!(!unregister(&vhold, &range(0)).await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn drain_empties_the_list_and_returns_contents() {
        let vhold = VholdTable::new_vhold(VfsHandle(b"f".to_vec()));
        register(&vhold, &range(0)).await;
        register(&vhold, &range(100)).await;
        let drained = drain(&vhold).await;
        assert_eq!(drained.len(), 2);
        assert!(vhold.sleeping.lock().await.is_empty());
    }
}
