//! Client-side sleeping-lock registry (spec section 4.5): blocking lock
//! requests this node has sent to a remote server and is awaiting a
//! `GRANTED` callback for.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

use super::host::Host;
use super::vfs::{LockRange, VfsHandle};

const BLOCKED: u32 = 0;
const GRANTED: u32 = 1;
const CANCELLED: u32 = 2;

/// One outstanding blocking lock request this node sent as a client.
pub struct ClientSleepingLock {
    token: u64,
    host: Arc<Host>,
    vp: VfsHandle,
    lock: LockRange,
    state: AtomicU32,
    notify: Notify,
}

impl ClientSleepingLock {
    fn matches(&self, host: &Arc<Host>, vp: &VfsHandle, lock: &LockRange) -> bool {
        Arc::ptr_eq(&self.host, host)
            && self.vp == *vp
            && self.lock.owner == lock.owner
            && self.lock.offset == lock.offset
            && self.lock.len == lock.len
    }

    fn outcome(&self) -> WaitOutcome {
        match self.state.load(Ordering::Acquire) {
            GRANTED => WaitOutcome::Granted,
            CANCELLED => WaitOutcome::Interrupted,
            _ => WaitOutcome::TimedOut,
        }
    }
}

/// Result of [`SleepingLockRegistry::wait`]: the tri-state client wait
/// result from spec sections 5 and 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Granted,
    Interrupted,
    TimedOut,
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-wide (per registry) list of [`ClientSleepingLock`]s.
#[derive(Default)]
pub struct SleepingLockRegistry {
    entries: Mutex<Vec<Arc<ClientSleepingLock>>>,
}

impl SleepingLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, host: Arc<Host>, vp: VfsHandle, lock: LockRange) -> Arc<ClientSleepingLock> {
        let entry = Arc::new(ClientSleepingLock {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            host,
            vp,
            lock,
            state: AtomicU32::new(BLOCKED),
            notify: Notify::new(),
        });
        self.entries.lock().await.push(entry.clone());
        entry
    }

    /// Finds a `BLOCKED` entry matching `(host, vp, lock)` and transitions
    /// it to `GRANTED`. Returns `false` if no match exists (spec section
    /// 4.5).
    pub async fn grant(&self, host: &Arc<Host>, vp: &VfsHandle, lock: &LockRange) -> bool {
        let entries = self.entries.lock().await;
        for entry in entries.iter() {
            if !entry.matches(host, vp, lock) {
                continue;
            }
            if entry.state.compare_exchange(BLOCKED, GRANTED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                entry.notify.notify_waiters();
                return true;
            }
        }
        false
    }

    /// Transitions every `BLOCKED` entry belonging to `host` to `CANCELLED`.
    pub async fn cancel_host(&self, host: &Arc<Host>) {
        let entries = self.entries.lock().await;
        for entry in entries.iter() {
            if !Arc::ptr_eq(&entry.host, host) {
                continue;
            }
            if entry.state.compare_exchange(BLOCKED, CANCELLED, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                entry.notify.notify_waiters();
            }
        }
    }

    pub async fn remove(&self, entry: &Arc<ClientSleepingLock>) {
        self.entries.lock().await.retain(|e| e.token != entry.token);
    }

    /// Blocks until `entry` leaves `BLOCKED` or `wait_timeout` elapses, then
    /// re-reads the state once more: a `GRANTED` that lands between the
    /// timeout firing and this read still wins the race (spec sections 5
    /// and 8).
    pub async fn wait(&self, entry: &Arc<ClientSleepingLock>, wait_timeout: Duration) -> WaitOutcome {
        if entry.state.load(Ordering::Acquire) == BLOCKED {
            let notified = entry.notify.notified();
            tokio::pin!(notified);
            let _ = tokio::time::timeout(wait_timeout, notified).await;
        }
        entry.outcome()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlm::netobj::PeerAddr;
    use crate::nlm::sysid::SysidAllocator;
    use crate::nlm::{ClientName, host::HostRegistry};
    use std::sync::Arc;

    async fn test_host() -> Arc<Host> {
        let registry = HostRegistry::new(Arc::new(SysidAllocator::new()));
        registry
            .findcreate(ClientName("peer".into()), PeerAddr::new("tcp", "10.0.0.9:4045".parse().unwrap()))
            .await
            .unwrap()
    }

    fn range() -> LockRange {
        LockRange { offset: 0, len: 10, pid: 1, exclusive: true, owner: vec![7] }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn register_then_grant_is_observed_by_wait() {
        let host = test_host().await;
        let vp = VfsHandle(b"f".to_vec());
        let registry = SleepingLockRegistry::new();
        let entry = registry.register(host.clone(), vp.clone(), range()).await;

        assert!(registry.grant(&host, &vp, &range()).await);
        let outcome = registry.wait(&entry, Duration::from_millis(50)).await;
        assert_eq!(outcome, WaitOutcome::Granted);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn grant_without_matching_entry_reports_not_found() {
        let host = test_host().await;
        let vp = VfsHandle(b"f".to_vec());
        let registry = SleepingLockRegistry::new();
        assert!(!registry.grant(&host, &vp, &range()).await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancel_host_wakes_waiter_with_interrupted() {
        let host = test_host().await;
        let vp = VfsHandle(b"f".to_vec());
        let registry = SleepingLockRegistry::new();
        let entry = registry.register(host.clone(), vp, range()).await;

        registry.cancel_host(&host).await;
        let outcome = registry.wait(&entry, Duration::from_millis(50)).await;
        assert_eq!(outcome, WaitOutcome::Interrupted);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn wait_with_zero_timeout_times_out_when_still_blocked() {
        let host = test_host().await;
        let vp = VfsHandle(b"f".to_vec());
        let registry = SleepingLockRegistry::new();
        let entry = registry.register(host, vp, range()).await;

        let outcome = registry.wait(&entry, Duration::from_secs(0)).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn grant_is_a_one_time_transition() {
        let host = test_host().await;
        let vp = VfsHandle(b"f".to_vec());
        let registry = SleepingLockRegistry::new();
        let entry = registry.register(host.clone(), vp.clone(), range()).await;

        assert!(registry.grant(&host, &vp, &range()).await);
        // A second grant against the same (now-GRANTED) entry must not
        // succeed nor override a cancel.
        assert!(!registry.grant(&host, &vp, &range()).await);
        registry.cancel_host(&host).await;
        assert_eq!(entry.outcome(), WaitOutcome::Granted);
    }
}
