//! Status-change notifier (spec section 4.8): fans an SM state change out to
//! server-side cleanup and client-side reclaim. Both halves are invoked
//! independently — `FREE_ALL` only ever calls [`notify_server`]; inbound SM
//! `NOTIFY` calls both.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::host::{Host, HostRegistry};
use super::reclaim::{self, ClientReclaim};
use super::vfs::LocalLockEngine;

/// Purges server-side state for `host`: drains every vhold's sleeping
/// requests and clears its remote locks/shares on the local engine. Runs
/// outside any registry lock; each vhold is handled independently so one
/// failing collaborator call doesn't block the rest.
pub async fn notify_server(host: &Host, new_state: u32, engine: &dyn LocalLockEngine) {
    host.set_sm_state(new_state).await;
    let sysid = host.sysid;
    for vhold in host.vholds().await {
        let drained = super::sleep_server::drain(&vhold).await;
        debug!(sysid, dropped = drained.len(), "drained sleeping requests on notify");
        if let Err(error) = engine.cleanlocks(&vhold.vp, sysid).await {
            debug!(sysid, %error, "cleanlocks failed during notify_server");
        }
        if let Err(error) = engine.cleanshares_by_sysid(&vhold.vp, sysid).await {
            debug!(sysid, %error, "cleanshares_by_sysid failed during notify_server");
        }
    }
}

/// Starts client-side reclaim for `host` unless one is already in flight
/// (spec section 4.6: `RECLAIM` is entered only once). `registry`/
/// `idle_period` let the spawned worker release the refcount it bumps for
/// its own lifetime through the normal [`HostRegistry::release`] path.
pub async fn notify_client(
    host: Arc<Host>,
    new_state: u32,
    registry: Arc<HostRegistry>,
    idle_period: Duration,
    reclaim_driver: Arc<dyn ClientReclaim>,
) {
    host.set_sm_state(new_state).await;
    if !host.begin_reclaim().await {
        debug!(sysid = host.sysid, "reclaim already in flight, notify_client is a no-op");
        return;
    }
    reclaim::spawn(host, registry, idle_period, reclaim_driver);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlm::netobj::PeerAddr;
    use crate::nlm::sysid::SysidAllocator;
    use crate::nlm::vfs::{Holder, LockRange, ShareAccess, ShareDeny, VfsError, VfsHandle};
    use crate::nlm::ClientName;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingEngine {
        cleanlocks_calls: AtomicU32,
    }

    #[async_trait]
    impl LocalLockEngine for CountingEngine {
        async fn fh_to_vp(&self, _fh: &crate::nlm::FileHandle) -> Result<VfsHandle, VfsError> {
            unreachable!()
        }
        async fn is_read_only(&self, _vp: &VfsHandle) -> bool {
            false
        }
        async fn test(&self, _vp: &VfsHandle, _sysid: u32, _lock: &LockRange) -> Result<Option<Holder>, VfsError> {
            Ok(None)
        }
        async fn set_lock(&self, _vp: &VfsHandle, _sysid: u32, _lock: &LockRange) -> Result<(), VfsError> {
            Ok(())
        }
        async fn set_lock_blocking(&self, _vp: &VfsHandle, _sysid: u32, _lock: &LockRange) -> Result<(), VfsError> {
            Ok(())
        }
        async fn unlock(&self, _vp: &VfsHandle, _sysid: u32, _lock: &LockRange) -> Result<(), VfsError> {
            Ok(())
        }
        async fn cleanlocks(&self, _vp: &VfsHandle, _sysid: u32) -> Result<(), VfsError> {
            self.cleanlocks_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn has_locks(&self, _sysid: u32) -> bool {
            false
        }
        async fn share(
            &self,
            _vp: &VfsHandle,
            _sysid: u32,
            _owner: &[u8],
            _deny: ShareDeny,
            _access: ShareAccess,
        ) -> Result<(), VfsError> {
            Ok(())
        }
        async fn unshare(&self, _vp: &VfsHandle, _sysid: u32, _owner: &[u8]) -> Result<(), VfsError> {
            Ok(())
        }
        async fn cleanshares_by_sysid(&self, _vp: &VfsHandle, _sysid: u32) -> Result<(), VfsError> {
            Ok(())
        }
    }

    struct NoopReclaim;

    #[async_trait]
    impl ClientReclaim for NoopReclaim {
        async fn reclaim(&self, _host: &Host) {}
    }

    async fn test_host() -> (Arc<HostRegistry>, Arc<Host>) {
        let registry = Arc::new(HostRegistry::new(Arc::new(SysidAllocator::new())));
        let host = registry
            .findcreate(ClientName("peer".into()), PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap()))
            .await
            .unwrap();
        (registry, host)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn notify_server_drains_every_vhold_and_records_state() {
        let (_registry, host) = test_host().await;
        host.get_vhold(VfsHandle(b"a".to_vec())).await;
        host.get_vhold(VfsHandle(b"b".to_vec())).await;
        let engine = CountingEngine { cleanlocks_calls: AtomicU32::new(0) };

        notify_server(&host, 7, &engine).await;

        assert_eq!(host.sm_state().await, 7);
        assert_eq!(engine.cleanlocks_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn notify_client_spawns_exactly_one_reclaim_worker() {
        let (registry, host) = test_host().await;
        notify_client(host.clone(), 3, registry.clone(), Duration::from_secs(30), Arc::new(NoopReclaim)).await;
        // A second call while the first worker hasn't yielded control yet
        // must observe `Reclaiming` and refuse to spawn another.
        assert_eq!(host.monitor_state().await, super::super::host::MonitorState::Reclaiming);
        notify_client(host.clone(), 3, registry, Duration::from_secs(30), Arc::new(NoopReclaim)).await;

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(host.monitor_state().await, super::super::host::MonitorState::Monitored);
    }
}
