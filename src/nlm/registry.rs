//! Process-wide registry (spec section 3's `GlobalRegistry`): ties the host
//! registry, the client-side sleeping-lock list, the sysid allocator, and
//! the NSM client into one instance, and tracks the grace-period deadline
//! and run status everything else reads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::host::HostRegistry;
use super::nsm_client::NsmClient;
use super::sleep_client::SleepingLockRegistry;
use super::sysid::SysidAllocator;
use super::vfs::LocalLockEngine;
use crate::config::Config;

/// Lifecycle state a [`GlobalRegistry`] moves through exactly once, in
/// order (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Starting,
    Up,
    Stopping,
    Down,
}

/// One isolation domain's worth of NLM state (spec section 3: "a single
/// process hosts exactly one `GlobalRegistry` in this implementation").
pub struct GlobalRegistry {
    pub hosts: Arc<HostRegistry>,
    pub sleeping_locks: SleepingLockRegistry,
    pub sysid_alloc: Arc<SysidAllocator>,
    pub nsm: Arc<NsmClient>,
    pub config: Config,
    grace_deadline: Instant,
    status: Mutex<RunStatus>,
}

impl GlobalRegistry {
    /// Brings up a registry: resolves the NSM transport address (with the
    /// configured retry budget) and stamps the grace-period deadline from
    /// the moment this call returns.
    pub async fn start(
        config: Config,
        nsm_transport: Box<dyn super::nsm_client::NsmTransport>,
        my_id: crate::nsm::WatcherId,
    ) -> Result<Self, super::transport::TransportError> {
        let sysid_alloc = Arc::new(SysidAllocator::new());
        let nsm = Arc::new(
            NsmClient::connect(nsm_transport, my_id, config.nsm_rpcbind_retries, config.nsm_rpcbind_timeout())
                .await?,
        );
        let registry = Self {
            hosts: Arc::new(HostRegistry::new(sysid_alloc.clone())),
            sleeping_locks: SleepingLockRegistry::new(),
            sysid_alloc,
            nsm,
            grace_deadline: Instant::now() + config.grace_period(),
            status: Mutex::new(RunStatus::Starting),
            config,
        };
        *registry.status.lock().await = RunStatus::Up;
        info!("NLM registry up, grace period active");
        Ok(registry)
    }

    /// `true` while non-reclaim requests must be rejected (spec section 7/8).
    /// Read without locking; a deadline skew of one clock tick is accepted
    /// (spec section 9).
    pub fn in_grace_period(&self) -> bool {
        Instant::now() < self.grace_deadline
    }

    pub async fn status(&self) -> RunStatus {
        *self.status.lock().await
    }

    pub async fn set_status(&self, status: RunStatus) {
        *self.status.lock().await = status;
    }

    /// Orderly shutdown (spec section 5): repeatedly walk every host
    /// cancelling client-side waits and purging server-side state until all
    /// hosts are quiet, then unregister them and tell SM to forget this
    /// process. The caller must already have stopped and joined the GC task
    /// (it owns that `JoinHandle`, not this registry) before calling this.
    pub async fn shutdown(&self, engine: &dyn LocalLockEngine) {
        self.set_status(RunStatus::Stopping).await;

        loop {
            let hosts = self.hosts.all_hosts().await;
            if hosts.is_empty() {
                break;
            }
            let mut all_quiet = true;
            for host in &hosts {
                self.sleeping_locks.cancel_host(host).await;
                super::notify::notify_server(host, 0, engine).await;
                host.gc_vholds(engine).await;
                if host.refcnt() > 0 || host.has_locks(engine).await {
                    all_quiet = false;
                }
            }
            if !all_quiet {
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
            for host in hosts {
                self.hosts.unregister(&host).await;
            }
            break;
        }

        if let Err(error) = self.nsm.unmonitor_all().await {
            warn!(%error, "SM UNMON_ALL failed during shutdown");
        }
        self.set_status(RunStatus::Down).await;
        info!("NLM registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlm::netobj::PeerAddr;
    use crate::nlm::nsm_client::NsmTransport;
    use crate::nlm::transport::TransportError;
    use crate::nlm::vfs::{Holder, LockRange, ShareAccess, ShareDeny, VfsError, VfsHandle};
    use crate::nlm::ClientName;
    use crate::nsm::{HostName, HostState, MonitorPair, WatcherId, PRIVATE_LEN};
    use async_trait::async_trait;

    struct StubNsm;

    #[async_trait]
    impl NsmTransport for StubNsm {
        async fn resolve(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn monitor(&self, _pair: MonitorPair, _cookie: [u8; PRIVATE_LEN]) -> Result<HostState, TransportError> {
            Ok(HostState(1))
        }
        async fn unmonitor(&self, _pair: MonitorPair) -> Result<HostState, TransportError> {
            Ok(HostState(1))
        }
        async fn unmonitor_all(&self, _watcher: WatcherId) -> Result<HostState, TransportError> {
            Ok(HostState(1))
        }
        async fn stat(&self, _host: HostName) -> Result<HostState, TransportError> {
            Ok(HostState(1))
        }
        async fn simulate_crash(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    struct QuietEngine;

    #[async_trait]
    impl LocalLockEngine for QuietEngine {
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

    fn watcher() -> WatcherId {
        WatcherId { name: HostName("localhost".into()), program: 100021, version: 4, proc: 10010 }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn start_enters_grace_period_then_leaves_it() {
        let config = Config { grace_period_secs: 5, ..Config::default() };
        let registry = GlobalRegistry::start(config, Box::new(StubNsm), watcher()).await.unwrap();
        assert_eq!(registry.status().await, RunStatus::Up);
        assert!(registry.in_grace_period());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!registry.in_grace_period());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shutdown_unregisters_every_host_and_reaches_down() {
        let config = Config::default();
        let registry = GlobalRegistry::start(config, Box::new(StubNsm), watcher()).await.unwrap();
        let host = registry
            .hosts
            .findcreate(ClientName("peer".into()), PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap()))
            .await
            .unwrap();
        registry.hosts.release(host.clone(), Duration::from_secs(30)).await;

        registry.shutdown(&QuietEngine).await;

        assert_eq!(registry.status().await, RunStatus::Down);
        assert!(registry.hosts.all_hosts().await.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn shutdown_retries_while_a_host_still_has_locks() {
        struct BusyOnceEngine {
            calls: std::sync::atomic::AtomicU32,
        }

        #[async_trait]
        impl LocalLockEngine for BusyOnceEngine {
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
                Ok(())
            }
            async fn has_locks(&self, _sysid: u32) -> bool {
                use std::sync::atomic::Ordering;
                self.calls.fetch_add(1, Ordering::SeqCst) == 0
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

        let config = Config::default();
        let registry = GlobalRegistry::start(config, Box::new(StubNsm), watcher()).await.unwrap();
        let host = registry
            .hosts
            .findcreate(ClientName("peer".into()), PeerAddr::new("tcp", "10.0.0.2:4045".parse().unwrap()))
            .await
            .unwrap();
        registry.hosts.release(host.clone(), Duration::from_secs(30)).await;

        let engine = BusyOnceEngine { calls: std::sync::atomic::AtomicU32::new(0) };
        registry.shutdown(&engine).await;

        assert_eq!(registry.status().await, RunStatus::Down);
        assert!(registry.hosts.all_hosts().await.is_empty());
    }
}
