//! Client-side reclaim worker (spec section 4.9): re-establishes a host's
//! outstanding locks and shares against its peer after a crash notification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::host::{Host, HostRegistry};

/// External collaborator (spec section 1): knows how to re-issue a host's
/// outstanding locks/shares against its peer using the host's current RPC
/// handles. Not implemented by this crate.
#[async_trait]
pub trait ClientReclaim: Send + Sync {
    async fn reclaim(&self, host: &Host);
}

/// Spawns the reclaim worker for `host`. The caller must have already
/// transitioned the host into `Reclaiming` (see [`super::notify::notify_client`]);
/// this function bumps the refcount for the worker's lifetime and drops it
/// again through the normal [`HostRegistry::release`] path on completion, so
/// the host cannot be retired by GC mid-reclaim (spec section 4.6/4.9: at
/// most one reclaim worker per host, and it holds a reference while it runs).
pub fn spawn(host: Arc<Host>, registry: Arc<HostRegistry>, idle_period: Duration, driver: Arc<dyn ClientReclaim>) {
    host.reclaim_refcount_guard();
    tokio::spawn(async move {
        info!(sysid = host.sysid, "reclaim worker starting");
        driver.reclaim(&host).await;
        host.end_reclaim().await;
        registry.release(host.clone(), idle_period).await;
        info!(sysid = host.sysid, "reclaim worker finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlm::host::MonitorState;
    use crate::nlm::netobj::PeerAddr;
    use crate::nlm::sysid::SysidAllocator;
    use crate::nlm::ClientName;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MarkingReclaim {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ClientReclaim for MarkingReclaim {
        async fn reclaim(&self, _host: &Host) {
            self.ran.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn spawn_runs_driver_then_clears_reclaiming_and_drops_the_extra_ref() {
        let registry = Arc::new(HostRegistry::new(Arc::new(SysidAllocator::new())));
        let host = registry
            .findcreate(ClientName("peer".into()), PeerAddr::new("tcp", "10.0.0.1:4045".parse().unwrap()))
            .await
            .unwrap();
        assert!(host.begin_reclaim().await);

        let ran = Arc::new(AtomicBool::new(false));
        let starting_refcnt = host.refcnt();
        spawn(host.clone(), registry, Duration::from_secs(30), Arc::new(MarkingReclaim { ran: ran.clone() }));

        // Yield enough times for the spawned task to run to completion.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(host.monitor_state().await, MonitorState::Monitored);
        assert_eq!(host.refcnt(), starting_refcnt);
    }
}
