//! Garbage collector (spec section 4.10): periodically retires idle hosts
//! whose idle deadline has passed and that have genuinely gone quiet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::host::HostRegistry;
use super::nsm_client::NsmClient;
use super::vfs::LocalLockEngine;

/// One collection cycle per `idle_period`, or sooner if [`Gc::kick`] fires
/// (spec section 4.10: memory-reclamation hints wake the collector).
pub struct Gc {
    registry: Arc<HostRegistry>,
    engine: Arc<dyn LocalLockEngine>,
    nsm: Arc<NsmClient>,
    idle_period: Duration,
    kicked: Notify,
    finished: Notify,
}

impl Gc {
    pub fn new(registry: Arc<HostRegistry>, engine: Arc<dyn LocalLockEngine>, nsm: Arc<NsmClient>, idle_period: Duration) -> Self {
        Self { registry, engine, nsm, idle_period, kicked: Notify::new(), finished: Notify::new() }
    }

    /// Runs the collection loop until `stop` fires. Intended to be awaited
    /// inside its own spawned task for the lifetime of the registry.
    pub async fn run(&self, stop: &Notify) {
        loop {
            let sleep = tokio::time::sleep(self.idle_period);
            tokio::pin!(sleep);
            tokio::select! {
                _ = stop.notified() => break,
                _ = &mut sleep => {}
                _ = self.kicked.notified() => {}
            }
            self.cycle().await;
            self.finished.notify_waiters();
        }
    }

    /// Requests an out-of-cycle pass, e.g. from a memory-pressure hint.
    pub fn kick(&self) {
        self.kicked.notify_one();
    }

    /// Waits for one full cycle to complete; used by tests and by shutdown.
    pub async fn wait_finished(&self) {
        self.finished.notified().await;
    }

    async fn cycle(&self) {
        let now = Instant::now();
        for host in self.registry.idle_snapshot().await {
            match host.idle_timeout() {
                Some(deadline) if deadline <= now => {}
                _ => continue,
            }

            host.gc_vholds(self.engine.as_ref()).await;

            if host.refcnt() > 0 || host.has_locks(self.engine.as_ref()).await {
                debug!(sysid = host.sysid, "host regained activity, requeueing");
                self.registry.requeue_idle(&host, self.idle_period).await;
                continue;
            }

            self.registry.unregister(&host).await;
            match self.nsm.unmonitor(host.caller_name().await).await {
                Ok(_) => {}
                Err(error) => warn!(sysid = host.sysid, %error, "SM unmonitor failed, host destroyed anyway"),
            }
            info!(sysid = host.sysid, "host retired by gc");
        }
    }
}
