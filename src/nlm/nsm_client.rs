//! Serialized RPC client to the local status monitor (spec section 4.2).
//!
//! The teacher's `nlm::Nsm`/`nsm::*` traits take `impl promise::Trait`
//! parameters, which aren't object-safe; the host/garbage-collector paths
//! need a single `Arc`-shaped handle to the local SM shared across every
//! host, so this module defines its own object-safe [`NsmTransport`] seam
//! instead and layers the spec's retry and serialization rules on top of
//! it, reusing the procedure types already declared in `crate::nsm`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::nsm::{HostName, HostState, MonitorPair, WatcherId, PRIVATE_LEN};

use super::netobj::copy_fixed;
use super::transport::TransportError;
use super::ClientName;

/// Object-safe channel to the local NSM daemon. An embedder implements this
/// against a real RPC client handle; [`NsmClient`] only adds the retrying
/// port resolution and call serialization spec section 4.2 requires.
#[async_trait]
pub trait NsmTransport: Send + Sync {
    /// Resolves SM's transport address (a `portmap`/`rpcbind` lookup in a
    /// real deployment).
    async fn resolve(&self) -> Result<(), TransportError>;

    async fn monitor(&self, pair: MonitorPair, cookie: [u8; PRIVATE_LEN]) -> Result<HostState, TransportError>;

    async fn unmonitor(&self, pair: MonitorPair) -> Result<HostState, TransportError>;

    async fn unmonitor_all(&self, watcher: WatcherId) -> Result<HostState, TransportError>;

    async fn stat(&self, host: HostName) -> Result<HostState, TransportError>;

    async fn simulate_crash(&self) -> Result<(), TransportError>;
}

/// Serialized, retry-resilient handle to the local SM. Every outgoing call
/// is serialized on a binary semaphore since the underlying handle is not
/// reentrant (spec section 4.2/5).
pub struct NsmClient {
    transport: Box<dyn NsmTransport>,
    sem: Semaphore,
    my_id: WatcherId,
}

impl NsmClient {
    /// Resolves the local SM's transport address with bounded retries
    /// (`retries` attempts, `retry_timeout` apart), tolerating SM starting
    /// after NLM.
    pub async fn connect(
        transport: Box<dyn NsmTransport>,
        my_id: WatcherId,
        retries: u32,
        retry_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut last_error = TransportError::Unreachable;
        for attempt in 0..retries.max(1) {
            match transport.resolve().await {
                Ok(()) => return Ok(Self { transport, sem: Semaphore::new(1), my_id }),
                Err(error) => {
                    debug!(attempt, %error, "SM not reachable yet, retrying");
                    last_error = error;
                    if attempt + 1 < retries {
                        tokio::time::sleep(retry_timeout).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Registers monitoring for `remote_name`, encoding `sysid` into the
    /// 16-byte `priv` cookie so a later `NOTIFY` can be routed without a
    /// name lookup (spec section 4.2/9).
    pub async fn monitor(&self, sysid: u32, remote_name: HostName) -> Result<HostState, TransportError> {
        let _permit = self.sem.acquire().await.expect("NSM semaphore never closes");
        let mut cookie = [0u8; PRIVATE_LEN];
        cookie[..4].copy_from_slice(&sysid.to_be_bytes());
        let pair = MonitorPair { name: remote_name, id: self.my_id.clone() };
        self.transport.monitor(pair, cookie).await
    }

    pub async fn unmonitor(&self, remote_name: ClientName) -> Result<HostState, TransportError> {
        let _permit = self.sem.acquire().await.expect("NSM semaphore never closes");
        let pair = MonitorPair { name: HostName(remote_name.0), id: self.my_id.clone() };
        self.transport.unmonitor(pair).await
    }

    pub async fn unmonitor_all(&self) -> Result<HostState, TransportError> {
        let _permit = self.sem.acquire().await.expect("NSM semaphore never closes");
        self.transport.unmonitor_all(self.my_id.clone()).await
    }

    pub async fn stat(&self, host: HostName) -> Result<HostState, TransportError> {
        let _permit = self.sem.acquire().await.expect("NSM semaphore never closes");
        self.transport.stat(host).await
    }

    pub async fn simulate_crash(&self) -> Result<(), TransportError> {
        let _permit = self.sem.acquire().await.expect("NSM semaphore never closes");
        self.transport.simulate_crash().await
    }

    /// Extracts the sysid a previous [`Self::monitor`] call encoded into the
    /// `priv` cookie, for routing an inbound `NOTIFY` (spec section 4.2/9).
    pub fn sysid_from_cookie(cookie: &[u8; PRIVATE_LEN]) -> u32 {
        u32::from_be_bytes(copy_fixed(&cookie[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyThenUp {
        resolves_after: u32,
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl NsmTransport for FlakyThenUp {
        async fn resolve(&self) -> Result<(), TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt + 1 >= self.resolves_after {
                Ok(())
            } else {
                Err(TransportError::Unreachable)
            }
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

    fn watcher() -> WatcherId {
        WatcherId { name: HostName("localhost".into()), program: 100021, version: 4, proc: 10010 }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connect_retries_until_sm_comes_up() {
        let attempts = Arc::new(AtomicU32::new(0));
        let transport = FlakyThenUp { resolves_after: 3, attempts: attempts.clone() };
        let client = NsmClient::connect(Box::new(transport), watcher(), 10, Duration::from_millis(1)).await;
        assert!(client.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn connect_gives_up_after_retry_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let transport = FlakyThenUp { resolves_after: 100, attempts };
        let client = NsmClient::connect(Box::new(transport), watcher(), 3, Duration::from_millis(1)).await;
        assert!(client.is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn sysid_cookie_round_trips() {
        let mut cookie = [0u8; PRIVATE_LEN];
        cookie[..4].copy_from_slice(&42u32.to_be_bytes());
        assert_eq!(NsmClient::sysid_from_cookie(&cookie), 42);
    }
}
