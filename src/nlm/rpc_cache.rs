//! Per-host cache of outbound RPC client handles (spec section 4.7): used
//! for the asynchronous `GRANTED` callback and for reclaim traffic.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

use super::host::Host;
use super::transport::{RpcHandle, Transport, TransportError};

/// Bounded per-host cache keyed by NLM version. Entries idle out on their
/// own; [`Gc`](super::gc::Gc) never needs to reach into this directly.
pub struct RpcCache {
    handles: Cache<u32, Arc<dyn RpcHandle>>,
}

impl Default for RpcCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCache {
    pub fn new() -> Self {
        Self {
            handles: Cache::builder()
                .max_capacity(8)
                .time_to_idle(Duration::from_secs(300))
                .build(),
        }
    }

    pub fn get(&self, vers: u32) -> Option<Arc<dyn RpcHandle>> {
        self.handles.get(&vers)
    }

    pub fn put(&self, vers: u32, handle: Arc<dyn RpcHandle>) {
        self.handles.insert(vers, handle);
    }

    pub fn clear(&self) {
        self.handles.invalidate_all();
    }
}

/// Returns a cached handle to `host` at `vers`, constructing (and caching)
/// one through `transport` on a miss.
pub async fn get_rpc(
    host: &Host,
    transport: &dyn Transport,
    vers: u32,
) -> Result<Arc<dyn RpcHandle>, TransportError> {
    if let Some(handle) = host.rpc_cache_get(vers).await {
        return Ok(handle);
    }
    let handle = transport.client_handle(&host.peer, vers).await?;
    host.rpc_cache_put(vers, handle.clone()).await;
    Ok(handle)
}
