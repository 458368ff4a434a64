//! Host registry (spec sections 3 and 4.6): one record per distinct remote
//! peer, indexed both by `(netid, addr)` and by sysid, plus the idle LRU
//! that drives garbage collection.

use std::collections::{BTreeMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use whirlwind::ShardMap;

use super::netobj::PeerAddr;
use super::rpc_cache::RpcCache;
use super::sysid::{self, SysidAllocator};
use super::transport::RpcHandle;
use super::vfs::{LocalLockEngine, VfsHandle};
use super::vhold::{vhold_busy, VholdTable};
use super::ClientName;

/// Monitoring/reclaim state machine (spec section 4.6):
/// `Unmonitored -> Monitored` on first successful `MON`,
/// `Monitored -> Unmonitored` on GC retirement,
/// `Monitored -> Reclaiming -> Monitored` on a client-side notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Unmonitored,
    Monitored,
    Reclaiming,
}

struct HostInner {
    caller_name: ClientName,
    sm_state: u32,
    monitor: MonitorState,
    vholds: VholdTable,
    rpc_cache: RpcCache,
}

/// One record per distinct remote peer, identified by `(netid, peer_addr)`
/// (spec section 3). `sysid` is immutable for the host's lifetime once
/// assigned and unique among live hosts.
pub struct Host {
    pub sysid: u32,
    pub peer: PeerAddr,
    refcnt: AtomicU32,
    idle_timeout: StdMutex<Option<Instant>>,
    inner: Mutex<HostInner>,
    /// `condvar_reclaim`: broadcast when a reclaim worker finishes, so
    /// anything waiting out the grace period wakes (spec section 3).
    pub recl_cv: tokio::sync::Notify,
}

impl Host {
    fn new(sysid: u32, peer: PeerAddr, caller_name: ClientName) -> Arc<Self> {
        Arc::new(Self {
            sysid,
            peer,
            refcnt: AtomicU32::new(1),
            idle_timeout: StdMutex::new(None),
            inner: Mutex::new(HostInner {
                caller_name,
                sm_state: 0,
                monitor: MonitorState::Unmonitored,
                vholds: VholdTable::new(),
                rpc_cache: RpcCache::new(),
            }),
            recl_cv: tokio::sync::Notify::new(),
        })
    }

    pub fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Acquire)
    }

    fn incref(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Bumps the refcount for the lifetime of a spawned reclaim worker (spec
    /// section 4.6/4.9); the worker drops it again via
    /// [`HostRegistry::release`] on exit.
    pub(crate) fn reclaim_refcount_guard(&self) {
        self.incref();
    }

    /// Decrements the refcount and returns the value after the decrement.
    fn decref(&self) -> u32 {
        self.refcnt.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn idle_timeout(&self) -> Option<Instant> {
        *self.idle_timeout.lock().expect("idle_timeout mutex poisoned")
    }

    fn set_idle_timeout(&self, at: Instant) {
        *self.idle_timeout.lock().expect("idle_timeout mutex poisoned") = Some(at);
    }

    fn clear_idle_timeout(&self) {
        *self.idle_timeout.lock().expect("idle_timeout mutex poisoned") = None;
    }

    pub async fn caller_name(&self) -> ClientName {
        self.inner.lock().await.caller_name.clone()
    }

    pub async fn sm_state(&self) -> u32 {
        self.inner.lock().await.sm_state
    }

    /// Records `state` if non-zero (spec section 4.8: `notify_server` only
    /// updates the stamp on a genuine state change).
    pub async fn set_sm_state(&self, state: u32) {
        if state != 0 {
            self.inner.lock().await.sm_state = state;
        }
    }

    pub async fn monitor_state(&self) -> MonitorState {
        self.inner.lock().await.monitor
    }

    /// Transitions `Unmonitored -> Monitored`. Returns `true` the first
    /// time (the caller should then issue `SM_MON`); returns `false` if
    /// already monitored or mid-reclaim, in which case no new `MON` call is
    /// needed.
    pub async fn begin_monitoring(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.monitor == MonitorState::Unmonitored {
            inner.monitor = MonitorState::Monitored;
            true
        } else {
            false
        }
    }

    /// Clears monitoring state after `SM_MON` failed (spec section 7: the
    /// lock is still granted, but the host is left unmonitored).
    pub async fn mark_unmonitored(&self) {
        let mut inner = self.inner.lock().await;
        if inner.monitor == MonitorState::Monitored {
            inner.monitor = MonitorState::Unmonitored;
        }
    }

    /// Attempts to enter `Reclaiming`. Returns `false` if a reclaim is
    /// already in flight — at most one reclaim worker exists per host at
    /// any instant (spec section 4.6/5).
    pub async fn begin_reclaim(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.monitor == MonitorState::Reclaiming {
            return false;
        }
        inner.monitor = MonitorState::Reclaiming;
        true
    }

    /// Leaves `Reclaiming` back to `Monitored` and wakes anything parked on
    /// `recl_cv`.
    pub async fn end_reclaim(&self) {
        let mut inner = self.inner.lock().await;
        if inner.monitor == MonitorState::Reclaiming {
            inner.monitor = MonitorState::Monitored;
        }
        drop(inner);
        self.recl_cv.notify_waiters();
    }

    /// Resolves `vp` to a held vhold, creating one on demand. The creation
    /// itself happens outside the host lock (spec section 4.3): a lookup
    /// miss allocates a candidate, then re-checks under the lock so a
    /// racing create for the same `vp` discards its surplus.
    pub async fn get_vhold(&self, vp: VfsHandle) -> Arc<super::vhold::Vhold> {
        {
            let inner = self.inner.lock().await;
            if let Some(existing) = inner.vholds.lookup(&vp) {
                return existing;
            }
        }
        let candidate = VholdTable::new_vhold(vp.clone());
        let mut inner = self.inner.lock().await;
        inner.vholds.insert_or_get(vp, candidate)
    }

    pub async fn vholds(&self) -> Vec<Arc<super::vhold::Vhold>> {
        self.inner.lock().await.vholds.iter().cloned().collect()
    }

    /// Reaps every vhold on this host that isn't busy (spec section 4.10).
    pub async fn gc_vholds(&self, engine: &dyn LocalLockEngine) {
        let mut inner = self.inner.lock().await;
        let sysid = self.sysid;
        let mut dead = Vec::new();
        for vhold in inner.vholds.iter() {
            if !vhold_busy(vhold, sysid, engine).await {
                dead.push(vhold.vp.clone());
            }
        }
        for vp in dead {
            inner.vholds.remove(&vp);
        }
    }

    /// `true` if this host still has activity anywhere: an open vhold, or
    /// the local engine reporting an outstanding lock/share for its sysid
    /// (spec section 4.10: `nlm_host_has_locks`).
    pub async fn has_locks(&self, engine: &dyn LocalLockEngine) -> bool {
        if !self.inner.lock().await.vholds.is_empty() {
            return true;
        }
        engine.has_locks(self.sysid).await
    }

    pub async fn rpc_cache_get(&self, vers: u32) -> Option<Arc<dyn RpcHandle>> {
        self.inner.lock().await.rpc_cache.get(vers)
    }

    pub async fn rpc_cache_put(&self, vers: u32, handle: Arc<dyn RpcHandle>) {
        self.inner.lock().await.rpc_cache.put(vers, handle);
    }
}

type AddrKey = (String, IpAddr);

fn addr_key(peer: &PeerAddr) -> AddrKey {
    (peer.netid.clone(), peer.addr.ip())
}

struct RegistryState {
    by_addr: BTreeMap<AddrKey, Arc<Host>>,
    idle: VecDeque<Arc<Host>>,
}

/// Dual-indexed host registry: an ordered `(netid, addr)` tree for
/// `find`/`findcreate`, a concurrent sysid-keyed map for `find_by_sysid`
/// (fed by inbound `GRANTED` owner handles and SM `NOTIFY` cookies), and the
/// idle LRU the garbage collector walks.
pub struct HostRegistry {
    sysid_alloc: Arc<SysidAllocator>,
    state: Mutex<RegistryState>,
    by_sysid: ShardMap<u32, Arc<Host>>,
}

impl HostRegistry {
    pub fn new(sysid_alloc: Arc<SysidAllocator>) -> Self {
        Self {
            sysid_alloc,
            state: Mutex::new(RegistryState { by_addr: BTreeMap::new(), idle: VecDeque::new() }),
            by_sysid: ShardMap::new(),
        }
    }

    fn touch_found(state: &mut RegistryState, host: &Arc<Host>) {
        if host.refcnt() == 0 {
            state.idle.retain(|h| !Arc::ptr_eq(h, host));
            host.clear_idle_timeout();
        }
        host.incref();
    }

    /// Looks up an existing host by `(netid, addr)`, bumping its refcount.
    pub async fn find(&self, netid: &str, addr: SocketAddr) -> Option<Arc<Host>> {
        let key = (netid.to_string(), addr.ip());
        let mut state = self.state.lock().await;
        let host = state.by_addr.get(&key)?.clone();
        Self::touch_found(&mut state, &host);
        Some(host)
    }

    /// Looks up an existing host by sysid, bumping its refcount.
    pub async fn find_by_sysid(&self, sysid: u32) -> Option<Arc<Host>> {
        let host = self.by_sysid.get(&sysid).await?;
        let mut state = self.state.lock().await;
        Self::touch_found(&mut state, &host);
        Some(host)
    }

    /// Finds the host for `peer`, creating one (and allocating its sysid)
    /// on a miss. Allocation happens outside the registry lock; a racing
    /// `findcreate` for the same peer discards its surplus sysid and host
    /// (spec section 4.6/8: "returns the same host with a higher refcount
    /// and no new allocations observable").
    pub async fn findcreate(&self, caller_name: ClientName, peer: PeerAddr) -> Option<Arc<Host>> {
        let key = addr_key(&peer);
        {
            let mut state = self.state.lock().await;
            if let Some(existing) = state.by_addr.get(&key) {
                let host = existing.clone();
                Self::touch_found(&mut state, &host);
                return Some(host);
            }
        }

        let new_sysid = self.sysid_alloc.alloc().await;
        if new_sysid == sysid::NOSYSID {
            return None;
        }
        let candidate = Host::new(new_sysid, peer, caller_name);

        let mut state = self.state.lock().await;
        if let Some(existing) = state.by_addr.get(&key) {
            let host = existing.clone();
            Self::touch_found(&mut state, &host);
            drop(state);
            self.sysid_alloc.free(new_sysid).await;
            return Some(host);
        }
        state.by_addr.insert(key, candidate.clone());
        drop(state);
        self.by_sysid.insert(new_sysid, candidate.clone()).await;
        Some(candidate)
    }

    /// Releases one reference. On the refcnt reaching zero, stamps the
    /// idle-timeout deadline and appends the host to the idle LRU (spec
    /// section 4.6).
    pub async fn release(&self, host: Arc<Host>, idle_period: Duration) {
        let mut state = self.state.lock().await;
        if host.decref() == 0 {
            host.set_idle_timeout(Instant::now() + idle_period);
            state.idle.push_back(host);
        }
    }

    pub async fn idle_snapshot(&self) -> Vec<Arc<Host>> {
        self.state.lock().await.idle.iter().cloned().collect()
    }

    /// Re-stamps `host`'s idle deadline and moves it to the tail of the LRU
    /// (spec section 4.10: a host the GC found still busy gets requeued
    /// rather than destroyed).
    pub async fn requeue_idle(&self, host: &Arc<Host>, idle_period: Duration) {
        let mut state = self.state.lock().await;
        state.idle.retain(|h| !Arc::ptr_eq(h, host));
        host.set_idle_timeout(Instant::now() + idle_period);
        state.idle.push_back(host.clone());
    }

    /// Removes `host` from both indices and the idle list. Only valid when
    /// `host.refcnt() == 0` (called from GC or shutdown).
    pub async fn unregister(&self, host: &Arc<Host>) {
        let mut state = self.state.lock().await;
        state.by_addr.remove(&addr_key(&host.peer));
        state.idle.retain(|h| !Arc::ptr_eq(h, host));
        drop(state);
        self.by_sysid.remove(&host.sysid).await;
        self.sysid_alloc.free(host.sysid).await;
    }

    pub async fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.state.lock().await.by_addr.values().cloned().collect()
    }
}
