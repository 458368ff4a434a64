//! Protocol handlers (spec section 4.11) and the process-wide [`Engine`]
//! they run against.
//!
//! The wire-level [`Nlm`] trait has a fixed signature with no peer-address
//! parameter, but every handler needs `(caller_name, netid, peer_addr)` to
//! resolve a host. [`Engine`] holds the long-lived shared state (the
//! registry, the local lock engine, the transport, the reclaim driver);
//! [`Engine::for_peer`] produces a lightweight [`Call`] scoped to one
//! inbound connection's peer address, and `Call` is what implements [`Nlm`].
//! Inbound SM `NOTIFY1` is handled by [`Engine::sm_notify`] directly, since
//! it is a different RPC program/version/payload than anything in `Nlm`.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::host::Host;
use super::netobj::{self, PeerAddr};
use super::notify;
use super::reclaim::ClientReclaim;
use super::registry::GlobalRegistry;
use super::rpc_cache;
use super::sleep_server::{self, Registered};
use super::transport::{ServingSlot, Transport};
use super::vfs::{LocalLockEngine, LockRange, ShareAccess, ShareDeny, VfsError, VfsHandle};
use super::vhold::Vhold;
use super::{
    promise, AccessMode, CancelArgs, ClientName, FileHandle, LockArgs, LockRequest, LockResult, Netobj, Nlm, Response,
    ShareArgs, ShareMode, ShareResult, TestArgs, TestResult, UnlockArgs,
};
use crate::nsm::PRIVATE_LEN;

/// NLM version used for outbound `GRANTED` callbacks and reclaim traffic.
/// Version 1/3 peers are served with the same logic (offsets fit in `u64`
/// either way); the wire layer that negotiates the actual peer version is
/// out of scope here (spec section 6).
const NLM4_VERS: u32 = 4;

/// Process-wide shared state: the registry, the two external collaborators
/// (the local lock engine, the RPC transport), and the reclaim driver.
pub struct Engine {
    pub registry: Arc<GlobalRegistry>,
    pub local: Arc<dyn LocalLockEngine>,
    pub transport: Arc<dyn Transport>,
    pub reclaim_driver: Arc<dyn ClientReclaim>,
}

impl Engine {
    /// Scopes this engine to one inbound call's peer address.
    pub fn for_peer(self: &Arc<Self>, peer: PeerAddr) -> Call {
        Call { engine: self.clone(), peer }
    }

    /// Inbound SM `NOTIFY1` (spec section 4.11 "NOTIFY (from SM)"): extract
    /// the sysid from the private cookie, and if a live host still owns it,
    /// run both halves of the notifier.
    pub async fn sm_notify(&self, cookie: [u8; PRIVATE_LEN], state: i64) {
        let sysid = super::nsm_client::NsmClient::sysid_from_cookie(&cookie);
        let Some(host) = self.registry.hosts.find_by_sysid(sysid).await else {
            debug!(sysid, "NOTIFY for unknown sysid, ignored");
            return;
        };
        let new_state = state.max(0) as u32;
        notify::notify_server(&host, new_state, self.local.as_ref()).await;
        notify::notify_client(
            host.clone(),
            new_state,
            self.registry.hosts.clone(),
            self.registry.config.idle_timeout(),
            self.reclaim_driver.clone(),
        )
        .await;
        self.registry.hosts.release(host, self.registry.config.idle_timeout()).await;
    }
}

/// One inbound call's handler context: the shared [`Engine`] plus the
/// peer address this call arrived from.
#[derive(Clone)]
pub struct Call {
    engine: Arc<Engine>,
    peer: PeerAddr,
}

fn to_share_deny(mode: ShareMode) -> ShareDeny {
    match mode {
        ShareMode::DenyNone => ShareDeny::None,
        ShareMode::DenyRead => ShareDeny::Read,
        ShareMode::DenyWrite => ShareDeny::Write,
        ShareMode::DenyReadWrite => ShareDeny::ReadWrite,
    }
}

fn to_share_access(mode: AccessMode) -> ShareAccess {
    match mode {
        AccessMode::None => ShareAccess::None,
        AccessMode::Read => ShareAccess::Read,
        AccessMode::Write => ShareAccess::Write,
        AccessMode::ReadWrite => ShareAccess::ReadWrite,
    }
}

fn lock_range(request: &LockRequest, exclusive: bool) -> LockRange {
    LockRange {
        offset: request.locked_offset,
        len: request.locked_len,
        pid: request.pid,
        exclusive,
        owner: request.owner.0.clone(),
    }
}

impl Call {
    async fn do_null(&self) {}

    async fn do_test(&self, args: TestArgs) -> TestResult {
        let cookie = args.cookie.clone();
        let idle = self.engine.registry.config.idle_timeout();
        let Some(host) =
            self.engine.registry.hosts.findcreate(args.actual_lock.client_name.clone(), self.peer.clone()).await
        else {
            return TestResult { cookie, stat: Response::DeniedNoLocks, test_stats: None };
        };

        if self.engine.registry.in_grace_period() {
            self.engine.registry.hosts.release(host, idle).await;
            return TestResult { cookie, stat: Response::DeniedGracePeriod, test_stats: None };
        }

        let vp = match self.engine.local.fh_to_vp(&args.actual_lock.nfs_fh).await {
            Ok(vp) => vp,
            Err(error) => {
                self.engine.registry.hosts.release(host, idle).await;
                return TestResult { cookie, stat: Response::from(&error), test_stats: None };
            }
        };

        let range = lock_range(&args.actual_lock, args.exclusive);
        let result = self.engine.local.test(&vp, host.sysid, &range).await;
        self.engine.registry.hosts.release(host, idle).await;

        match result {
            Ok(None) => TestResult { cookie, stat: Response::Granted, test_stats: None },
            Ok(Some(holder)) => TestResult { cookie, stat: Response::Denied, test_stats: Some(holder) },
            Err(error) => TestResult { cookie, stat: Response::from(&error), test_stats: None },
        }
    }

    /// Shared body for `LOCK` and `NM_LOCK`. `grant_callback_available`
    /// tells the `AGAIN` branch whether a blocking wait is even an option
    /// (spec section 8: an `NM` caller never gets `blocked`).
    async fn do_lock(&self, args: LockArgs, grant_callback_available: bool) -> LockResult {
        let cookie = args.cookie.clone();
        let idle = self.engine.registry.config.idle_timeout();
        let Some(host) =
            self.engine.registry.hosts.findcreate(args.actual_lock.client_name.clone(), self.peer.clone()).await
        else {
            return LockResult { cookie, stat: Response::DeniedNoLocks };
        };

        if self.engine.registry.in_grace_period() && !args.reclaim {
            self.engine.registry.hosts.release(host, idle).await;
            return LockResult { cookie, stat: Response::DeniedGracePeriod };
        }

        let vp = match self.engine.local.fh_to_vp(&args.actual_lock.nfs_fh).await {
            Ok(vp) => vp,
            Err(error) => {
                self.engine.registry.hosts.release(host, idle).await;
                return LockResult { cookie, stat: Response::from(&error) };
            }
        };

        if !args.reclaim && self.engine.local.is_read_only(&vp).await {
            self.engine.registry.hosts.release(host, idle).await;
            return LockResult { cookie, stat: Response::ReadonlyFileSystem };
        }

        let vhold = host.get_vhold(vp.clone()).await;
        let range = lock_range(&args.actual_lock, args.exclusive);

        let mut do_mon_req = false;
        let mut do_blocking = false;
        let outcome = match self.engine.local.set_lock(&vp, host.sysid, &range).await {
            Ok(()) => {
                do_mon_req = true;
                LockResult { cookie: cookie.clone(), stat: Response::Granted }
            }
            Err(VfsError::WouldBlock) => {
                if !args.block || !grant_callback_available {
                    LockResult { cookie: cookie.clone(), stat: Response::Denied }
                } else {
                    do_mon_req = true;
                    do_blocking = true;
                    LockResult { cookie: cookie.clone(), stat: Response::Blocked }
                }
            }
            Err(VfsError::NoLocks) => LockResult { cookie: cookie.clone(), stat: Response::DeniedNoLocks },
            Err(error) => LockResult { cookie: cookie.clone(), stat: Response::from(&error) },
        };

        if do_mon_req {
            self.ensure_monitored(&host).await;
        }

        if do_blocking {
            trace!(sysid = host.sysid, "detaching for blocking SETLKW");
            let engine = self.engine.clone();
            tokio::spawn(nlm_block(engine, host, vhold, range, cookie));
            return outcome;
        }

        vhold.decref();
        self.engine.registry.hosts.release(host, idle).await;
        outcome
    }

    async fn ensure_monitored(&self, host: &Arc<Host>) {
        if !host.begin_monitoring().await {
            return;
        }
        let name = crate::nsm::HostName(host.caller_name().await.0);
        if let Err(error) = self.engine.registry.nsm.monitor(host.sysid, name).await {
            warn!(sysid = host.sysid, %error, "SM_MON failed, lock still granted but host left unmonitored");
            host.mark_unmonitored().await;
        }
    }

    async fn do_cancel(&self, args: CancelArgs) -> LockResult {
        let cookie = args.cookie.clone();
        let idle = self.engine.registry.config.idle_timeout();
        let Some(host) = self.engine.registry.hosts.find(&self.peer.netid, self.peer.addr).await else {
            return LockResult { cookie, stat: Response::Denied };
        };

        if self.engine.registry.in_grace_period() {
            self.engine.registry.hosts.release(host, idle).await;
            return LockResult { cookie, stat: Response::DeniedGracePeriod };
        }

        let vp = match self.engine.local.fh_to_vp(&args.actual_lock.nfs_fh).await {
            Ok(vp) => vp,
            Err(error) => {
                self.engine.registry.hosts.release(host, idle).await;
                return LockResult { cookie, stat: Response::from(&error) };
            }
        };

        let vhold = host.get_vhold(vp.clone()).await;
        let range = lock_range(&args.actual_lock, args.exclusive);
        let unregistered = sleep_server::unregister(&vhold, &range).await;
        let unlocked = self.engine.local.unlock(&vp, host.sysid, &range).await.is_ok();
        vhold.decref();
        self.engine.registry.hosts.release(host, idle).await;

        let stat = if unregistered || unlocked { Response::Granted } else { Response::Denied };
        LockResult { cookie, stat }
    }

    async fn do_unlock(&self, args: UnlockArgs) -> LockResult {
        let cookie = args.cookie.clone();
        let idle = self.engine.registry.config.idle_timeout();
        let Some(host) = self.engine.registry.hosts.find(&self.peer.netid, self.peer.addr).await else {
            // No host on record: there is nothing to unlock, which is not a
            // failure (spec section 4.11: UNLOCK responds `granted`
            // unconditionally barring grace).
            return LockResult { cookie, stat: Response::Granted };
        };

        if self.engine.registry.in_grace_period() {
            self.engine.registry.hosts.release(host, idle).await;
            return LockResult { cookie, stat: Response::DeniedGracePeriod };
        }

        let stat = match self.engine.local.fh_to_vp(&args.actual_lock.nfs_fh).await {
            Ok(vp) => {
                let vhold = host.get_vhold(vp.clone()).await;
                let range = lock_range(&args.actual_lock, true);
                let _ = self.engine.local.unlock(&vp, host.sysid, &range).await;
                vhold.decref();
                Response::Granted
            }
            Err(error) => Response::from(&error),
        };
        self.engine.registry.hosts.release(host, idle).await;
        LockResult { cookie, stat }
    }

    async fn do_granted(&self, args: TestArgs) -> LockResult {
        let cookie = args.cookie.clone();
        let Some(sysid) = netobj::decode_owner_sysid(&args.actual_lock.owner.0) else {
            return LockResult { cookie, stat: Response::Denied };
        };
        let Some(host) = self.engine.registry.hosts.find_by_sysid(sysid).await else {
            return LockResult { cookie, stat: Response::Denied };
        };

        let vp = VfsHandle(args.actual_lock.nfs_fh.0.clone());
        let range = lock_range(&args.actual_lock, args.exclusive);
        let granted = self.engine.registry.sleeping_locks.grant(&host, &vp, &range).await;
        self.engine.registry.hosts.release(host, self.engine.registry.config.idle_timeout()).await;

        LockResult { cookie, stat: if granted { Response::Granted } else { Response::Denied } }
    }

    async fn do_share(&self, args: ShareArgs, is_share: bool) -> ShareResult {
        let cookie = args.cookie.clone();
        let idle = self.engine.registry.config.idle_timeout();
        let Some(host) =
            self.engine.registry.hosts.findcreate(args.share.client_name.clone(), self.peer.clone()).await
        else {
            return ShareResult { cookie, stats: Response::DeniedNoLocks, sequence: 0 };
        };

        // SHARE is exempt from grace when reclaiming; UNSHARE has no such
        // exemption and always rejects during grace (spec section 8).
        let in_grace = if is_share {
            self.engine.registry.in_grace_period() && !args.reclaim
        } else {
            self.engine.registry.in_grace_period()
        };
        if in_grace {
            self.engine.registry.hosts.release(host, idle).await;
            return ShareResult { cookie, stats: Response::DeniedGracePeriod, sequence: 0 };
        }

        let vp = match self.engine.local.fh_to_vp(&args.share.nfs_fh).await {
            Ok(vp) => vp,
            Err(error) => {
                self.engine.registry.hosts.release(host, idle).await;
                return ShareResult { cookie, stats: Response::from(&error), sequence: 0 };
            }
        };

        if is_share && !args.reclaim && self.engine.local.is_read_only(&vp).await {
            self.engine.registry.hosts.release(host, idle).await;
            return ShareResult { cookie, stats: Response::ReadonlyFileSystem, sequence: 0 };
        }

        let vhold = host.get_vhold(vp.clone()).await;
        let owner = args.share.owner.0.clone();
        let result = if is_share {
            let deny = to_share_deny(args.share.share_mod);
            let access = to_share_access(args.share.access_mode);
            self.engine.local.share(&vp, host.sysid, &owner, deny, access).await
        } else {
            self.engine.local.unshare(&vp, host.sysid, &owner).await
        };
        vhold.decref();

        let stats = match result {
            Ok(()) => Response::Granted,
            Err(error) => Response::from(&error),
        };

        if is_share && stats == Response::Granted {
            self.ensure_monitored(&host).await;
        }

        self.engine.registry.hosts.release(host, idle).await;
        ShareResult { cookie, stats, sequence: 0 }
    }

    async fn do_free_all(&self, args: super::Notify) {
        if let Some(host) = self.engine.registry.hosts.find(&self.peer.netid, self.peer.addr).await {
            let new_state = args.state.max(0) as u32;
            notify::notify_server(&host, new_state, self.engine.local.as_ref()).await;
            self.engine.registry.hosts.release(host, self.engine.registry.config.idle_timeout()).await;
        }
    }
}

#[async_trait::async_trait]
impl Nlm for Call {
    async fn null(&self, promise: impl promise::Null + Send) {
        self.do_null().await;
        promise.keep();
    }

    async fn test(&self, args: TestArgs, promise: impl promise::Test + Send) {
        promise.keep(self.do_test(args).await);
    }

    async fn lock(&self, args: LockArgs, promise: impl promise::Lock + Send) {
        promise.keep(self.do_lock(args, true).await);
    }

    async fn cancel(&self, args: CancelArgs, promise: impl promise::Cancel + Send) {
        promise.keep(self.do_cancel(args).await);
    }

    async fn unlock(&self, args: UnlockArgs, promise: impl promise::Unlock + Send) {
        promise.keep(self.do_unlock(args).await);
    }

    async fn granted(&self, args: TestArgs, promise: impl promise::Granted + Send) {
        promise.keep(self.do_granted(args).await);
    }

    async fn test_msg(&self, args: TestArgs, promise: impl promise::Void + Send) {
        promise.keep();
        let call = self.clone();
        tokio::spawn(async move {
            let result = call.do_test(args).await;
            debug!(stat = ?result.stat, "test_msg result (no outbound _res callback wired)");
        });
    }

    async fn lock_msg(&self, args: LockArgs, promise: impl promise::Void + Send) {
        promise.keep();
        let call = self.clone();
        tokio::spawn(async move {
            let result = call.do_lock(args, true).await;
            debug!(stat = ?result.stat, "lock_msg result (no outbound _res callback wired)");
        });
    }

    async fn cancel_msg(&self, args: CancelArgs, promise: impl promise::Void + Send) {
        promise.keep();
        let call = self.clone();
        tokio::spawn(async move {
            let result = call.do_cancel(args).await;
            debug!(stat = ?result.stat, "cancel_msg result (no outbound _res callback wired)");
        });
    }

    async fn unlock_msg(&self, args: UnlockArgs, promise: impl promise::Void + Send) {
        promise.keep();
        let call = self.clone();
        tokio::spawn(async move {
            let result = call.do_unlock(args).await;
            debug!(stat = ?result.stat, "unlock_msg result (no outbound _res callback wired)");
        });
    }

    async fn granted_msg(&self, args: TestArgs, promise: impl promise::Void + Send) {
        promise.keep();
        let call = self.clone();
        tokio::spawn(async move {
            let result = call.do_granted(args).await;
            debug!(stat = ?result.stat, "granted_msg result (no outbound _res callback wired)");
        });
    }

    async fn test_res(&self, res: TestResult, promise: impl promise::MsgResult + Send) {
        debug!(stat = ?res.stat, "received test_res");
        promise.keep();
    }

    async fn lock_res(&self, res: LockResult, promise: impl promise::MsgResult + Send) {
        debug!(stat = ?res.stat, "received lock_res");
        promise.keep();
    }

    async fn cancel_res(&self, res: LockResult, promise: impl promise::MsgResult + Send) {
        debug!(stat = ?res.stat, "received cancel_res");
        promise.keep();
    }

    async fn unlock_res(&self, res: LockResult, promise: impl promise::MsgResult + Send) {
        debug!(stat = ?res.stat, "received unlock_res");
        promise.keep();
    }

    async fn granted_res(&self, res: LockResult, promise: impl promise::MsgResult + Send) {
        debug!(stat = ?res.stat, "received granted_res");
        promise.keep();
    }

    async fn share(&self, args: ShareArgs, promise: impl promise::Share + Send) {
        promise.keep(self.do_share(args, true).await);
    }

    async fn unshare(&self, args: ShareArgs, promise: impl promise::Share + Send) {
        promise.keep(self.do_share(args, false).await);
    }

    async fn nm_lock(&self, args: LockArgs, promise: impl promise::Lock + Send) {
        promise.keep(self.do_lock(args, false).await);
    }

    async fn free_all(&self, args: super::Notify, promise: impl promise::Void + Send) {
        self.do_free_all(args).await;
        promise.keep();
    }
}

/// The blocking path (spec section 4.11 "nlm_block"): runs detached from
/// the serving pool, as its own task. Registers the server-side sleeping
/// request, issues the blocking `SETLKW`-equivalent, and on success calls
/// the peer back with `GRANTED`. Errors from the grant callback are logged
/// only — the client is responsible for retrying on its own timeout (spec
/// section 7).
///
/// `vhold` and `host` arrive already holding the reference the caller took
/// before detaching; this function releases both before returning.
async fn nlm_block(engine: Arc<Engine>, host: Arc<Host>, vhold: Arc<Vhold>, range: LockRange, cookie: Netobj) {
    let _slot = ServingSlot::detach();
    let idle = engine.registry.config.idle_timeout();

    if sleep_server::register(&vhold, &range).await == Registered::AlreadyRegistered {
        vhold.decref();
        engine.registry.hosts.release(host, idle).await;
        return;
    }

    let result = engine.local.set_lock_blocking(&vhold.vp, host.sysid, &range).await;
    sleep_server::unregister(&vhold, &range).await;

    match result {
        Ok(()) => {
            // The original inbound file handle isn't retained on the
            // vhold; the callback's `nfs_fh` field is therefore
            // reconstructed from the vhold's opaque identity, which is the
            // only identity this module still has at hand.
            let test_args = TestArgs {
                cookie,
                exclusive: range.exclusive,
                actual_lock: LockRequest {
                    client_name: host.caller_name().await,
                    nfs_fh: FileHandle(vhold.vp.0.clone()),
                    owner: Netobj(range.owner.clone()),
                    pid: range.pid,
                    locked_offset: range.offset,
                    locked_len: range.len,
                },
            };
            match rpc_cache::get_rpc(&host, engine.transport.as_ref(), NLM4_VERS).await {
                Ok(handle) => {
                    if let Err(error) = handle.granted(&test_args).await {
                        warn!(sysid = host.sysid, %error, "GRANTED callback failed, client must retry");
                    }
                }
                Err(error) => warn!(sysid = host.sysid, %error, "no RPC handle available for GRANTED callback"),
            }
        }
        Err(error) => {
            debug!(sysid = host.sysid, %error, "blocking SETLKW did not complete");
        }
    }

    vhold.decref();
    engine.registry.hosts.release(host, idle).await;
}
