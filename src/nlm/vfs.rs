//! The local file system and its advisory-lock engine, named only at their
//! interface (spec section 1: both are external collaborators).
//!
//! Protocol handlers never touch a real file; they resolve an [`super::FileHandle`]
//! to an opaque [`VfsHandle`] and drive locks/shares through [`LocalLockEngine`].
//! Everything here is a seam for an embedder to implement against a real
//! local file system and its `GETLK`/`SETLK`/`SETLKW`/`UNLCK`/`UNLKSYS` and
//! share-reservation primitives.

use async_trait::async_trait;
use std::fmt;

use super::{FileHandle, Holder};

/// Opaque, hashable identity for a resolved file-system object, as produced
/// by the collaborator's `fhtovp`-equivalent translation. The core never
/// looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VfsHandle(pub Vec<u8>);

/// A byte-range lock specification, independent of wire version (v1/v3's
/// 32-bit vs v4's 64-bit offsets are both widened to `u64` once decoded).
#[derive(Debug, Clone)]
pub struct LockRange {
    pub offset: u64,
    pub len: u64,
    pub pid: u32,
    pub exclusive: bool,
    /// Opaque owner bytes (the wire `oh`), passed through uninterpreted.
    pub owner: Vec<u8>,
}

/// Failure shape returned by [`LocalLockEngine`] and translated by protocol
/// handlers into one of the RPC response codes in spec section 6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VfsError {
    /// `fh_to_vp` didn't resolve (maps to `stale_fh`).
    NotFound,
    /// The target is mounted read-only (maps to `denied`).
    ReadOnly,
    /// Non-blocking `SETLK`-equivalent couldn't be granted immediately
    /// (`F_SETLK` returning `EAGAIN`); the caller decides whether to
    /// escalate to a blocking wait.
    WouldBlock,
    /// The local engine couldn't allocate resources for the request (maps
    /// to `denied_nolocks`).
    NoLocks,
    /// Granting the lock would deadlock (maps to `deadlck`).
    Deadlock,
    /// The requested range exceeds what the server can represent (maps to
    /// `fbig`).
    TooBig,
    /// Anything else (maps to `failed`).
    Other(String),
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::NotFound => write!(f, "stale file handle"),
            VfsError::ReadOnly => write!(f, "read-only file system"),
            VfsError::WouldBlock => write!(f, "lock would block"),
            VfsError::NoLocks => write!(f, "no lock resources available"),
            VfsError::Deadlock => write!(f, "lock would deadlock"),
            VfsError::TooBig => write!(f, "range exceeds supported size"),
            VfsError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for VfsError {}

/// DOS-style share reservation mode, as carried in [`super::ShareMode`] but
/// independent of the wire enum so the collaborator trait doesn't need to
/// depend on wire-layer representation choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareDeny {
    None,
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareAccess {
    None,
    Read,
    Write,
    ReadWrite,
}

/// The local file system's advisory-lock engine: `GETLK`/`SETLK`/`SETLKW`/
/// `UNLCK`/`UNLKSYS`-equivalent operations plus share reservations, all
/// keyed by a numeric sysid supplied by the NLM core.
#[async_trait]
pub trait LocalLockEngine: Send + Sync {
    /// Resolves an opaque NFS file handle to a local file-object identity.
    async fn fh_to_vp(&self, fh: &FileHandle) -> Result<VfsHandle, VfsError>;

    /// `true` if the resolved object lives on a read-only mount (new locks
    /// and non-reclaim shares are refused against it).
    async fn is_read_only(&self, vp: &VfsHandle) -> bool;

    /// `GETLK`-equivalent: returns the conflicting holder, if any, without
    /// taking the lock.
    async fn test(&self, vp: &VfsHandle, sysid: u32, lock: &LockRange) -> Result<Option<Holder>, VfsError>;

    /// `SETLK`-equivalent: non-blocking. Returns [`VfsError::WouldBlock`]
    /// when the lock cannot be granted immediately (`EAGAIN`).
    async fn set_lock(&self, vp: &VfsHandle, sysid: u32, lock: &LockRange) -> Result<(), VfsError>;

    /// `SETLKW`-equivalent: blocks (the caller must have already detached
    /// via [`super::transport::ServingSlot`]) until granted, cancelled, or a
    /// fatal error occurs.
    async fn set_lock_blocking(&self, vp: &VfsHandle, sysid: u32, lock: &LockRange) -> Result<(), VfsError>;

    /// `UNLCK`-equivalent, ignoring the lock's `pid` (matches
    /// `F_UNLKSYS`/forced-cancel semantics where any lock of this `sysid`
    /// over the range is cleared regardless of owning process).
    async fn unlock(&self, vp: &VfsHandle, sysid: u32, lock: &LockRange) -> Result<(), VfsError>;

    /// Drops every lock this `sysid` holds on `vp`, ignoring `pid`
    /// (`cleanlocks(vp, IGN_PID, sysid)`).
    async fn cleanlocks(&self, vp: &VfsHandle, sysid: u32) -> Result<(), VfsError>;

    /// `true` if the local engine still has any lock or share open for
    /// `sysid`, anywhere (used by the garbage collector and by host/vhold
    /// busy checks — not scoped to a single `vp`).
    async fn has_locks(&self, sysid: u32) -> bool;

    /// Requests a DOS-style share reservation.
    async fn share(
        &self,
        vp: &VfsHandle,
        sysid: u32,
        owner: &[u8],
        deny: ShareDeny,
        access: ShareAccess,
    ) -> Result<(), VfsError>;

    /// Releases a previously granted share reservation.
    async fn unshare(&self, vp: &VfsHandle, sysid: u32, owner: &[u8]) -> Result<(), VfsError>;

    /// Drops every share reservation this `sysid` holds on `vp`
    /// (`cleanshares_by_sysid`).
    async fn cleanshares_by_sysid(&self, vp: &VfsHandle, sysid: u32) -> Result<(), VfsError>;
}
