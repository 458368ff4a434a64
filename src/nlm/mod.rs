//! Network Lock Manager: wire-level types, the [`Nlm`] protocol-handler
//! trait, and the stateful engine behind it.
//!
//! Submodules, leaves first: [`sysid`] and [`netobj`] are dependency-free
//! utilities; [`vfs`] and [`transport`] are the external collaborators named
//! at the core's boundary; [`nsm_client`], [`vhold`], [`sleep_server`],
//! [`sleep_client`], [`host`] are the registries; [`rpc_cache`], [`notify`],
//! [`reclaim`], [`gc`] sit on top of the host registry; [`registry`] ties
//! everything into one process-wide instance; [`engine`] implements [`Nlm`]
//! against it.

use async_trait::async_trait;

pub mod engine;
pub mod gc;
pub mod host;
pub mod netobj;
pub mod notify;
pub mod nsm_client;
pub mod reclaim;
pub mod registry;
pub mod rpc_cache;
pub mod sleep_client;
pub mod sleep_server;
pub mod sysid;
pub mod transport;
pub mod vfs;
pub mod vhold;

#[allow(dead_code)]
pub const MAX_CLIENT_NAME_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Indicates that the procedure call completed successfully.
    Granted = 0,
    /// Indicates that the request failed.
    Denied = 1,
    /// Indicates that the procedure call failed
    /// because the server NLM could not allocate
    /// the resources needed to process the request.
    DeniedNoLocks = 2,
    /// Indicates the blocking request cannot be granted immediately.
    /// The server NLM will make a call-back to the client
    /// with an NLM_GRANTED procedure call when the lock can be granted.
    Blocked = 3,
    /// Indicates that the procedure call failed
    /// because the server has recently been rebooted
    /// and the server NLM is re-establishing existing locks,
    /// and is not yet ready to accept normal service requests.
    DeniedGracePeriod = 4,
    /// The request could not be granted and blocking would cause a deadlock.
    Deadlock = 5,
    /// The call failed because the remote file system is read-only.
    ReadonlyFileSystem = 6,
    /// The call failed because it uses an invalid file handle.
    InvalidFileHandler = 7,
    /// The call failed because it specified a length or offset
    /// that exceeds the range supported by the server.
    ExceededRange = 8,
    /// The call failed for some reason not already listed.
    /// The client should probably retry the request.
    Failed = 9,
}

impl From<&vfs::VfsError> for Response {
    fn from(error: &vfs::VfsError) -> Self {
        match error {
            vfs::VfsError::NotFound => Response::InvalidFileHandler,
            vfs::VfsError::ReadOnly => Response::ReadonlyFileSystem,
            vfs::VfsError::WouldBlock => Response::Denied,
            vfs::VfsError::NoLocks => Response::DeniedNoLocks,
            vfs::VfsError::Deadlock => Response::Deadlock,
            vfs::VfsError::TooBig => Response::ExceededRange,
            vfs::VfsError::Other(_) => Response::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientName(pub String);

/// Opaque object carried on the wire: owner handles, cookies. NLM's
/// `netobj` is variable-length, so this wraps an owned buffer rather than
/// the fixed-size array `NETOBJ_SIZE` might suggest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Netobj(pub Vec<u8>);

/// Opaque NFS file handle (spec section 6): handed to the file-system
/// collaborator's `fhtovp`-equivalent translation and never interpreted
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHandle(pub Vec<u8>);

/// Holder of a lock.
#[derive(Debug, Clone)]
pub struct Holder {
    /// Tells whether the holder has an exclusive lock or a shared lock
    pub exclusive: bool,
    /// Identifies the process that is holding the lock.
    pub pid: u32,
    /// An opaque object that identifies the host,
    /// or a process on the host, that is holding the lock.
    pub owner: Netobj,
    /// Identifies the offset of the region that is locked.
    pub locked_offset: u64,
    /// Identifies the length of the region that is locked.
    pub locked_len: u64,
}

/// Lock request.
#[derive(Debug, Clone)]
pub struct LockRequest {
    /// Host that is making the request.
    pub client_name: ClientName,
    /// File to lock. NFS Server id, opaque to client.
    pub nfs_fh: FileHandle,
    /// An opaque object that identifies the host,
    /// or a process on the host, that is making the request.
    pub owner: Netobj,
    /// Process that is making the request.
    pub pid: u32,
    /// Offset of the region that is locked.
    pub locked_offset: u64,
    /// Length of the region that is locked.
    /// A l_len of zero means "to end-of-file."
    pub locked_len: u64,
}

/// Information needed to request a lock on a server.
#[derive(Debug, Clone)]
pub struct LockArgs {
    pub cookie: Netobj,
    pub block: bool,
    pub exclusive: bool,
    pub actual_lock: LockRequest,
    pub reclaim: bool,
    pub state: u32,
}

/// The result of the lock requests,
/// returned by all of the main lock routines except for NLM_TEST.
#[derive(Debug, Clone)]
pub struct LockResult {
    /// Cookie echoed back from the request.
    pub cookie: Netobj,
    /// Actual response to the lock request.
    pub stat: Response,
}

/// Information needed to cancel an outstanding lock request.
/// The data in the CancelArgs structure must exactly match
/// the corresponding information in the LockArgs structure
/// of the outstanding lock request to be cancelled.
#[derive(Debug, Clone)]
pub struct CancelArgs {
    pub cookie: Netobj,
    pub block: bool,
    pub exclusive: bool,
    pub actual_lock: LockRequest,
}

/// Information needed to remove a previously established lock.
#[derive(Debug, Clone)]
pub struct UnlockArgs {
    pub cookie: Netobj,
    pub actual_lock: LockRequest,
}

/// DOS-style file-sharing deny mode: what is denied to other clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    /// Deny none.
    DenyNone = 0,
    /// Deny read.
    DenyRead = 1,
    /// Deny write.
    DenyWrite = 2,
    /// Deny read/write.
    DenyReadWrite = 3,
}

/// Access requested by the client making the SHARE call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// None.
    None = 0,
    /// Read-only.
    Read = 1,
    /// Write-only.
    Write = 2,
    /// Read/Write.
    ReadWrite = 3,
}

/// DOS file sharing description.
#[derive(Debug, Clone)]
pub struct Share {
    /// Host that is making the request.
    pub client_name: ClientName,
    /// File to be operated on. NFS Server id, opaque to client.
    pub nfs_fh: FileHandle,
    /// An opaque object that identifies the host,
    /// or a process on the host, that is making the request.
    pub owner: Netobj,
    /// File-sharing mode. Identifies what is allowed to other clients.
    pub share_mod: ShareMode,
    /// Access mode, requested by the client.
    pub access_mode: AccessMode,
}

/// Information needed to uniquely specify a share operation.
/// Arguments for an NLM_SHARE or NLM_UNSHARE
#[derive(Debug, Clone)]
pub struct ShareArgs {
    pub cookie: Netobj,
    /// Actual share data.
    pub share: Share,
    /// Must be true if the client is attempting to
    /// reclaim a previously-granted sharing request.
    pub reclaim: bool,
}

/// Results of an NLM_SHARE or NLM_UNSHARE procedure call
#[derive(Debug, Clone)]
pub struct ShareResult {
    pub cookie: Netobj,
    /// Actual response to the share request.
    pub stats: Response,
    /// Sequence number.
    pub sequence: i32,
}

/// Inbound `NLM_FREE_ALL` / SM `NOTIFY` payload: a host name and its new
/// state counter.
#[derive(Debug, Clone)]
pub struct Notify {
    pub name: String,
    pub state: i64,
}

/// Arguments for the TEST procedure.
#[derive(Debug, Clone)]
pub struct TestArgs {
    pub cookie: Netobj,
    pub exclusive: bool,
    pub actual_lock: LockRequest,
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub cookie: Netobj,
    /// Actual response to the test request. `Granted` carries no holder;
    /// `Denied` carries the conflicting [`Holder`]; any other status means
    /// the test could not be performed at all (grace period, stale handle,
    /// exhausted sysids, ...) and `test_stats` is left empty.
    pub stat: Response,
    pub test_stats: Option<Holder>,
}

#[async_trait]
pub trait Nlm: Sync + Send {
    async fn null(&self, promise: impl promise::Null + Send);

    async fn test(&self, args: TestArgs, promise: impl promise::Test + Send);

    async fn lock(&self, args: LockArgs, promise: impl promise::Lock + Send);

    async fn cancel(&self, args: CancelArgs, promise: impl promise::Cancel + Send);

    async fn unlock(&self, args: UnlockArgs, promise: impl promise::Unlock + Send);

    // Server-to-Client callback
    async fn granted(&self, args: TestArgs, promise: impl promise::Granted + Send);

    // --- Message passing (Asynchronous) procedures ---
    // These generally return void; their results arrive later via the
    // matching `*_res` call.

    async fn test_msg(&self, args: TestArgs, promise: impl promise::Void + Send);

    async fn lock_msg(&self, args: LockArgs, promise: impl promise::Void + Send);

    async fn cancel_msg(&self, args: CancelArgs, promise: impl promise::Void + Send);

    async fn unlock_msg(&self, args: UnlockArgs, promise: impl promise::Void + Send);

    async fn granted_msg(&self, args: TestArgs, promise: impl promise::Void + Send);

    // --- Message Responses (Callback results) ---
    // These are sent by the peer back to report the result of a `*_msg` call.

    async fn test_res(&self, res: TestResult, promise: impl promise::MsgResult + Send);

    async fn lock_res(&self, res: LockResult, promise: impl promise::MsgResult + Send);

    async fn cancel_res(&self, res: LockResult, promise: impl promise::MsgResult + Send);

    async fn unlock_res(&self, res: LockResult, promise: impl promise::MsgResult + Send);

    async fn granted_res(&self, res: LockResult, promise: impl promise::MsgResult + Send);

    // --- DOS Sharing ---

    async fn share(&self, args: ShareArgs, promise: impl promise::Share + Send);

    async fn unshare(&self, args: ShareArgs, promise: impl promise::Share + Send);

    async fn nm_lock(&self, args: LockArgs, promise: impl promise::Lock + Send);

    async fn free_all(&self, args: Notify, promise: impl promise::Void + Send);
}

pub mod promise {
    use crate::nlm::{LockResult, ShareResult, TestResult};

    pub trait Null {
        fn keep(self);
    }

    pub trait Test {
        fn keep(self, result: TestResult);
    }

    pub trait Lock {
        fn keep(self, result: LockResult);
    }

    pub trait Cancel {
        fn keep(self, result: LockResult);
    }

    pub trait Unlock {
        fn keep(self, result: LockResult);
    }

    pub trait Granted {
        fn keep(self, result: LockResult);
    }

    pub trait Share {
        fn keep(self, result: ShareResult);
    }

    pub trait MsgResult {
        fn keep(self);
    }

    /// Generic promise for procedures that return void (or just success/fail without data).
    pub trait Void {
        fn keep(self);
    }
}
