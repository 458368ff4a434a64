//! Network Lock Manager (NLM) core: the host/vhold bookkeeping, sleeping-lock
//! queues, status-monitor integration and GC that sit behind a server's
//! NLM and NSM procedure handlers.
//!
//! This crate does not own a transport or a virtual filesystem — callers
//! supply both (`nlm::transport::Transport` and `nlm::vfs::LocalLockEngine`)
//! and drive `nlm::engine::Engine` from whatever RPC dispatch they already
//! run.

pub mod config;
pub mod error;
pub mod nlm;
pub mod nsm;

pub use error::{Error, Result};
