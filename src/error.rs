//! Crate-level error type.
//!
//! Most failures a caller can provoke resolve to one of the RPC response
//! codes documented on [`crate::nlm::Response`] and never surface here —
//! see `nlm::vfs::VfsError` and `nlm::transport::TransportError` for the
//! shapes those collaborator failures take before a handler maps them.
//! [`Error`] is reserved for conditions that have no such response code:
//! startup configuration failures and process-wide misconfiguration.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// The supplied configuration failed to parse or validate.
    Config(String),
    /// The sysid space was configured with zero width, leaving no sysids
    /// for remote hosts to be assigned.
    EmptySysidSpace,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(message) => write!(f, "invalid configuration: {message}"),
            Error::EmptySysidSpace => write!(f, "sysid space must contain at least one id"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
