//! # IPC Errors
//!
//! Error type shared by the server and both clients.
//!
//! - **Version**: 1.1.0
//! - **Since**: 2.0.0
//!
//! ## Changelog
//! - 1.1.0: `ObserverIdsExhausted`
//! - 1.0.0: Initial error taxonomy

use crate::ipc::protocol::{DecodeError, ErrorReason};
use std::path::PathBuf;

/// Errors returned by the IPC server and clients.
///
/// `Bind`, `Discovery` and `ObserverIdsExhausted` stay local to the server; the
/// rest map one-to-one onto the wire [`ErrorReason`]s.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    #[error("failed to bind IPC socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to write discovery record {}: {source}", .path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("API version {found} not supported (expected {expected})")]
    VersionNotSupported { expected: u32, found: u32 },

    #[error("not connected")]
    NotConnected,

    #[error("malformed request: {0}")]
    MalformedRequest(#[from] DecodeError),

    #[error("already observing")]
    AlreadyObserving,

    #[error("not observing")]
    NotObserving,

    #[error("no observer IDs left")]
    ObserverIdsExhausted,
}

impl IpcError {
    /// Wire reason for this error, if it has one
    pub fn reason(&self) -> Option<ErrorReason> {
        match self {
            IpcError::Bind(_) | IpcError::Discovery { .. } | IpcError::ObserverIdsExhausted => None,
            IpcError::ConnectionFailed(_) => Some(ErrorReason::ConnectionFailed),
            IpcError::VersionNotSupported { .. } => Some(ErrorReason::VersionNotSupported),
            IpcError::NotConnected => Some(ErrorReason::NotConnected),
            IpcError::MalformedRequest(_) => Some(ErrorReason::MalformedRequest),
            IpcError::AlreadyObserving => Some(ErrorReason::AlreadyObserving),
            IpcError::NotObserving => Some(ErrorReason::NotObserving),
        }
    }
}
