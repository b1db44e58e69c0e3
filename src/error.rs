//! Error Types
//!
//! Every fallible operation in the crate returns [`ManagerError`]. The variants
//! map onto the failure classes the manager distinguishes:
//!
//! | Variant | Raised by | Handling |
//! |---------|-----------|----------|
//! | `ConnectionClosed` | a read or write on one connection | connection is closed; the loop suppresses it |
//! | `ReadinessWait` | the multiplexing wait itself | fatal, propagates out of `run()` |
//! | `UnknownConnection` / `UnknownIdentifier` | id or identifier addressing | reported to the caller, no state change |
//! | `Bind` | creating the listening socket | fatal, propagates out of `run()` |
//!
//! Listener failures are not represented here: hooks return
//! `anyhow::Result`, and the manager logs and drops any `Err`.

use crate::connection::ConnectionId;
use std::fmt;
use std::io;

/// Why a connection went from open to closed during I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer shut down its side of the stream (zero-length read).
    PeerClosed,
    /// A read returned an error other than would-block.
    ReadFailed(io::ErrorKind),
    /// A write returned an error other than would-block.
    WriteFailed(io::ErrorKind),
    /// The socket accepted zero bytes of a non-empty write.
    WriteZero,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::ReadFailed(kind) => write!(f, "read failed ({})", kind),
            CloseReason::WriteFailed(kind) => write!(f, "write failed ({})", kind),
            CloseReason::WriteZero => write!(f, "socket accepted no data"),
        }
    }
}

/// Errors returned by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The connection's stream is gone; it has already been closed.
    #[error("Connection {id} closed: {reason}")]
    ConnectionClosed { id: ConnectionId, reason: CloseReason },

    /// The readiness wait failed
    #[error("Readiness wait failed: {0}")]
    ReadinessWait(#[source] io::Error),

    /// No live connection has this id
    #[error("Connection {0} not found")]
    UnknownConnection(ConnectionId),

    /// No live connection carries this identifier
    #[error("Connection \"{0}\" not found")]
    UnknownIdentifier(String),

    /// The listening socket could not be created
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// I/O error while setting up the poller
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ManagerError {
    /// Returns true for the id/identifier lookup misses.
    pub fn is_addressing_failure(&self) -> bool {
        matches!(
            self,
            ManagerError::UnknownConnection(_) | ManagerError::UnknownIdentifier(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ManagerError>;
