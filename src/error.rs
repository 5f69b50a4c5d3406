//! Error types for worldsync.
//!
//! Library code returns [`SyncError`]. Binaries wrap it in `anyhow` for
//! context. Server-side failures that still have a live connection are
//! reported to the peer as an [`ErrorReason`] on an `ERR` line.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the protocol, tree and storage layers.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Peer closed, unreachable, or timed out.
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// No line terminator within the receive limit.
    #[error("line exceeds {limit} bytes without a terminator")]
    LineTooLong { limit: usize },

    /// Formatted outgoing line does not fit the line limit.
    #[error("message of {len} bytes exceeds line limit of {limit}")]
    MessageTooLarge { len: usize, limit: usize },

    /// Malformed line or a response the state machine did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid world name: {0:?}")]
    InvalidName(String),

    #[error("path length {0} outside the accepted range")]
    NameTooLong(u64),

    /// Entry path that would escape the target directory.
    #[error("unsafe entry path: {0:?}")]
    UnsafePath(String),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("world not found: {0}")]
    NotFound(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The server aborted the command with `ERR <reason>`.
    #[error("server error: {0}")]
    Remote(String),
}

impl SyncError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SyncError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        SyncError::Protocol(msg.into())
    }

    /// Typed reason for a `Remote` error, if the server sent a known one.
    pub fn remote_reason(&self) -> Option<ErrorReason> {
        match self {
            SyncError::Remote(reason) => reason.parse().ok(),
            _ => None,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, SyncError::Connection(_))
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Reasons carried on `ERR` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    InvalidCommand,
    InvalidName,
    /// Never sent by this server; the allocator aborts instead. Parsed for
    /// compatibility.
    OutOfMemory,
    ServerError,
    ReceiveFailed,
    NotFound,
    UnknownCommand,
}

impl ErrorReason {
    pub const ALL: [ErrorReason; 7] = [
        ErrorReason::InvalidCommand,
        ErrorReason::InvalidName,
        ErrorReason::OutOfMemory,
        ErrorReason::ServerError,
        ErrorReason::ReceiveFailed,
        ErrorReason::NotFound,
        ErrorReason::UnknownCommand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::InvalidCommand => "InvalidCommand",
            ErrorReason::InvalidName => "InvalidName",
            ErrorReason::OutOfMemory => "OutOfMemory",
            ErrorReason::ServerError => "ServerError",
            ErrorReason::ReceiveFailed => "ReceiveFailed",
            ErrorReason::NotFound => "NotFound",
            ErrorReason::UnknownCommand => "UnknownCommand",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorReason {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        ErrorReason::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| SyncError::protocol(format!("unknown error reason {s:?}")))
    }
}
