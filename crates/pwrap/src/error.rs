//! Error types for the bridge.

use std::io;
use std::path::PathBuf;

/// Errors surfaced by [`CommBridge`](crate::CommBridge) operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The socket path could not be bound (in use, not writable, invalid).
    #[error("failed to bind socket at {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No supervisor is attached; the update was dropped.
    #[error("no peer connected")]
    NotConnected,

    /// Read or write failure on an established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub fn bind(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Bind {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }
}

/// Error returned by a [`CommandHandler`](crate::CommandHandler).
///
/// Logged by the dispatcher; never stops it.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("rejected command: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Malformed progress line.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid value for {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_path() {
        let err = BridgeError::bind(
            "/tmp/pmux.sock",
            io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        );
        assert_eq!(
            err.to_string(),
            "failed to bind socket at /tmp/pmux.sock: address in use"
        );
    }

    #[test]
    fn handler_error_wraps_bridge_error() {
        let err: HandlerError = BridgeError::NotConnected.into();
        assert_eq!(err.to_string(), "no peer connected");
    }
}
