//! Bridge configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::bridge::protocol::DEFAULT_DELIMITER;

/// Default cap on a single inbound command line, in bytes.
pub const DEFAULT_MAX_COMMAND_LENGTH: usize = 8 * 1024;

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Settings for a [`CommBridge`](crate::CommBridge).
///
/// Passed by value into the constructor; the bridge keeps no global state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Filesystem path of the Unix socket to bind.
    pub socket_path: PathBuf,
    /// Field delimiter for outbound progress lines.
    pub delimiter: char,
    /// Inbound lines longer than this are skipped.
    pub max_command_length: usize,
    /// How long callers should wait for the bridge to reach Closed after
    /// cancellation before giving up.
    #[serde(with = "millis")]
    pub shutdown_grace: Duration,
}

impl BridgeConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::new(),
            delimiter: DEFAULT_DELIMITER,
            max_command_length: DEFAULT_MAX_COMMAND_LENGTH,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
