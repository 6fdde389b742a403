//! Command-line flags and configuration file loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pwrap::BridgeConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

const DEFAULT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Parser)]
#[command(
    name = "mockcmd",
    version,
    about = "A default mocked command which can be executed by pmux, but does not do anything useful."
)]
pub struct Args {
    /// Path to the configuration file [default: config.json]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the communication socket address
    #[arg(long = "socket-path", env = "PMUX_SOCKET_PATH")]
    pub socket_path: Option<PathBuf>,

    /// Milliseconds to wait per iteration
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Stop after this many iterations instead of running until cancelled
    #[arg(long)]
    pub iterations: Option<u64>,
}

/// Settings read from the configuration file, then overridden by flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub interval_ms: u64,
    pub iterations: Option<u64>,
    /// An empty `socket_path` means no bridge: progress goes to stdout.
    pub bridge: BridgeConfig,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            iterations: None,
            bridge: BridgeConfig::default(),
        }
    }
}

impl MockConfig {
    /// Load `path`, or the default file if `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an
    /// error, as is a malformed one.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(ref socket_path) = args.socket_path {
            self.bridge.socket_path = socket_path.clone();
        }
        if let Some(interval_ms) = args.interval_ms {
            self.interval_ms = interval_ms;
        }
        if args.iterations.is_some() {
            self.iterations = args.iterations;
        }
        self
    }

    pub fn socket_path(&self) -> Option<&Path> {
        let path = self.bridge.socket_path.as_path();
        (!path.as_os_str().is_empty()).then_some(path)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
