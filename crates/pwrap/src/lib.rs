//! pwrap: a Unix socket bridge between a worker process and its supervisor.
//!
//! The worker reports structured progress outward and receives commands
//! (e.g. cancellation) inward over one newline-delimited text channel.

pub mod bridge;
mod comm_bridge;
mod config;
mod dispatcher;
mod error;
mod handler;
mod sink;
mod state;

pub use bridge::codec::{encode, parse_progress_line, sanitize_description};
pub use bridge::protocol::{DEFAULT_DELIMITER, NOT_APPLICABLE, ProgressUpdate};
pub use comm_bridge::CommBridge;
pub use config::{BridgeConfig, DEFAULT_MAX_COMMAND_LENGTH};
pub use error::{BridgeError, HandlerError, ParseError};
pub use handler::{CANCEL_COMMAND, CancelOnCommand, CommandHandler};
pub use sink::ProgressSink;
pub use state::BridgeState;
pub use tokio_util::sync::CancellationToken;
