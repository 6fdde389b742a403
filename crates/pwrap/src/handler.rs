//! Command handlers invoked by the dispatcher.

use tokio_util::sync::CancellationToken;

use crate::comm_bridge::CommBridge;
use crate::error::HandlerError;

/// Substring that marks a line as a shutdown request.
pub const CANCEL_COMMAND: &str = "cancel";

/// Reacts to one inbound command line.
///
/// Registered once when the bridge is bound and never replaced. Errors are
/// logged by the dispatcher, which keeps reading. Handlers may call
/// [`CommBridge::close`].
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, bridge: &CommBridge, command: &str) -> Result<(), HandlerError>;
}

/// Cancels the worker and closes the bridge on any line containing `cancel`.
///
/// Every other line is logged and ignored.
#[derive(Debug, Clone)]
pub struct CancelOnCommand {
    token: CancellationToken,
}

impl CancelOnCommand {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[async_trait::async_trait]
impl CommandHandler for CancelOnCommand {
    async fn handle(&self, bridge: &CommBridge, command: &str) -> Result<(), HandlerError> {
        tracing::info!(command, "Command received");
        if command.contains(CANCEL_COMMAND) {
            self.token.cancel();
            bridge.close().await?;
        }
        Ok(())
    }
}
