//! Structured progress reporting seam.

use crate::bridge::protocol::ProgressUpdate;
use crate::comm_bridge::CommBridge;
use crate::error::BridgeError;

/// Destination for a worker's progress updates.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: ProgressUpdate) -> Result<(), BridgeError>;
}

#[async_trait::async_trait]
impl ProgressSink for CommBridge {
    async fn report(&self, update: ProgressUpdate) -> Result<(), BridgeError> {
        self.write_progress_update(&update).await
    }
}
