//! Local progress sink used when no socket is configured.

use pwrap::{BridgeError, ProgressSink, ProgressUpdate};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Renders updates as human-readable lines on a local writer.
pub struct LocalSink<W> {
    out: Mutex<W>,
}

impl LocalSink<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> LocalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

fn render(update: &ProgressUpdate) -> String {
    let mut line = String::new();
    if let (Some(stage), Some(total_stages)) = (update.stage, update.total_stages) {
        line.push_str(&format!("[{stage}/{total_stages}] "));
    }
    line.push_str(&update.description);
    match (update.partial, update.total) {
        (Some(partial), Some(total)) => line.push_str(&format!(" ({partial}/{total})")),
        (Some(partial), None) => line.push_str(&format!(" ({partial})")),
        _ => {}
    }
    line.push('\n');
    line
}

#[async_trait::async_trait]
impl<W> ProgressSink for LocalSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn report(&self, update: ProgressUpdate) -> Result<(), BridgeError> {
        let mut out = self.out.lock().await;
        out.write_all(render(&update).as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}
