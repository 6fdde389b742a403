//! The mock work loop: waits, reports, repeats until cancelled.

use std::time::Duration;

use pwrap::{ProgressSink, ProgressUpdate};
use tokio_util::sync::CancellationToken;

/// Run until `token` is cancelled or `iterations` complete.
///
/// Returns the number of completed iterations.
pub async fn run_loop(
    sink: &dyn ProgressSink,
    token: &CancellationToken,
    interval: Duration,
    iterations: Option<u64>,
) -> u64 {
    let mut completed = 0;
    let mut waited = Duration::ZERO;
    while iterations.is_none_or(|n| completed < n) {
        report(sink, ProgressUpdate::new(format!("waiting {completed}..."))).await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                completed += 1;
                waited = waited.saturating_add(interval);
                report(
                    sink,
                    ProgressUpdate::new(format!("waited {}", describe_wait(waited)))
                        .with_partial(completed),
                )
                .await;
            }
            _ = token.cancelled() => {
                tracing::info!(completed, "Exiting: cancelled");
                return completed;
            }
        }
    }

    tracing::info!(completed, "Exiting: iterations done");
    completed
}

async fn report(sink: &dyn ProgressSink, update: ProgressUpdate) {
    match sink.report(update).await {
        Ok(()) => {}
        Err(e) if e.is_not_connected() => {
            tracing::debug!("No supervisor attached, progress dropped");
        }
        Err(e) => tracing::warn!(error = %e, "Failed to report progress"),
    }
}

fn describe_wait(elapsed: Duration) -> String {
    if elapsed.subsec_nanos() != 0 {
        return format!("{} ms", elapsed.as_millis());
    }
    match elapsed.as_secs() {
        1 => "1 second".to_string(),
        n => format!("{n} seconds"),
    }
}
