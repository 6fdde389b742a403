//! Per-connection command read loop.
//!
//! Reads newline-terminated commands and hands each to the registered
//! handler. Handler errors are logged and never end the loop; EOF, a read
//! error, or bridge shutdown do. Ending the loop does not close the bridge.

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::bridge::codec::CommandCodec;
use crate::comm_bridge::CommBridge;

pub(crate) async fn run<R>(
    bridge: &CommBridge,
    connection: u64,
    mut reader: FramedRead<R, CommandCodec>,
) where
    R: AsyncRead + Unpin,
{
    let shutdown = bridge.shutdown_token();

    loop {
        // Shutdown wins over queued lines, so nothing is dispatched after a
        // handler closed the bridge.
        let next = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::trace!(connection, "Dispatcher stopping on shutdown");
                break;
            }

            next = reader.next() => next,
        };

        match next {
            Some(Ok(command)) => {
                tracing::debug!(connection, %command, "Dispatching command");
                if let Err(e) = bridge.handler().handle(bridge, &command).await {
                    tracing::warn!(connection, %command, error = %e, "Command handler failed");
                }
            }
            Some(Err(e)) => {
                tracing::warn!(connection, error = %e, "Command read error");
                break;
            }
            None => {
                tracing::debug!(connection, "Supervisor closed the connection");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::BridgeConfig;
    use crate::error::HandlerError;
    use crate::handler::{CancelOnCommand, CommandHandler};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CommandHandler for std::sync::Arc<Recorder> {
        async fn handle(&self, _bridge: &CommBridge, command: &str) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(command.to_string());
            if command == "bad" {
                return Err(HandlerError::rejected("bad command"));
            }
            Ok(())
        }
    }

    /// Counts cancellations, then defers to `CancelOnCommand`.
    struct CountingCancel {
        inner: CancelOnCommand,
        token: CancellationToken,
        cancels: std::sync::Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl CommandHandler for CountingCancel {
        async fn handle(&self, bridge: &CommBridge, command: &str) -> Result<(), HandlerError> {
            let was_cancelled = self.token.is_cancelled();
            self.inner.handle(bridge, command).await?;
            if !was_cancelled && self.token.is_cancelled() {
                self.cancels.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = std::sync::Arc::new(Recorder::default());
        let bridge = CommBridge::bind(
            &CancellationToken::new(),
            BridgeConfig::new(dir.path().join("d.sock")),
            recorder.clone(),
        )
        .await
        .unwrap();

        let (mut peer, ours) = tokio::io::duplex(256);
        peer.write_all(b"first\nbad\nlast\nunterminated").await.unwrap();
        drop(peer);

        run(&bridge, 1, FramedRead::new(ours, CommandCodec::new(64))).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["first", "bad", "last"]);
        assert!(!bridge.is_closed());
    }

    #[tokio::test]
    async fn repeated_cancel_dispatches_once() {
        let dir = tempfile::tempdir().unwrap();
        let worker = CancellationToken::new();
        let cancels = std::sync::Arc::new(AtomicUsize::new(0));
        let handler = CountingCancel {
            inner: CancelOnCommand::new(worker.clone()),
            token: worker.clone(),
            cancels: cancels.clone(),
        };
        let bridge = CommBridge::bind(
            &CancellationToken::new(),
            BridgeConfig::new(dir.path().join("c.sock")),
            handler,
        )
        .await
        .unwrap();
        let mut states = bridge.subscribe();

        let (mut peer, ours) = tokio::io::duplex(256);
        peer.write_all(b"status\ncancel\ncancel now\n").await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(2),
            run(&bridge, 1, FramedRead::new(ours, CommandCodec::new(64))),
        )
        .await
        .expect("dispatcher should stop after cancel");

        assert!(worker.is_cancelled());
        assert!(bridge.is_closed());
        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        // Exactly one transition into Closed was published.
        assert!(states.has_changed().unwrap());
        assert!(states.borrow_and_update().is_terminal());
        assert!(!states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn shutdown_unblocks_pending_read() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = std::sync::Arc::new(Recorder::default());
        let bridge = CommBridge::bind(
            &CancellationToken::new(),
            BridgeConfig::new(dir.path().join("s.sock")),
            recorder,
        )
        .await
        .unwrap();

        // Peer stays open and silent.
        let (_peer, ours) = tokio::io::duplex(64);
        let reader = FramedRead::new(ours, CommandCodec::new(64));

        let task = {
            let bridge = bridge.clone();
            tokio::spawn(async move { run(&bridge, 1, reader).await })
        };
        bridge.close().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("read loop should stop on shutdown")
            .unwrap();
    }
}
