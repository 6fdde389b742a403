//! The worker side of the supervisor channel.
//!
//! A [`CommBridge`] owns one Unix socket and serves exactly one supervisor at
//! a time:
//! - **Writer path**: [`CommBridge::write_progress_update`], serialized by the
//!   connection lock so lines never interleave
//! - **Reader path**: a dispatcher task per connection feeding the registered
//!   [`CommandHandler`]
//!
//! Background tasks (accept loop, dispatcher, lifecycle watcher) all stop on
//! the bridge's shutdown token, which is a child of the governing context.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::SinkExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::{CommandCodec, ProgressCodec};
use crate::bridge::protocol::ProgressUpdate;
use crate::bridge::transport::{SocketFile, bind_listener};
use crate::config::BridgeConfig;
use crate::dispatcher;
use crate::error::BridgeError;
use crate::handler::CommandHandler;
use crate::state::BridgeState;

type ProgressWriter = FramedWrite<OwnedWriteHalf, ProgressCodec>;

struct ActiveConnection {
    id: u64,
    writer: ProgressWriter,
}

struct Inner {
    config: BridgeConfig,
    handler: Arc<dyn CommandHandler>,
    /// Present until `open` moves it into the accept loop.
    listener: Mutex<Option<UnixListener>>,
    socket_file: Mutex<Option<SocketFile>>,
    /// Doubles as the write lock.
    connection: tokio::sync::Mutex<Option<ActiveConnection>>,
    state: watch::Sender<BridgeState>,
    shutdown: CancellationToken,
    next_connection: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes the lifecycle watcher so it can exit.
        self.shutdown.cancel();
    }
}

/// Cloneable handle to a bridge. All clones share one socket and state.
#[derive(Clone)]
pub struct CommBridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CommBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommBridge")
            .field("socket_path", &self.inner.config.socket_path)
            .field("state", &self.state())
            .finish()
    }
}

impl CommBridge {
    /// Bind the socket at `config.socket_path`. Does not accept yet.
    ///
    /// Cancelling `ctx` closes the bridge from any state.
    pub async fn bind<H: CommandHandler>(
        ctx: &CancellationToken,
        config: BridgeConfig,
        handler: H,
    ) -> Result<Self, BridgeError> {
        let (listener, socket_file) = bind_listener(&config.socket_path)?;
        let (state, _) = watch::channel(BridgeState::Created);

        let bridge = Self {
            inner: Arc::new(Inner {
                config,
                handler: Arc::new(handler),
                listener: Mutex::new(Some(listener)),
                socket_file: Mutex::new(Some(socket_file)),
                connection: tokio::sync::Mutex::new(None),
                state,
                shutdown: ctx.child_token(),
                next_connection: AtomicU64::new(1),
            }),
        };
        bridge.spawn_lifecycle_watcher();

        tracing::info!(path = %bridge.socket_path().display(), "Bridge bound");
        Ok(bridge)
    }

    /// Start accepting supervisors in the background. Returns immediately.
    ///
    /// The accept loop ends when `ctx` is cancelled or the bridge closes.
    pub fn open(&self, ctx: &CancellationToken) {
        let Some(listener) = lock(&self.inner.listener).take() else {
            tracing::warn!(state = %self.state(), "Bridge already opened or closed, ignoring open");
            return;
        };
        if !self.transition(BridgeState::Created, BridgeState::Listening) {
            tracing::warn!(state = %self.state(), "Bridge not in created state, ignoring open");
            return;
        }

        let bridge = self.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            bridge.accept_loop(listener, ctx).await;
        });
    }

    /// Encode `update` and write it to the attached supervisor as one line.
    ///
    /// Nothing is buffered: without a peer the update is dropped and
    /// [`BridgeError::NotConnected`] returned. A failed write releases the
    /// connection so another supervisor can attach. A write blocked on a
    /// peer that does not read is abandoned when the bridge shuts down, so
    /// it never holds up [`close`](Self::close).
    pub async fn write_progress_update(&self, update: &ProgressUpdate) -> Result<(), BridgeError> {
        let shutdown = &self.inner.shutdown;

        let mut slot = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(BridgeError::NotConnected),
            slot = self.inner.connection.lock() => slot,
        };
        let Some(conn) = slot.as_mut() else {
            return Err(BridgeError::NotConnected);
        };

        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            sent = conn.writer.send(update) => Some(sent),
        };

        match sent {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                tracing::warn!(connection = conn.id, error = %e, "Progress write failed, releasing connection");
                *slot = None;
                self.transition(BridgeState::Connected, BridgeState::Listening);
                Err(BridgeError::Io(e))
            }
            None => {
                tracing::debug!(connection = conn.id, "Progress write abandoned on shutdown");
                Err(BridgeError::NotConnected)
            }
        }
    }

    /// Release every resource and move to `Closed`.
    ///
    /// Idempotent; safe to call from a command handler.
    pub async fn close(&self) -> Result<(), BridgeError> {
        let first = self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = BridgeState::Closed;
            true
        });
        if !first {
            return Ok(());
        }

        tracing::info!(path = %self.socket_path().display(), "Closing bridge");
        self.inner.shutdown.cancel();
        drop(lock(&self.inner.listener).take());
        drop(lock(&self.inner.socket_file).take());

        // Writers abandon their send on shutdown, so this lock is never held
        // across a blocked write.
        let conn = self.inner.connection.lock().await.take();
        match conn {
            Some(conn) => {
                let mut write_half = conn.writer.into_inner();
                match write_half.shutdown().await {
                    Ok(()) => Ok(()),
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
                        ) =>
                    {
                        Ok(())
                    }
                    Err(e) => Err(BridgeError::Io(e)),
                }
            }
            None => Ok(()),
        }
    }

    pub fn state(&self) -> BridgeState {
        *self.inner.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == BridgeState::Connected
    }

    pub fn socket_path(&self) -> &Path {
        &self.inner.config.socket_path
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.inner.state.subscribe()
    }

    /// Resolves once the bridge is `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(BridgeState::is_terminal).await;
    }

    pub(crate) fn handler(&self) -> &dyn CommandHandler {
        self.inner.handler.as_ref()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Finalize close once the shutdown token fires, whoever cancelled it.
    fn spawn_lifecycle_watcher(&self) {
        let shutdown = self.inner.shutdown.clone();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            shutdown.cancelled().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let bridge = CommBridge { inner };
            if let Err(e) = bridge.close().await {
                tracing::warn!(error = %e, "Error while closing bridge after cancellation");
            }
        });
    }

    async fn accept_loop(self, listener: UnixListener, ctx: CancellationToken) {
        let shutdown = self.shutdown_token();
        tracing::info!(path = %self.socket_path().display(), "Bridge listening");

        loop {
            let accepted = tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ctx.cancelled() => {
                    tracing::debug!("Accept loop context cancelled");
                    if let Err(e) = self.close().await {
                        tracing::warn!(error = %e, "Error while closing bridge");
                    }
                    break;
                }

                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => self.attach(stream).await,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed, closing bridge");
                    if let Err(e) = self.close().await {
                        tracing::warn!(error = %e, "Error while closing bridge");
                    }
                    break;
                }
            }
        }

        drop(listener);
        tracing::trace!("Accept loop exited");
    }

    async fn attach(&self, stream: UnixStream) {
        let mut slot = self.inner.connection.lock().await;
        if self.is_closed() {
            return;
        }
        if let Some(active) = slot.as_ref() {
            tracing::warn!(
                active_connection = active.id,
                "Rejecting connection: a supervisor is already attached"
            );
            drop(stream);
            return;
        }

        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        *slot = Some(ActiveConnection {
            id,
            writer: FramedWrite::new(write_half, ProgressCodec::new(self.inner.config.delimiter)),
        });
        self.transition(BridgeState::Listening, BridgeState::Connected);
        drop(slot);

        tracing::info!(connection = id, "Supervisor connected");

        let reader = FramedRead::new(
            read_half,
            CommandCodec::new(self.inner.config.max_command_length),
        );
        let bridge = self.clone();
        tokio::spawn(async move {
            dispatcher::run(&bridge, id, reader).await;
            bridge.release(id).await;
        });
    }

    /// Drop connection `id` if it is still the active one.
    async fn release(&self, id: u64) {
        let mut slot = self.inner.connection.lock().await;
        if slot.as_ref().is_some_and(|c| c.id == id) {
            *slot = None;
            self.transition(BridgeState::Connected, BridgeState::Listening);
            tracing::info!(connection = id, "Supervisor detached");
        }
    }

    fn transition(&self, from: BridgeState, to: BridgeState) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            tracing::trace!(%from, %to, "Bridge state transition");
            *state = to;
            true
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::HandlerError;

    struct Ignore;

    #[async_trait::async_trait]
    impl CommandHandler for Ignore {
        async fn handle(&self, _bridge: &CommBridge, _command: &str) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    async fn bound(dir: &tempfile::TempDir, ctx: &CancellationToken) -> CommBridge {
        let config = BridgeConfig::new(dir.path().join("bridge.sock"));
        CommBridge::bind(ctx, config, Ignore).await.unwrap()
    }

    #[tokio::test]
    async fn bind_starts_in_created() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bound(&dir, &CancellationToken::new()).await;

        assert_eq!(bridge.state(), BridgeState::Created);
        assert!(bridge.socket_path().exists());
    }

    #[tokio::test]
    async fn open_moves_to_listening() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let bridge = bound(&dir, &ctx).await;

        bridge.open(&ctx);
        assert_eq!(bridge.state(), BridgeState::Listening);

        // Second open is ignored.
        bridge.open(&ctx);
        assert_eq!(bridge.state(), BridgeState::Listening);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bound(&dir, &CancellationToken::new()).await;
        let path = bridge.socket_path().to_path_buf();

        bridge.close().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert!(!path.exists());

        bridge.close().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn closed_bridge_cannot_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let bridge = bound(&dir, &ctx).await;

        bridge.close().await.unwrap();
        bridge.open(&ctx);
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn write_without_peer_is_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = bound(&dir, &CancellationToken::new()).await;

        let err = bridge
            .write_progress_update(&ProgressUpdate::new("nobody listening"))
            .await
            .unwrap_err();
        assert!(err.is_not_connected());
    }

    #[tokio::test]
    async fn cancelling_context_before_open_closes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CancellationToken::new();
        let bridge = bound(&dir, &ctx).await;

        ctx.cancel();
        tokio::time::timeout(Duration::from_secs(2), bridge.closed())
            .await
            .expect("bridge should close after cancellation");
        assert!(bridge.is_closed());
    }
}
