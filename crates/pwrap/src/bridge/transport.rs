//! Socket binding for the bridge listener.
//!
//! Binds a filesystem Unix socket, replacing a stale socket file left behind
//! by a dead process, and refusing a path some live process still serves.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tokio::net::UnixListener;

use crate::error::BridgeError;

/// Owns the socket's filesystem entry and removes it on drop.
#[derive(Debug)]
pub struct SocketFile {
    path: PathBuf,
}

impl SocketFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cleanup(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Removed socket file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to cleanup socket file");
        }
    }
}

/// Bind a listener at `path`.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(path: &Path) -> Result<(UnixListener, SocketFile), BridgeError> {
    use std::os::unix::net::UnixListener as StdUnixListener;

    remove_stale_socket(path).map_err(|e| BridgeError::bind(path, e))?;

    let std_listener = StdUnixListener::bind(path).map_err(|e| BridgeError::bind(path, e))?;
    // From here on the file is ours; the guard removes it if setup fails below.
    let socket_file = SocketFile {
        path: path.to_path_buf(),
    };
    std_listener
        .set_nonblocking(true)
        .map_err(|e| BridgeError::bind(path, e))?;
    let listener = UnixListener::from_std(std_listener).map_err(|e| BridgeError::bind(path, e))?;

    tracing::debug!(path = %path.display(), "Bound socket");
    Ok((listener, socket_file))
}

/// Remove `path` if it is a socket nobody is listening on.
///
/// Liveness is checked by connecting, so a live server sees one short-lived
/// connection that is shut down without sending anything.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::net::Shutdown;
    use std::os::unix::net::UnixStream as StdUnixStream;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        // Leave it to bind() to report the conflict.
        return Ok(());
    }

    match StdUnixStream::connect(path) {
        Ok(stream) => {
            // The peer may already be gone; only the AddrInUse matters.
            let _ = stream.shutdown(Shutdown::Both);
            Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "socket is served by another process",
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            tracing::debug!(path = %path.display(), "Removing stale socket file");
            std::fs::remove_file(path)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_creates_and_cleanup_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");

        let (listener, socket_file) = bind_listener(&path).unwrap();
        assert!(path.exists());
        assert_eq!(socket_file.path(), path);

        drop(listener);
        drop(socket_file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");

        // A bound-then-dropped std listener leaves its file behind.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let (_listener, _socket_file) = bind_listener(&path).unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn bind_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");

        let (_listener, _socket_file) = bind_listener(&path).unwrap();
        let err = bind_listener(&path).unwrap_err();

        match err {
            BridgeError::Bind { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn liveness_check_sends_nothing_and_hangs_up() {
        use tokio::io::AsyncReadExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");
        let (listener, _socket_file) = bind_listener(&path).unwrap();

        assert!(bind_listener(&path).is_err());

        let (mut check, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        check.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn bind_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"data").unwrap();

        assert!(matches!(
            bind_listener(&path),
            Err(BridgeError::Bind { .. })
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[tokio::test]
    async fn bind_fails_in_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("bridge.sock");

        assert!(matches!(
            bind_listener(&path),
            Err(BridgeError::Bind { .. })
        ));
    }
}
