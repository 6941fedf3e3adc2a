//! Upstream agent endpoint
//!
//! The real agent socket on the host (`$SSH_AUTH_SOCK`, gpg-agent's
//! `S.gpg-agent`, a tmux server socket). Each client connection dials it
//! afresh.

use crate::error::{Error, Result};
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::trace;

/// Default connection timeout for the upstream agent
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Path and dial settings of an upstream agent socket
#[derive(Debug, Clone)]
pub struct Upstream {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl Upstream {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bound the time spent dialing the upstream
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Check that the upstream socket exists and is a socket
    pub fn ensure_available(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.socket_path).map_err(|e| {
            let reason = if e.kind() == io::ErrorKind::NotFound {
                "does not exist".to_string()
            } else {
                e.to_string()
            };
            Error::UpstreamNotAvailable(format!("{}: {}", self.socket_path.display(), reason))
        })?;

        if !metadata.file_type().is_socket() {
            return Err(Error::UpstreamNotAvailable(format!(
                "{}: not a socket",
                self.socket_path.display()
            )));
        }
        Ok(())
    }

    /// Dial the upstream agent
    pub async fn connect(&self) -> Result<UnixStream> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            UnixStream::connect(&self.socket_path),
        )
        .await
        .map_err(|_| {
            Error::Transport(format!(
                "Connection to upstream agent at {} timed out after {:?}",
                self.socket_path.display(),
                self.connect_timeout
            ))
        })?
        .map_err(|e| {
            Error::Transport(format!(
                "Failed to connect to upstream agent at {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        trace!(socket_path = %self.socket_path.display(), "Connected to upstream agent");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::net::UnixListener;

    #[test]
    fn test_upstream_new() {
        let upstream = Upstream::new("/tmp/test.sock");
        assert_eq!(upstream.socket_path(), Path::new("/tmp/test.sock"));
        assert_eq!(upstream.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_missing_socket_is_unavailable() {
        let upstream = Upstream::new("/tmp/nonexistent-agent-proxy-12345.sock");
        let err = upstream.ensure_available().unwrap_err();
        assert!(matches!(err, Error::UpstreamNotAvailable(_)));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_regular_file_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, "test").unwrap();

        let err = Upstream::new(&path).ensure_available().unwrap_err();
        assert!(err.to_string().contains("not a socket"));
    }

    #[tokio::test]
    async fn test_listening_socket_is_available() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let upstream = Upstream::new(&path).with_connect_timeout(Duration::from_secs(1));
        upstream.ensure_available().unwrap();
        assert!(upstream.connect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_nonexistent_socket() {
        let upstream = Upstream::new("/tmp/nonexistent-agent-proxy-12345.sock");
        let err = upstream.connect().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(err.to_string().contains("Failed to connect"));
    }
}
