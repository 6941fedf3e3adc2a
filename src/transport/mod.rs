//! Listening transports for agent proxies
//!
//! A proxy publishes its endpoint into a container either as a Unix socket
//! inside its scratch directory (bind-mounted by the runtime) or, when the
//! container runs in a VM that cannot see host Unix sockets, as a TCP port
//! that an in-container companion relay connects to.
//!
//! The choice is made from host capabilities, not from the OS name.

mod tcp;
mod unix;

pub use tcp::{ROUTE_PROBE_ADDR, TcpBridgeTransport, detect_host_ip};
pub use unix::UnixTransport;

use crate::error::{Error, Result};
use crate::scratch::ScratchDir;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

/// A bidirectional byte stream from either transport
pub trait AgentStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AgentStream for T {}

/// Type-erased accepted connection
pub type BoxedStream = Box<dyn AgentStream>;

/// Which transport a proxy listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Unix,
    TcpBridge,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Unix => write!(f, "unix"),
            TransportKind::TcpBridge => write!(f, "tcp"),
        }
    }
}

/// Requested transport, from configuration or the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Decide from host capabilities
    #[default]
    Auto,
    /// Always publish Unix sockets
    Unix,
    /// Always publish a TCP bridge
    Tcp,
}

/// What the host can offer the container runtime
pub trait HostCapabilities {
    /// Whether a Unix socket on this host can be mounted into a container
    fn shares_unix_sockets(&self) -> bool;
}

/// Capabilities probed from the running kernel
///
/// Bind-mounted Unix sockets only work when containers share this
/// kernel, which is the case when it exposes mount namespaces. Container
/// hosts that run their workloads inside a VM lack them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProbedHost;

impl HostCapabilities for ProbedHost {
    fn shares_unix_sockets(&self) -> bool {
        Path::new("/proc/self/ns/mnt").exists()
    }
}

/// Pick the transport for a mode on a given host
pub fn select_transport(
    mode: TransportMode,
    host: &dyn HostCapabilities,
) -> Result<Arc<dyn Transport>> {
    let use_unix = match mode {
        TransportMode::Unix => true,
        TransportMode::Tcp => false,
        TransportMode::Auto => host.shares_unix_sockets(),
    };

    if use_unix {
        Ok(Arc::new(UnixTransport))
    } else {
        Ok(Arc::new(TcpBridgeTransport::detect()?))
    }
}

/// Binds the listening side of a proxy
pub trait Transport: Send + Sync + fmt::Debug {
    fn kind(&self) -> TransportKind;

    /// Open a listener for the proxy `name`, placing any files in `scratch`
    ///
    /// Must be called from within a Tokio runtime.
    fn bind(&self, scratch: &ScratchDir, name: &str) -> Result<(Listener, Endpoint)>;
}

/// An open listening socket
#[derive(Debug)]
pub enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    /// Accept one connection, returning it with a printable peer address
    pub async fn accept(&self) -> io::Result<(BoxedStream, String)> {
        match self {
            Listener::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                Ok((Box::new(stream), "unix".to_string()))
            }
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), addr.to_string()))
            }
        }
    }
}

/// Where a started proxy can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix socket path on the host
    Unix(PathBuf),
    /// Host address and bound port of the TCP bridge
    Tcp(SocketAddr),
}

impl Endpoint {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Endpoint::Unix(path) => Some(path),
            Endpoint::Tcp(_) => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Endpoint::Unix(_) => None,
            Endpoint::Tcp(addr) => Some(addr.port()),
        }
    }

    /// Environment variables that publish this endpoint into a container
    ///
    /// `prefix` names the agent, e.g. `GPG` yields `GPG_PROXY_SOCKET` or
    /// `GPG_PROXY_HOST` / `GPG_PROXY_PORT`.
    pub fn env_vars(&self, prefix: &str) -> Vec<(String, String)> {
        let prefix = prefix.to_ascii_uppercase();
        match self {
            Endpoint::Unix(path) => vec![(
                format!("{}_PROXY_SOCKET", prefix),
                path.display().to_string(),
            )],
            Endpoint::Tcp(addr) => vec![
                (format!("{}_PROXY_HOST", prefix), addr.ip().to_string()),
                (format!("{}_PROXY_PORT", prefix), addr.port().to_string()),
            ],
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
        }
    }
}

pub(crate) fn bind_error(what: impl fmt::Display, e: impl fmt::Display) -> Error {
    Error::Lifecycle(format!("Failed to bind {}: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHost(bool);

    impl HostCapabilities for FakeHost {
        fn shares_unix_sockets(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_auto_mode_uses_unix_when_shared() {
        let transport = select_transport(TransportMode::Auto, &FakeHost(true)).unwrap();
        assert_eq!(transport.kind(), TransportKind::Unix);
    }

    #[test]
    fn test_forced_unix_ignores_capabilities() {
        let transport = select_transport(TransportMode::Unix, &FakeHost(false)).unwrap();
        assert_eq!(transport.kind(), TransportKind::Unix);
    }

    #[test]
    fn test_endpoint_accessors() {
        let unix = Endpoint::Unix(PathBuf::from("/run/x/gpg.sock"));
        assert_eq!(unix.path(), Some(Path::new("/run/x/gpg.sock")));
        assert_eq!(unix.port(), None);

        let tcp = Endpoint::Tcp("192.168.1.20:40123".parse().unwrap());
        assert_eq!(tcp.port(), Some(40123));
        assert!(tcp.path().is_none());
        assert_eq!(tcp.to_string(), "tcp://192.168.1.20:40123");
    }

    #[test]
    fn test_endpoint_env_vars() {
        let tcp = Endpoint::Tcp("10.0.0.5:5555".parse().unwrap());
        assert_eq!(
            tcp.env_vars("gpg"),
            vec![
                ("GPG_PROXY_HOST".to_string(), "10.0.0.5".to_string()),
                ("GPG_PROXY_PORT".to_string(), "5555".to_string()),
            ]
        );

        let unix = Endpoint::Unix(PathBuf::from("/tmp/s/ssh.sock"));
        assert_eq!(
            unix.env_vars("SSH"),
            vec![("SSH_PROXY_SOCKET".to_string(), "/tmp/s/ssh.sock".to_string())]
        );
    }

    #[test]
    fn test_transport_mode_parse() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: TransportMode,
        }

        let parsed: Wrapper = toml::from_str("mode = \"tcp\"").unwrap();
        assert_eq!(parsed.mode, TransportMode::Tcp);
        assert!(toml::from_str::<Wrapper>("mode = \"vsock\"").is_err());
        assert_eq!(TransportMode::default(), TransportMode::Auto);
    }
}
