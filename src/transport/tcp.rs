//! TCP bridge transport
//!
//! Binds an ephemeral port on all interfaces and publishes the host's
//! outbound address, so a relay inside a VM-backed container can reach it.

use super::{Endpoint, Listener, Transport, TransportKind, bind_error};
use crate::error::{Error, Result};
use crate::scratch::ScratchDir;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tokio::net::TcpListener;
use tracing::debug;

/// Address used only to resolve the outbound route; nothing is sent to it
pub const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Find the local address the host would use for outbound traffic
///
/// Connecting a UDP socket only selects a route, so this works without
/// delivering any packet.
pub fn detect_host_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket
        .connect(ROUTE_PROBE_ADDR)
        .map_err(|e| Error::Transport(format!("No outbound route to detect host IP: {}", e)))?;
    let ip = socket.local_addr()?.ip();
    if ip.is_unspecified() {
        return Err(Error::Transport(
            "Outbound route resolved to an unspecified address".to_string(),
        ));
    }
    debug!(ip = %ip, "Detected host IP");
    Ok(ip)
}

/// Listens on `0.0.0.0:<ephemeral>` and advertises `host_ip:<port>`
#[derive(Debug, Clone, Copy)]
pub struct TcpBridgeTransport {
    host_ip: IpAddr,
}

impl TcpBridgeTransport {
    /// Use an explicit advertised address
    pub fn new(host_ip: IpAddr) -> Self {
        Self { host_ip }
    }

    /// Advertise the detected outbound address
    pub fn detect() -> Result<Self> {
        Ok(Self::new(detect_host_ip()?))
    }

    pub fn host_ip(&self) -> IpAddr {
        self.host_ip
    }
}

impl Transport for TcpBridgeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::TcpBridge
    }

    fn bind(&self, _scratch: &ScratchDir, name: &str) -> Result<(Listener, Endpoint)> {
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let std_listener =
            std::net::TcpListener::bind(bind_addr).map_err(|e| bind_error(bind_addr, e))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| bind_error(bind_addr, e))?;
        let port = std_listener.local_addr()?.port();
        let listener = TcpListener::from_std(std_listener).map_err(|e| bind_error(bind_addr, e))?;

        debug!(proxy = name, port = port, "Bound TCP bridge");
        Ok((
            Listener::Tcp(listener),
            Endpoint::Tcp(SocketAddr::new(self.host_ip, port)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_bind_publishes_host_ip_and_port() {
        let root = tempdir().unwrap();
        let scratch = ScratchDir::create(root.path()).unwrap();
        let transport = TcpBridgeTransport::new(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let (listener, endpoint) = transport.bind(&scratch, "tmux").unwrap();
        let port = endpoint.port().unwrap();
        assert_ne!(port, 0);
        assert_eq!(
            endpoint,
            Endpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
        );

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream.write_all(b"ping").await.unwrap();
        });

        let (mut accepted, peer) = listener.accept().await.unwrap();
        assert!(peer.starts_with("127.0.0.1:"));
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[test]
    fn test_kind() {
        let transport = TcpBridgeTransport::new(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(transport.kind(), TransportKind::TcpBridge);
        assert_eq!(transport.host_ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
