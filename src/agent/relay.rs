//! Unfiltered byte relay between a client and its upstream connection

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Bytes moved by one relayed connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Pump bytes in both directions until both directions have finished
///
/// Each direction runs until its reader hits end-of-stream or either side
/// errors, then shuts down its writer so the peer sees the close. Both
/// streams are dropped once both directions are done.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let (client_to_upstream, upstream_to_client) = tokio::join!(
        pump(&mut client_read, &mut upstream_write, "client->upstream"),
        pump(&mut upstream_read, &mut client_write, "upstream->client"),
    );

    RelayStats {
        client_to_upstream,
        upstream_to_client,
    }
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, direction: &'static str) -> u64
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let copied = match tokio::io::copy(reader, writer).await {
        Ok(n) => n,
        Err(e) => {
            debug!(direction, error = %e, "Relay direction ended with error");
            0
        }
    };
    let _ = writer.shutdown().await;
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (client_side, mut client) = duplex(1024);
        let (upstream_side, mut upstream) = duplex(1024);

        let relay_task = tokio::spawn(relay(client_side, upstream_side));

        client.write_all(b"hello upstream").await.unwrap();
        let mut buf = [0u8; 14];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello upstream");

        upstream.write_all(b"hi client").await.unwrap();
        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi client");

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        upstream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        drop(upstream);
        let stats = relay_task.await.unwrap();
        assert_eq!(stats.client_to_upstream, 14);
        assert_eq!(stats.upstream_to_client, 9);
    }

    #[tokio::test]
    async fn test_relay_finishes_when_both_sides_close() {
        let (client_side, client) = duplex(64);
        let (upstream_side, upstream) = duplex(64);
        drop(client);
        drop(upstream);

        let stats = relay(client_side, upstream_side).await;
        assert_eq!(stats, RelayStats::default());
    }
}
