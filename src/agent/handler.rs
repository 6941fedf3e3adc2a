//! Per-connection handling shared by every proxy kind

use super::assuan::AssuanFilter;
use super::relay::relay;
use super::ssh::SshAgentFilter;
use super::upstream::Upstream;
use crate::error::Result;
use crate::filter::{FingerprintAllowList, KeyAllowList};
use crate::logging::{AuditEvent, AuditSink};
use crate::transport::BoxedStream;
use std::sync::Arc;
use tracing::trace;

/// Identity of one accepted client, handed to the protocol handlers
#[derive(Clone)]
pub struct ConnectionContext {
    pub proxy: Arc<str>,
    pub client_id: u64,
    sink: Arc<dyn AuditSink>,
}

impl ConnectionContext {
    pub fn new(proxy: Arc<str>, client_id: u64, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            proxy,
            client_id,
            sink,
        }
    }

    /// Record an audit event tagged with this client's id
    pub fn record(&self, event: AuditEvent) {
        self.sink.record(&event.with_client_id(self.client_id));
    }
}

/// What a proxy does with the bytes of each connection
#[derive(Debug, Clone)]
pub enum ConnectionHandler {
    /// Copy bytes both ways without looking at them
    Relay,
    /// Gate gpg-agent signing and decryption by key id
    Assuan(AssuanFilter),
    /// Filter ssh-agent identities and sign requests by fingerprint
    Ssh(SshAgentFilter),
}

impl ConnectionHandler {
    /// Assuan filter for a gpg-agent proxy
    pub fn gpg(allowed: KeyAllowList) -> Self {
        ConnectionHandler::Assuan(AssuanFilter::new(allowed))
    }

    /// SSH filter, or a plain relay when no fingerprint is configured
    pub fn ssh(allowed: FingerprintAllowList) -> Self {
        if allowed.is_empty() {
            ConnectionHandler::Relay
        } else {
            ConnectionHandler::Ssh(SshAgentFilter::new(allowed))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConnectionHandler::Relay => "relay",
            ConnectionHandler::Assuan(_) => "assuan",
            ConnectionHandler::Ssh(_) => "ssh",
        }
    }

    /// Dial the upstream and serve one client until either side closes
    pub async fn handle(
        &self,
        client: BoxedStream,
        upstream: &Upstream,
        ctx: &ConnectionContext,
    ) -> Result<()> {
        let upstream_stream = upstream.connect().await?;

        match self {
            ConnectionHandler::Relay => {
                let stats = relay(client, upstream_stream).await;
                trace!(
                    proxy = %ctx.proxy,
                    client_id = ctx.client_id,
                    sent = stats.client_to_upstream,
                    received = stats.upstream_to_client,
                    "Relay finished"
                );
                Ok(())
            }
            ConnectionHandler::Assuan(filter) => filter.serve(client, upstream_stream, ctx).await,
            ConnectionHandler::Ssh(filter) => filter.serve(client, upstream_stream, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{AuditEventKind, MemorySink};

    #[test]
    fn test_ssh_without_fingerprints_is_relay() {
        let handler = ConnectionHandler::ssh(FingerprintAllowList::default());
        assert!(matches!(handler, ConnectionHandler::Relay));

        let allowed = FingerprintAllowList::new(["SHA256:abc"]).unwrap();
        assert_eq!(ConnectionHandler::ssh(allowed).name(), "ssh");
    }

    #[test]
    fn test_gpg_handler_keeps_allow_list() {
        let handler = ConnectionHandler::gpg(KeyAllowList::new(["cafebabe"]));
        match handler {
            ConnectionHandler::Assuan(filter) => {
                assert!(filter.allowed_keys().is_allowed("CAFEBABE"));
            }
            other => panic!("unexpected handler {:?}", other),
        }
    }

    #[test]
    fn test_context_tags_client_id() {
        let sink = Arc::new(MemorySink::new());
        let ctx = ConnectionContext::new(Arc::from("gpg"), 7, sink.clone());
        ctx.record(AuditEvent::error("gpg", "boom"));

        let events = sink.events_of(AuditEventKind::Error);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].client_id, Some(7));
    }
}
