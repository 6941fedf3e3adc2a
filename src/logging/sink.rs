//! Audit event sinks
//!
//! Proxies receive an `Arc<dyn AuditSink>` at construction and never touch
//! global state, so tests can capture exactly the events one proxy emits.

use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::jsonl::{AuditEvent, AuditEventKind, JsonlWriter};

/// Destination for structured audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Mirrors audit events into the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        match event.kind {
            AuditEventKind::KeyOperation if event.allowed == Some(false) => warn!(
                proxy = event.proxy.as_deref().unwrap_or_default(),
                operation = event.operation.as_deref().unwrap_or_default(),
                key_id = event.key_id.as_deref().unwrap_or_default(),
                allowed = false,
                "Key operation denied"
            ),
            AuditEventKind::KeyOperation => info!(
                proxy = event.proxy.as_deref().unwrap_or_default(),
                operation = event.operation.as_deref().unwrap_or_default(),
                key_id = event.key_id.as_deref().unwrap_or_default(),
                allowed = true,
                "Key operation allowed"
            ),
            kind => tracing::debug!(
                proxy = event.proxy.as_deref().unwrap_or_default(),
                client_id = event.client_id,
                endpoint = event.endpoint.as_deref().unwrap_or_default(),
                error = event.error.as_deref().unwrap_or_default(),
                "audit: {}",
                kind
            ),
        }
    }
}

impl AuditSink for JsonlWriter {
    fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.write(event) {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Recorded events of one kind
    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }
}

impl AuditSink for MemorySink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards every event to several sinks
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for FanoutSink {
    fn record(&self, event: &AuditEvent) {
        for sink in &self.sinks {
            sink.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::Decision;

    #[test]
    fn test_memory_sink_records() {
        let sink = MemorySink::new();
        sink.record(&AuditEvent::proxy_start("gpg", "/tmp/x"));
        sink.record(&AuditEvent::key_operation("gpg", "PKSIGN", "AB", Decision::Allowed));

        assert_eq!(sink.events().len(), 2);
        let ops = sink.events_of(AuditEventKind::KeyOperation);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].allowed, Some(true));
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new().with(a.clone()).with(b.clone());

        fanout.record(&AuditEvent::proxy_stop("ssh"));

        assert_eq!(a.events().len(), 1);
        assert_eq!(b.events().len(), 1);
    }

    #[test]
    fn test_tracing_sink_does_not_panic_without_subscriber() {
        TracingSink.record(&AuditEvent::key_operation("gpg", "PKSIGN", "", Decision::Denied));
        TracingSink.record(&AuditEvent::client_connect("gpg", 1));
    }
}
