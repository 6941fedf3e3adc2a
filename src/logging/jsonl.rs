//! JSONL (JSON Lines) audit events
//!
//! Each audit record is written as a single JSON object on one line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Audit event kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Proxy started listening
    ProxyStart,
    /// Proxy stopped and cleaned up
    ProxyStop,
    /// Client connected
    ClientConnect,
    /// Client disconnected
    ClientDisconnect,
    /// A gated key operation was decided
    KeyOperation,
    /// Identities were filtered out of an SSH identity list
    IdentitiesFiltered,
    /// An orphaned scratch directory was removed
    OrphanRemoved,
    /// A connection failed
    Error,
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditEventKind::ProxyStart => "proxy_start",
            AuditEventKind::ProxyStop => "proxy_stop",
            AuditEventKind::ClientConnect => "client_connect",
            AuditEventKind::ClientDisconnect => "client_disconnect",
            AuditEventKind::KeyOperation => "key_operation",
            AuditEventKind::IdentitiesFiltered => "identities_filtered",
            AuditEventKind::OrphanRemoved => "orphan_removed",
            AuditEventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// Outcome of a gated key operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allowed,
    Denied,
}

impl Decision {
    pub fn from_allowed(allowed: bool) -> Self {
        if allowed {
            Decision::Allowed
        } else {
            Decision::Denied
        }
    }

    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allowed => write!(f, "allowed"),
            Decision::Denied => write!(f, "denied"),
        }
    }
}

/// A structured audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub kind: AuditEventKind,

    /// Proxy name (`ssh`, `gpg`, `tmux`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Per-proxy connection number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,

    /// Operation name (`PKSIGN`, `PKDECRYPT`, `SIGN_REQUEST`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Key id or fingerprint the operation targeted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    /// Mirrors `decision` for sinks that expect a flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<bool>,

    /// Published endpoint or removed path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_count: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new event with the current timestamp
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            proxy: None,
            client_id: None,
            operation: None,
            key_id: None,
            decision: None,
            allowed: None,
            endpoint: None,
            key_count: None,
            filtered_count: None,
            error: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_client_id(mut self, id: u64) -> Self {
        self.client_id = Some(id);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Record a gated operation and its outcome
    pub fn with_decision(mut self, decision: Decision) -> Self {
        self.decision = Some(decision);
        self.allowed = Some(decision.is_allowed());
        self
    }

    pub fn proxy_start(proxy: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(AuditEventKind::ProxyStart)
            .with_proxy(proxy)
            .with_endpoint(endpoint)
    }

    pub fn proxy_stop(proxy: impl Into<String>) -> Self {
        Self::new(AuditEventKind::ProxyStop).with_proxy(proxy)
    }

    pub fn client_connect(proxy: impl Into<String>, client_id: u64) -> Self {
        Self::new(AuditEventKind::ClientConnect)
            .with_proxy(proxy)
            .with_client_id(client_id)
    }

    pub fn client_disconnect(proxy: impl Into<String>, client_id: u64) -> Self {
        Self::new(AuditEventKind::ClientDisconnect)
            .with_proxy(proxy)
            .with_client_id(client_id)
    }

    /// A sign/decrypt decision
    pub fn key_operation(
        proxy: impl Into<String>,
        operation: impl Into<String>,
        key_id: impl Into<String>,
        decision: Decision,
    ) -> Self {
        let mut event = Self::new(AuditEventKind::KeyOperation)
            .with_proxy(proxy)
            .with_decision(decision);
        event.operation = Some(operation.into());
        event.key_id = Some(key_id.into());
        event
    }

    pub fn identities_filtered(proxy: impl Into<String>, total: u32, filtered: u32) -> Self {
        let mut event = Self::new(AuditEventKind::IdentitiesFiltered).with_proxy(proxy);
        event.key_count = Some(total);
        event.filtered_count = Some(filtered);
        event
    }

    pub fn orphan_removed(path: impl Into<String>) -> Self {
        Self::new(AuditEventKind::OrphanRemoved).with_endpoint(path)
    }

    pub fn error(proxy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AuditEventKind::Error)
            .with_proxy(proxy)
            .with_error(message)
    }

    /// Serialize the event to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// JSONL file writer with thread-safe buffered output
pub struct JsonlWriter {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlWriter {
    /// Open the file for appending, creating it if needed
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Append one event
    pub fn write(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = event
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    /// Flush any buffered data to the file
    pub fn flush(&self) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::other("Lock poisoned"))?;

        writer.flush()
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
