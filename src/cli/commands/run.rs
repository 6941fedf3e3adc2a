//! Run command - start the proxies and serve until signalled

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::{AgentProxy, ConnectionHandler, Upstream};
use crate::cli::args::RunArgs;
use crate::config::{AgentKind, ExpandedAgentConfig, ExpandedConfig, load_config_from_path_or_default};
use crate::filter::{FingerprintAllowList, KeyAllowList};
use crate::logging::{AuditEvent, AuditSink, FanoutSink, JsonlWriter, TracingSink};
use crate::scratch::cleanup_orphans;
use crate::transport::{Endpoint, ProbedHost, Transport, select_transport};

/// Execute the run command
pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config_file = load_config_from_path_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    let mut config = config_file.config;
    args.apply(&mut config);
    let config = config.expand_paths().context("Invalid configuration")?;

    let sink = build_audit_sink(config.audit_log.as_deref())?;
    sweep_orphans(&config.sockets_root, sink.as_ref());

    let transport = select_transport(config.transport, &ProbedHost)
        .context("Failed to set up the endpoint transport")?;

    let mut proxies = Vec::new();
    for agent in config.agents() {
        if let Some(proxy) = build_proxy(agent, &config, &transport, &sink)? {
            proxies.push((agent.kind, proxy));
        }
    }
    if proxies.is_empty() {
        bail!("No agent is available to forward");
    }

    let mut endpoints = Vec::new();
    for (kind, proxy) in &proxies {
        match proxy.start() {
            Ok(endpoint) => endpoints.push((*kind, endpoint)),
            Err(e) => {
                stop_all(&proxies).await;
                return Err(e).with_context(|| format!("Failed to start {} proxy", kind));
            }
        }
    }

    print_endpoints(&endpoints);
    info!(count = proxies.len(), "Agent proxies running. Press Ctrl+C to stop.");

    wait_for_shutdown().await?;
    info!("Received shutdown signal, stopping...");

    stop_all(&proxies).await;
    info!("Shutdown complete");
    Ok(())
}

fn build_audit_sink(audit_log: Option<&Path>) -> Result<Arc<dyn AuditSink>> {
    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(path) = audit_log {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create audit log directory {}", parent.display())
            })?;
        }
        let writer = JsonlWriter::new(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        info!(path = %path.display(), "JSONL audit logging enabled");
        sink = sink.with(Arc::new(writer));
    }
    Ok(Arc::new(sink))
}

fn sweep_orphans(root: &Path, sink: &dyn AuditSink) {
    match cleanup_orphans(root) {
        Ok(report) => {
            for path in &report.removed {
                sink.record(&AuditEvent::orphan_removed(path.display().to_string()));
            }
            debug!(
                removed = report.removed.len(),
                kept = report.kept.len(),
                "Orphan sweep finished"
            );
        }
        Err(e) => warn!(root = %root.display(), error = %e, "Orphan sweep failed"),
    }
}

/// Create the proxy for one agent, or `None` when it cannot be forwarded
fn build_proxy(
    agent: &ExpandedAgentConfig,
    config: &ExpandedConfig,
    transport: &Arc<dyn Transport>,
    sink: &Arc<dyn AuditSink>,
) -> Result<Option<AgentProxy>> {
    if !agent.enabled {
        debug!(agent = %agent.kind, "Forwarding disabled by configuration");
        return Ok(None);
    }
    let Some(upstream_path) = &agent.upstream else {
        warn!(agent = %agent.kind, "No upstream socket known, forwarding disabled");
        return Ok(None);
    };

    let handler = match agent.kind {
        AgentKind::Ssh => ConnectionHandler::ssh(
            FingerprintAllowList::new(&agent.allowed_keys)
                .context("Invalid ssh allowed_keys")?,
        ),
        AgentKind::Gpg => ConnectionHandler::gpg(KeyAllowList::new(&agent.allowed_keys)),
        AgentKind::Tmux => ConnectionHandler::Relay,
    };

    let upstream = Upstream::new(upstream_path).with_connect_timeout(config.connect_timeout);
    match AgentProxy::new(agent.kind.name(), upstream, handler) {
        Ok(proxy) => Ok(Some(
            proxy
                .with_transport(Arc::clone(transport))
                .with_sockets_root(&config.sockets_root)
                .with_audit_sink(Arc::clone(sink)),
        )),
        Err(e) if e.is_configuration() => {
            warn!(agent = %agent.kind, error = %e, "Upstream unavailable, forwarding disabled");
            Ok(None)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to create {} proxy", agent.kind)),
    }
}

fn print_endpoints(endpoints: &[(AgentKind, Endpoint)]) {
    for (kind, endpoint) in endpoints {
        for (key, value) in endpoint.env_vars(kind.env_prefix()) {
            println!("{}={}", key, value);
        }
    }
}

async fn stop_all(proxies: &[(AgentKind, AgentProxy)]) {
    for (kind, proxy) in proxies {
        if let Err(e) = proxy.stop().await {
            warn!(agent = %kind, error = %e, "Failed to stop proxy cleanly");
        }
    }
}

async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for shutdown signal")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
