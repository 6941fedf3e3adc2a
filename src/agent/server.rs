//! Proxy listener lifecycle
//!
//! An [`AgentProxy`] owns one scratch directory and one listener. `start`
//! binds and spawns the accept loop; `stop` closes the listener, waits for
//! every in-flight connection to finish and removes the scratch directory.
//! A proxy is one-shot: once stopped it cannot be started again.

use super::handler::{ConnectionContext, ConnectionHandler};
use super::upstream::Upstream;
use crate::error::{Error, Result};
use crate::logging::{AuditEvent, AuditSink, TracingSink};
use crate::scratch::{ScratchDir, default_sockets_root};
use crate::transport::{Endpoint, Listener, Transport, UnixTransport};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Where a proxy is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProxyPhase {
    #[default]
    Created,
    Started,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct ProxyState {
    phase: ProxyPhase,
    endpoint: Option<Endpoint>,
    scratch: Option<ScratchDir>,
    shutdown: Option<watch::Sender<bool>>,
    accept_loop: Option<JoinHandle<()>>,
    active_connections: usize,
}

type SharedState = Arc<Mutex<ProxyState>>;

fn lock(state: &Mutex<ProxyState>) -> MutexGuard<'_, ProxyState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A filtering or relaying proxy in front of one upstream agent
pub struct AgentProxy {
    name: Arc<str>,
    upstream: Arc<Upstream>,
    handler: Arc<ConnectionHandler>,
    transport: Arc<dyn Transport>,
    sockets_root: PathBuf,
    sink: Arc<dyn AuditSink>,
    state: SharedState,
    next_client_id: Arc<AtomicU64>,
    stopped: watch::Sender<bool>,
}

impl AgentProxy {
    /// Create a proxy for `upstream`
    ///
    /// Fails with [`Error::UpstreamNotAvailable`] when the upstream socket
    /// is missing, so callers can disable that kind of forwarding.
    pub fn new(name: &str, upstream: Upstream, handler: ConnectionHandler) -> Result<Self> {
        upstream.ensure_available()?;
        let (stopped, _) = watch::channel(false);
        Ok(Self {
            name: Arc::from(name),
            upstream: Arc::new(upstream),
            handler: Arc::new(handler),
            transport: Arc::new(UnixTransport),
            sockets_root: default_sockets_root(),
            sink: Arc::new(TracingSink),
            state: SharedState::default(),
            next_client_id: Arc::new(AtomicU64::new(1)),
            stopped,
        })
    }

    /// gpg-agent proxy gated by key id
    pub fn gpg(upstream: Upstream, allowed: crate::filter::KeyAllowList) -> Result<Self> {
        Self::new("gpg", upstream, ConnectionHandler::gpg(allowed))
    }

    /// ssh-agent proxy filtered by fingerprint
    pub fn ssh(upstream: Upstream, allowed: crate::filter::FingerprintAllowList) -> Result<Self> {
        Self::new("ssh", upstream, ConnectionHandler::ssh(allowed))
    }

    /// Unfiltered relay to a terminal multiplexer server
    pub fn multiplexer(name: &str, upstream: Upstream) -> Result<Self> {
        Self::new(name, upstream, ConnectionHandler::Relay)
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Directory under which the scratch directory is created
    pub fn with_sockets_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sockets_root = root.into();
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn handler(&self) -> &ConnectionHandler {
        &self.handler
    }

    pub fn sockets_root(&self) -> &Path {
        &self.sockets_root
    }

    pub fn phase(&self) -> ProxyPhase {
        lock(&self.state).phase
    }

    pub fn is_running(&self) -> bool {
        self.phase() == ProxyPhase::Started
    }

    /// Published endpoint while running
    pub fn endpoint(&self) -> Option<Endpoint> {
        lock(&self.state).endpoint.clone()
    }

    /// Socket path while running on the Unix transport
    pub fn endpoint_path(&self) -> Option<PathBuf> {
        self.endpoint().and_then(|e| e.path().map(Path::to_path_buf))
    }

    /// Bound port while running on the TCP bridge
    pub fn endpoint_port(&self) -> Option<u16> {
        self.endpoint().and_then(|e| e.port())
    }

    /// Connections accepted and not yet finished
    pub fn active_connections(&self) -> usize {
        lock(&self.state).active_connections
    }

    /// Bind the listener and start accepting connections
    ///
    /// Calling `start` on a running proxy returns the existing endpoint.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<Endpoint> {
        let mut state = lock(&self.state);
        match state.phase {
            ProxyPhase::Created => {}
            ProxyPhase::Started => {
                if let Some(endpoint) = &state.endpoint {
                    return Ok(endpoint.clone());
                }
            }
            ProxyPhase::Stopping | ProxyPhase::Stopped => {
                return Err(Error::Lifecycle(format!(
                    "Proxy '{}' has been stopped and cannot be restarted",
                    self.name
                )));
            }
        }

        let scratch = ScratchDir::create(&self.sockets_root)?;
        let (listener, endpoint) = self.transport.bind(&scratch, &self.name)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_loop = tokio::spawn(accept_loop(
            AcceptContext {
                name: Arc::clone(&self.name),
                upstream: Arc::clone(&self.upstream),
                handler: Arc::clone(&self.handler),
                sink: Arc::clone(&self.sink),
                state: Arc::clone(&self.state),
                next_client_id: Arc::clone(&self.next_client_id),
            },
            listener,
            shutdown_rx,
        ));

        state.phase = ProxyPhase::Started;
        state.endpoint = Some(endpoint.clone());
        state.scratch = Some(scratch);
        state.shutdown = Some(shutdown_tx);
        state.accept_loop = Some(accept_loop);
        drop(state);

        info!(
            proxy = %self.name,
            endpoint = %endpoint,
            transport = %self.transport.kind(),
            handler = self.handler.name(),
            "Agent proxy started"
        );
        self.sink
            .record(&AuditEvent::proxy_start(self.name.as_ref(), endpoint.to_string()));
        Ok(endpoint)
    }

    /// Stop accepting, wait for in-flight connections, remove the scratch dir
    ///
    /// Returns once the listener is closed and every connection handler has
    /// finished. Stopping a proxy that never started only marks it stopped.
    pub async fn stop(&self) -> Result<()> {
        let pending = {
            let mut state = lock(&self.state);
            match state.phase {
                ProxyPhase::Created => {
                    state.phase = ProxyPhase::Stopped;
                    self.stopped.send_replace(true);
                    return Ok(());
                }
                ProxyPhase::Stopped => return Ok(()),
                ProxyPhase::Stopping => None,
                ProxyPhase::Started => {
                    state.phase = ProxyPhase::Stopping;
                    Some((
                        state.shutdown.take(),
                        state.accept_loop.take(),
                        state.scratch.take(),
                    ))
                }
            }
        };

        let Some((shutdown, accept_loop, scratch)) = pending else {
            // Another caller is stopping this proxy; wait until it is done
            let mut stopped = self.stopped.subscribe();
            let _ = stopped.wait_for(|done| *done).await;
            return Ok(());
        };

        debug!(proxy = %self.name, "Stopping agent proxy");
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = accept_loop {
            if let Err(e) = handle.await {
                error!(proxy = %self.name, error = %e, "Accept loop panicked");
            }
        }

        let removed = match scratch {
            Some(scratch) => scratch.remove(),
            None => Ok(()),
        };

        {
            let mut state = lock(&self.state);
            state.phase = ProxyPhase::Stopped;
            state.endpoint = None;
        }
        self.stopped.send_replace(true);

        info!(proxy = %self.name, "Agent proxy stopped");
        self.sink.record(&AuditEvent::proxy_stop(self.name.as_ref()));
        removed
    }
}

impl Drop for AgentProxy {
    fn drop(&mut self) {
        let state = lock(&self.state);
        if state.phase == ProxyPhase::Started {
            warn!(proxy = %self.name, "Agent proxy dropped without stop");
            if let Some(shutdown) = &state.shutdown {
                let _ = shutdown.send(true);
            }
        }
    }
}

struct AcceptContext {
    name: Arc<str>,
    upstream: Arc<Upstream>,
    handler: Arc<ConnectionHandler>,
    sink: Arc<dyn AuditSink>,
    state: SharedState,
    next_client_id: Arc<AtomicU64>,
}

/// Counts a connection as active for as long as it lives
struct ConnectionGuard {
    state: SharedState,
}

impl ConnectionGuard {
    fn new(state: SharedState) -> Self {
        lock(&state).active_connections += 1;
        Self { state }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.active_connections = state.active_connections.saturating_sub(1);
    }
}

async fn accept_loop(
    ctx: AcceptContext,
    listener: Listener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(proxy = %ctx.name, error = %e, "Connection handler panicked");
                }
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let client_id = ctx.next_client_id.fetch_add(1, Ordering::Relaxed);
                    trace!(proxy = %ctx.name, client_id, peer = %peer, "Accepted connection");

                    let guard = ConnectionGuard::new(Arc::clone(&ctx.state));
                    let conn = ConnectionContext::new(Arc::clone(&ctx.name), client_id, Arc::clone(&ctx.sink));
                    let upstream = Arc::clone(&ctx.upstream);
                    let handler = Arc::clone(&ctx.handler);

                    connections.spawn(async move {
                        let _guard = guard;
                        conn.record(AuditEvent::client_connect(conn.proxy.as_ref(), client_id));

                        if let Err(e) = handler.handle(stream, &upstream, &conn).await {
                            match e {
                                Error::Transport(_) => {
                                    warn!(proxy = %conn.proxy, client_id, error = %e, "Connection failed");
                                }
                                _ => {
                                    debug!(proxy = %conn.proxy, client_id, error = %e, "Connection ended with error");
                                }
                            }
                            conn.record(AuditEvent::error(conn.proxy.as_ref(), e.to_string()));
                        }

                        conn.record(AuditEvent::client_disconnect(conn.proxy.as_ref(), client_id));
                    });
                }
                Err(e) => {
                    warn!(proxy = %ctx.name, error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    drop(listener);
    if !connections.is_empty() {
        debug!(
            proxy = %ctx.name,
            count = connections.len(),
            "Waiting for in-flight connections"
        );
    }
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!(proxy = %ctx.name, error = %e, "Connection handler panicked");
        }
    }
}
