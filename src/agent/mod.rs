//! Agent proxies
//!
//! This module provides the pieces of a forwarding proxy:
//! - `Upstream`: the host agent socket each connection dials
//! - `ConnectionHandler`: relay, Assuan filter or ssh-agent filter
//! - `AgentProxy`: listener lifecycle (start, accept loop, drain on stop)

mod assuan;
mod handler;
mod relay;
mod server;
mod ssh;
mod upstream;

pub use assuan::{AssuanFilter, AssuanSession};
pub use handler::{ConnectionContext, ConnectionHandler};
pub use relay::{RelayStats, relay};
pub use server::{AgentProxy, ProxyPhase};
pub use ssh::SshAgentFilter;
pub use upstream::{DEFAULT_CONNECT_TIMEOUT, Upstream};
