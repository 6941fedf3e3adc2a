//! agent-proxy - forward host agents into containers under a policy
//!
//! This library provides listeners that expose the host's ssh-agent,
//! gpg-agent and tmux server to containers. The gpg-agent proxy gates
//! signing and decryption by key id, the ssh-agent proxy narrows the
//! visible identities by fingerprint, and tmux is relayed as-is. Each
//! proxy lives in its own scratch directory, which is removed on stop and
//! swept on the next run if the owning process died.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod protocol;
pub mod scratch;
pub mod transport;

pub use error::{Error, Result};

/// Package version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name
pub const NAME: &str = env!("CARGO_PKG_NAME");
