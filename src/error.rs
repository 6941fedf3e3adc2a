//! Error types for agent-proxy

use thiserror::Error;

/// Main error type for agent-proxy
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SSH key error: {0}")]
    SshKey(#[from] ssh_key::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The upstream agent socket is missing or cannot be reached.
    #[error("Upstream agent not available: {0}")]
    UpstreamNotAvailable(String),

    /// A failure isolated to one connection (accept, dial, read, write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Scratch directory or listener setup failed; the proxy did not start.
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Socket error: {0}")]
    Socket(String),
}

impl Error {
    /// Whether this error means a forwarding mode should be disabled
    /// rather than aborting the whole run.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Config(_) | Error::UpstreamNotAvailable(_))
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(Error::UpstreamNotAvailable("gone".into()).is_configuration());
        assert!(Error::Config("bad".into()).is_configuration());
        assert!(!Error::Lifecycle("mkdir".into()).is_configuration());
        assert!(!Error::Transport("reset".into()).is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Lifecycle("cannot create scratch dir".into());
        assert_eq!(err.to_string(), "Lifecycle error: cannot create scratch dir");
    }
}
