//! Exit code definitions for agent-proxy
//!
//! Provides standardized exit codes for different error conditions.

use crate::Error;

/// Exit codes for the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Configuration error (invalid config, missing required settings)
    ConfigError = 2,
    /// Socket error (cannot create scratch dir or bind a listener)
    SocketError = 3,
    /// Upstream error (upstream agent missing or unreachable)
    UpstreamError = 4,
}

impl ExitCode {
    /// Map an error chain to the exit code of its innermost library error
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|e| e.downcast_ref::<Error>()) {
            Some(Error::Config(_) | Error::TomlParse(_)) => ExitCode::ConfigError,
            Some(Error::Lifecycle(_) | Error::Socket(_)) => ExitCode::SocketError,
            Some(Error::UpstreamNotAvailable(_) | Error::Transport(_)) => ExitCode::UpstreamError,
            _ => ExitCode::GeneralError,
        }
    }
}

impl From<ExitCode> for u8 {
    fn from(code: ExitCode) -> Self {
        code as u8
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
