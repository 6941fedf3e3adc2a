//! Argument structures for CLI commands

use clap::Args;
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::{AgentKind, Config};
use crate::transport::TransportMode;

/// Arguments for the `run` command
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory holding the per-run scratch directories
    #[arg(long, env = "AGENT_PROXY_SOCKETS_ROOT")]
    pub sockets_root: Option<PathBuf>,

    /// How endpoints are published to containers
    #[arg(long, value_enum)]
    pub transport: Option<TransportMode>,

    /// Path to JSONL audit log file
    #[arg(long)]
    pub audit_log: Option<PathBuf>,

    /// Timeout for dialing upstream agents (e.g. "10s")
    #[arg(long, value_name = "DURATION")]
    pub connect_timeout: Option<String>,

    /// Upstream ssh-agent socket
    #[arg(long, value_name = "PATH")]
    pub ssh_upstream: Option<PathBuf>,

    /// Upstream gpg-agent socket
    #[arg(long, value_name = "PATH")]
    pub gpg_upstream: Option<PathBuf>,

    /// Upstream tmux server socket
    #[arg(long, value_name = "PATH")]
    pub tmux_upstream: Option<PathBuf>,

    /// Allowed SSH key fingerprint (repeatable, SHA256:...)
    #[arg(long = "ssh-allow", value_name = "FINGERPRINT")]
    pub ssh_allowed: Vec<String>,

    /// Allowed GPG key id or fingerprint (repeatable)
    #[arg(long = "gpg-allow", value_name = "KEYID")]
    pub gpg_allowed: Vec<String>,

    /// Do not forward the ssh-agent
    #[arg(long)]
    pub no_ssh: bool,

    /// Do not forward the gpg-agent
    #[arg(long)]
    pub no_gpg: bool,

    /// Do not forward the tmux server
    #[arg(long)]
    pub no_tmux: bool,
}

impl RunArgs {
    /// Overlay command line values onto a loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.sockets_root {
            config.sockets_root = Some(root.display().to_string());
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(log) = &self.audit_log {
            config.audit_log = Some(log.display().to_string());
        }
        if let Some(timeout) = &self.connect_timeout {
            config.connect_timeout = timeout.clone();
        }

        for kind in AgentKind::ALL {
            let (upstream, allowed, disabled) = match kind {
                AgentKind::Ssh => (&self.ssh_upstream, &self.ssh_allowed[..], self.no_ssh),
                AgentKind::Gpg => (&self.gpg_upstream, &self.gpg_allowed[..], self.no_gpg),
                AgentKind::Tmux => (&self.tmux_upstream, &[][..], self.no_tmux),
            };
            let agent = config.agent_mut(kind);
            if let Some(path) = upstream {
                agent.upstream = Some(path.display().to_string());
            }
            if !allowed.is_empty() {
                agent.allowed_keys = allowed.to_vec();
            }
            if disabled {
                agent.enabled = false;
            }
        }
    }
}

/// Arguments for the `cleanup` command
#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Directory to sweep for orphaned scratch directories
    #[arg(long, env = "AGENT_PROXY_SOCKETS_ROOT")]
    pub sockets_root: Option<PathBuf>,
}

/// Arguments for the `config` command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Show configuration file search paths
    #[arg(long)]
    pub paths: bool,

    /// Show an example configuration
    #[arg(long)]
    pub example: bool,

    /// Validate configuration only
    #[arg(long)]
    pub validate: bool,

    /// Output format
    #[arg(short, long, default_value = "toml", value_parser = ["toml", "json"])]
    pub format: String,
}

/// Arguments for the `completion` command
#[derive(Args, Debug, Clone)]
pub struct CompletionArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides_config() {
        let mut config = Config::default();
        config.gpg.allowed_keys = vec!["AAAA".to_string()];

        let args = RunArgs {
            transport: Some(TransportMode::Tcp),
            gpg_allowed: vec!["CAFEBABE".to_string()],
            gpg_upstream: Some(PathBuf::from("/tmp/S.gpg-agent")),
            no_tmux: true,
            ..RunArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.gpg.allowed_keys, vec!["CAFEBABE"]);
        assert_eq!(config.gpg.upstream.as_deref(), Some("/tmp/S.gpg-agent"));
        assert!(!config.tmux.enabled);
        assert!(config.ssh.enabled);
    }

    #[test]
    fn test_apply_keeps_file_values_without_flags() {
        let mut config = Config::default();
        config.ssh.allowed_keys = vec!["SHA256:abc".to_string()];
        RunArgs::default().apply(&mut config);
        assert_eq!(config.ssh.allowed_keys, vec!["SHA256:abc"]);
        assert_eq!(config.transport, TransportMode::Auto);
    }
}
