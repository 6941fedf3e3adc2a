//! Configuration module for agent-proxy
//!
//! This module handles loading and parsing of configuration files,
//! including environment variable expansion and path resolution.

mod file;

use crate::transport::TransportMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub use file::{
    ConfigFile, ConfigPath, config_search_paths, find_config_file, load_config,
    load_config_from_path_or_default,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding the per-run scratch directories
    /// Defaults to `$XDG_RUNTIME_DIR/agent-proxy`
    #[serde(default)]
    pub sockets_root: Option<String>,

    /// How endpoints are published: auto, unix or tcp
    #[serde(default)]
    pub transport: TransportMode,

    /// Path of the JSON Lines audit log
    #[serde(default)]
    pub audit_log: Option<String>,

    /// Timeout for dialing an upstream agent
    /// Format: "10s", "1m", etc.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: String,

    #[serde(default)]
    pub ssh: AgentConfig,

    #[serde(default)]
    pub gpg: AgentConfig,

    #[serde(default)]
    pub tmux: AgentConfig,
}

/// Settings for one forwarded agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Upstream socket; the agent's usual location when unset
    /// Supports environment variable and tilde expansion
    #[serde(default)]
    pub upstream: Option<String>,

    /// Key ids (gpg) or `SHA256:` fingerprints (ssh); empty allows all
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            upstream: None,
            allowed_keys: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sockets_root: None,
            transport: TransportMode::default(),
            audit_log: None,
            connect_timeout: default_connect_timeout(),
            ssh: AgentConfig::default(),
            gpg: AgentConfig::default(),
            tmux: AgentConfig::default(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_connect_timeout() -> String {
    "10s".to_string()
}

/// The agents a proxy can forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Ssh,
    Gpg,
    Tmux,
}

impl AgentKind {
    pub const ALL: [AgentKind; 3] = [AgentKind::Ssh, AgentKind::Gpg, AgentKind::Tmux];

    pub fn name(self) -> &'static str {
        match self {
            AgentKind::Ssh => "ssh",
            AgentKind::Gpg => "gpg",
            AgentKind::Tmux => "tmux",
        }
    }

    /// Prefix of the environment variables publishing this agent's endpoint
    pub fn env_prefix(self) -> &'static str {
        match self {
            AgentKind::Ssh => "SSH",
            AgentKind::Gpg => "GPG",
            AgentKind::Tmux => "TMUX",
        }
    }

    /// Where this agent's socket usually lives on the host
    pub fn default_upstream(self) -> Option<PathBuf> {
        match self {
            AgentKind::Ssh => std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from),
            AgentKind::Gpg => default_gpg_socket(),
            AgentKind::Tmux => default_tmux_socket(),
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn default_gpg_socket() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("GNUPGHOME") {
        return Some(PathBuf::from(home).join("S.gpg-agent"));
    }
    if let Some(runtime) = dirs::runtime_dir() {
        let socket = runtime.join("gnupg").join("S.gpg-agent");
        if socket.exists() {
            return Some(socket);
        }
    }
    dirs::home_dir().map(|home| home.join(".gnupg").join("S.gpg-agent"))
}

fn default_tmux_socket() -> Option<PathBuf> {
    // $TMUX is "<socket>,<pid>,<session>" inside a tmux session
    if let Ok(tmux) = std::env::var("TMUX") {
        if let Some(socket) = tmux.split(',').next().filter(|s| !s.is_empty()) {
            return Some(PathBuf::from(socket));
        }
    }
    let tmpdir = std::env::var_os("TMUX_TMPDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    Some(tmpdir.join(format!("tmux-{}", uid)).join("default"))
}

impl Config {
    pub fn agent(&self, kind: AgentKind) -> &AgentConfig {
        match kind {
            AgentKind::Ssh => &self.ssh,
            AgentKind::Gpg => &self.gpg,
            AgentKind::Tmux => &self.tmux,
        }
    }

    pub fn agent_mut(&mut self, kind: AgentKind) -> &mut AgentConfig {
        match kind {
            AgentKind::Ssh => &mut self.ssh,
            AgentKind::Gpg => &mut self.gpg,
            AgentKind::Tmux => &mut self.tmux,
        }
    }

    /// Expand environment variables and tilde in all paths
    pub fn expand_paths(&self) -> crate::Result<ExpandedConfig> {
        let sockets_root = match &self.sockets_root {
            Some(root) => PathBuf::from(expand_path(root)?),
            None => crate::scratch::default_sockets_root(),
        };
        let audit_log = self
            .audit_log
            .as_ref()
            .map(|p| expand_path(p))
            .transpose()?
            .map(PathBuf::from);

        Ok(ExpandedConfig {
            sockets_root,
            transport: self.transport,
            audit_log,
            connect_timeout: parse_duration(&self.connect_timeout)?,
            ssh: self.ssh.expand(AgentKind::Ssh)?,
            gpg: self.gpg.expand(AgentKind::Gpg)?,
            tmux: self.tmux.expand(AgentKind::Tmux)?,
        })
    }
}

impl AgentConfig {
    fn expand(&self, kind: AgentKind) -> crate::Result<ExpandedAgentConfig> {
        let upstream = match &self.upstream {
            Some(path) => Some(PathBuf::from(expand_path(path)?)),
            None => kind.default_upstream(),
        };
        Ok(ExpandedAgentConfig {
            kind,
            enabled: self.enabled,
            upstream,
            allowed_keys: self.allowed_keys.clone(),
        })
    }
}

/// Configuration with all paths expanded
#[derive(Debug, Clone)]
pub struct ExpandedConfig {
    pub sockets_root: PathBuf,
    pub transport: TransportMode,
    pub audit_log: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub ssh: ExpandedAgentConfig,
    pub gpg: ExpandedAgentConfig,
    pub tmux: ExpandedAgentConfig,
}

impl ExpandedConfig {
    pub fn agents(&self) -> [&ExpandedAgentConfig; 3] {
        [&self.ssh, &self.gpg, &self.tmux]
    }
}

/// Agent settings with the upstream resolved
#[derive(Debug, Clone)]
pub struct ExpandedAgentConfig {
    pub kind: AgentKind,
    pub enabled: bool,
    /// `None` when no location could be determined
    pub upstream: Option<PathBuf>,
    pub allowed_keys: Vec<String>,
}

/// Expand environment variables and tilde in a path string
pub fn expand_path(path: &str) -> crate::Result<String> {
    shellexpand::full(path)
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::Config(format!("Failed to expand path '{}': {}", path, e)))
}

/// Parse a duration string like "10s", "5m", "1h"
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::Config("Empty duration string".to_string()));
    }

    let (num_str, unit) = s
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, "s"));

    let num: u64 = num_str.trim().parse().map_err(|e| {
        crate::Error::Config(format!("Invalid duration number '{}': {}", num_str, e))
    })?;

    match unit.to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(num)),
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(num)),
        "m" | "min" | "mins" | "minute" | "minutes" => Ok(Duration::from_secs(num * 60)),
        "h" | "hr" | "hrs" | "hour" | "hours" => Ok(Duration::from_secs(num * 60 * 60)),
        _ => Err(crate::Error::Config(format!(
            "Unknown duration unit '{}' in '{}'",
            unit, s
        ))),
    }
}
