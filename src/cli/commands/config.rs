//! Config command - show or validate configuration

use anyhow::{Context, Result, bail};
use std::path::PathBuf;

use crate::cli::args::ConfigArgs;
use crate::config::{Config, config_search_paths, load_config_from_path_or_default};
use crate::filter::FingerprintAllowList;

/// Example configuration content
fn example_config() -> &'static str {
    r#"# agent-proxy configuration file

# Directory for per-run scratch directories
# Default: $XDG_RUNTIME_DIR/agent-proxy
# sockets_root = "$XDG_RUNTIME_DIR/agent-proxy"

# How endpoints reach the container: "auto", "unix" or "tcp"
transport = "auto"

# JSON Lines audit log of key decisions
# audit_log = "~/.local/state/agent-proxy/audit.jsonl"

# Timeout for dialing an upstream agent
connect_timeout = "10s"

[ssh]
# upstream = "$SSH_AUTH_SOCK"
# Only these keys are listed and may sign (empty allows all)
# allowed_keys = ["SHA256:..."]

[gpg]
# upstream = "~/.gnupg/S.gpg-agent"
# Key ids or fingerprints allowed for PKSIGN/PKDECRYPT (empty allows all)
# allowed_keys = ["90ABCD1234"]

[tmux]
enabled = true
# upstream = "/tmp/tmux-1000/default"
"#
}

/// Execute the config command
pub async fn execute(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    if args.paths {
        println!("Config search paths (in priority order):");
        for (i, cp) in config_search_paths().iter().enumerate() {
            let exists = if cp.path.exists() { "[exists]" } else { "" };
            println!("  {}. {} {}", i + 1, cp.description, exists);
            println!("     {}", cp.path.display());
        }
        return Ok(());
    }

    if args.example {
        let example: Config =
            toml::from_str(example_config()).context("Failed to parse example config")?;
        match args.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&example)?),
            _ => print!("{}", example_config()),
        }
        return Ok(());
    }

    let config_file = load_config_from_path_or_default(config_path.as_deref())?;
    let source = if config_file.path.as_os_str().is_empty() {
        "defaults".to_string()
    } else {
        config_file.path.display().to_string()
    };

    if args.validate {
        let expanded = config_file
            .config
            .expand_paths()
            .with_context(|| format!("Configuration is invalid: {}", source))?;
        FingerprintAllowList::new(&expanded.ssh.allowed_keys)
            .with_context(|| format!("Configuration is invalid: {}", source))?;
        if expanded.connect_timeout.is_zero() {
            bail!("Configuration is invalid: connect_timeout must be positive");
        }
        println!("Configuration is valid: {}", source);
        return Ok(());
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&config_file.config)?),
        _ => {
            println!("# Configuration from: {}", source);
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&config_file.config)
                    .context("Failed to render configuration")?
            );
        }
    }

    Ok(())
}
