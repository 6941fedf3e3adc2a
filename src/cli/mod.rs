//! CLI module for agent-proxy
//!
//! This module provides the command-line interface using clap derive macros.

pub mod args;
pub mod commands;
pub mod exit_code;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use args::{CleanupArgs, CompletionArgs, ConfigArgs, RunArgs};

/// Filtering proxies for SSH, GPG and tmux agents forwarded into containers
#[derive(Parser, Debug)]
#[command(name = "agent-proxy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(long, global = true, env = "AGENT_PROXY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the enabled proxies and publish their endpoints
    Run(RunArgs),

    /// Remove scratch directories left by dead processes
    Cleanup(CleanupArgs),

    /// Show or validate configuration
    Config(ConfigArgs),

    /// Show version information
    Version,

    /// Generate shell completions
    Completion(CompletionArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::parse_from([
            "agent-proxy",
            "--verbose",
            "run",
            "--transport",
            "tcp",
            "--gpg-allow",
            "CAFEBABE",
            "--gpg-allow",
            "DEADBEEF",
            "--no-tmux",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.transport, Some(crate::transport::TransportMode::Tcp));
                assert_eq!(args.gpg_allowed, vec!["CAFEBABE", "DEADBEEF"]);
                assert!(args.no_tmux);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
