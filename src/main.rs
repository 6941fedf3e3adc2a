//! agent-proxy - filtered agent forwarding for containers

use clap::{CommandFactory, Parser};
use clap_complete::env::CompleteEnv;
use tracing::error;

use agent_proxy::cli::exit_code::ExitCode;
use agent_proxy::cli::{Cli, Commands, commands};
use agent_proxy::logging::{self, LogConfig};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Handle dynamic shell completion if COMPLETE env var is set
    CompleteEnv::with_factory(Cli::command).complete();

    let cli = Cli::parse();
    logging::init(LogConfig::new(cli.verbose, cli.quiet));

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.config).await,
        Commands::Cleanup(args) => commands::cleanup::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args, cli.config).await,
        Commands::Version => {
            commands::version::print_version(cli.verbose);
            Ok(())
        }
        Commands::Completion(args) => commands::completion::execute(args),
    };

    match result {
        Ok(()) => ExitCode::Success.into(),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from_error(&e).into()
        }
    }
}
