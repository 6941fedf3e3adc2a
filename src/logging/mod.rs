//! Logging and audit events
//!
//! Two separate streams:
//! - diagnostic logs through `tracing`, rendered to stderr
//! - typed audit events delivered to an injected [`AuditSink`]

pub mod jsonl;
pub mod sink;

pub use jsonl::{AuditEvent, AuditEventKind, Decision, JsonlWriter};
pub use sink::{AuditSink, FanoutSink, MemorySink, TracingSink};

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Verbosity level adjustment: -1 for quiet, 0 for normal, +1 for verbose
    pub verbosity: i8,
}

impl LogConfig {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        let verbosity = if quiet {
            -1
        } else if verbose {
            1
        } else {
            0
        };
        Self { verbosity }
    }

    /// Get the minimum log level based on verbosity
    fn min_level(&self) -> Level {
        match self.verbosity {
            v if v < 0 => Level::WARN,
            0 => Level::INFO,
            _ => Level::DEBUG,
        }
    }
}

/// Install the stderr subscriber
///
/// `RUST_LOG` overrides the level chosen by the flags. Calling this twice
/// keeps the first subscriber.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.min_level()).into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
