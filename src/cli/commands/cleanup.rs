//! Cleanup command - remove scratch directories of dead processes

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::CleanupArgs;
use crate::config::{expand_path, load_config_from_path_or_default};
use crate::scratch::cleanup_orphans;

/// Execute the cleanup command
pub async fn execute(args: CleanupArgs, config_path: Option<PathBuf>) -> Result<()> {
    let root = match args.sockets_root {
        Some(root) => root,
        None => {
            let config_file = load_config_from_path_or_default(config_path.as_deref())
                .context("Failed to load configuration")?;
            match &config_file.config.sockets_root {
                Some(root) => PathBuf::from(expand_path(root)?),
                None => crate::scratch::default_sockets_root(),
            }
        }
    };

    let report = cleanup_orphans(&root)
        .with_context(|| format!("Failed to sweep {}", root.display()))?;

    for path in &report.removed {
        println!("removed {}", path.display());
    }
    println!(
        "{} removed, {} still in use ({})",
        report.removed.len(),
        report.kept.len(),
        root.display()
    );
    Ok(())
}
