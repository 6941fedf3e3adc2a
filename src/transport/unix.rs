//! Unix socket transport

use super::{Endpoint, Listener, Transport, TransportKind, bind_error};
use crate::error::{Error, Result};
use crate::scratch::ScratchDir;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tokio::net::UnixListener;
use tracing::debug;

/// Listens on `<scratch>/<name>.sock`, mode 0600
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixTransport;

impl Transport for UnixTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Unix
    }

    fn bind(&self, scratch: &ScratchDir, name: &str) -> Result<(Listener, Endpoint)> {
        let path = scratch.join(format!("{}.sock", name));
        remove_stale_socket(&path)?;

        let listener = UnixListener::bind(&path).map_err(|e| bind_error(path.display(), e))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).map_err(|e| {
            Error::Lifecycle(format!(
                "Failed to set permissions on socket at {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Bound Unix socket");
        Ok((Listener::Unix(listener), Endpoint::Unix(path)))
    }
}

/// Remove a leftover socket file, refusing to follow symlinks
fn remove_stale_socket(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => Err(Error::Socket(format!(
            "Refusing to replace symlink at {}",
            path.display()
        ))),
        Ok(_) => fs::remove_file(path).map_err(|e| {
            Error::Socket(format!(
                "Failed to remove existing socket at {}: {}",
                path.display(),
                e
            ))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Socket(format!(
            "Failed to check existing socket at {}: {}",
            path.display(),
            e
        ))),
    }
}
