//! Pre-flight checks for the engine endpoint
//!
//! Validates the socket path and probe library before binding anything.
//! Provides clear, actionable error messages when requirements aren't met.

use anyhow::{bail, Context, Result};
use log::info;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;
use std::path::Path;

/// `sun_path` capacity minus the terminating NUL
const MAX_SOCKET_PATH_LEN: usize = 107;

/// Run all pre-flight checks before binding the engine socket
pub fn run_preflight_checks(socket_path: &Path) -> Result<()> {
    check_socket_path_length(socket_path)?;
    check_socket_directory(socket_path)?;
    remove_stale_socket(socket_path)?;
    Ok(())
}

/// Check that the path fits in a Unix socket address
fn check_socket_path_length(socket_path: &Path) -> Result<()> {
    let len = socket_path.as_os_str().len();
    if len > MAX_SOCKET_PATH_LEN {
        bail!(
            "Socket path too long: {} ({len} bytes)\n\n\
             Unix socket paths are limited to {MAX_SOCKET_PATH_LEN} bytes. Use a shorter --socket.",
            socket_path.display()
        );
    }
    Ok(())
}

/// Check that the socket's parent directory exists
fn check_socket_directory(socket_path: &Path) -> Result<()> {
    let Some(dir) = socket_path.parent().filter(|d| !d.as_os_str().is_empty()) else {
        return Ok(());
    };
    if !dir.is_dir() {
        bail!(
            "Socket directory not found: {}\n\n\
             Create it first or choose another --socket path.",
            dir.display()
        );
    }
    Ok(())
}

/// Remove a socket file left behind by a dead engine
///
/// Refuses to touch anything that is not a socket, or a socket some engine
/// is still serving.
pub fn remove_stale_socket(socket_path: &Path) -> Result<()> {
    let metadata = match std::fs::symlink_metadata(socket_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Cannot inspect socket path {}", socket_path.display()))
        }
    };
    if !metadata.file_type().is_socket() {
        bail!(
            "Not a socket: {}\n\n\
             Refusing to replace an existing file. Remove it or choose another --socket path.",
            socket_path.display()
        );
    }
    if UnixStream::connect(socket_path).is_ok() {
        bail!(
            "Socket already in use: {}\n\n\
             Another engine is listening there. Stop it or choose another --socket path.",
            socket_path.display()
        );
    }
    std::fs::remove_file(socket_path)
        .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    info!("Removed stale socket {}", socket_path.display());
    Ok(())
}

/// Check that the probe library exists and is a file
pub fn check_probe_library(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Probe library not found: {}\n\n\
             Make sure the path is correct and the library exists.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --probe-library must point to a shared library, not a directory.",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_path_too_long() {
        let long = format!("/tmp/{}.sock", "x".repeat(120));
        let err = run_preflight_checks(Path::new(&long)).unwrap_err().to_string();
        assert!(err.contains("too long"));
    }

    #[test]
    fn test_missing_directory() {
        let err = run_preflight_checks(Path::new("/nonexistent/dir/engine.sock"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("Socket directory not found"));
    }

    #[test]
    fn test_stale_socket_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        drop(UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        run_preflight_checks(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_live_socket_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let err = run_preflight_checks(&path).unwrap_err().to_string();
        assert!(err.contains("already in use"));
        assert!(path.exists());
    }

    #[test]
    fn test_regular_file_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.sock");
        std::fs::write(&path, b"data").unwrap();
        let err = run_preflight_checks(&path).unwrap_err().to_string();
        assert!(err.contains("Not a socket"));
    }

    #[test]
    fn test_probe_library_not_found() {
        let err = check_probe_library(Path::new("/nonexistent/libprobes.so")).unwrap_err();
        assert!(err.to_string().contains("Probe library not found"));
    }
}
