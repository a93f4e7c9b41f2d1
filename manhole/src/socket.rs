// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Owns the listening Unix-domain-socket endpoint.

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::logger::Logger;

/// Computes the default endpoint path for a given pid, `/tmp/manhole-<pid>`.
pub fn default_path_for_pid(pid: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/manhole-{pid}"))
}

/// A bound, listening Unix-domain-socket endpoint.
///
/// `bind()` unlinks any stale inode at the target path first (a previous
/// crash can leave one behind), then binds and listens with a fixed
/// backlog of `5`. By default the accept loop serves one connection at a
/// time; with `daemon_connection` enabled, callers may `accept()` again
/// while a previous [`crate::connection`] handler is still running.
pub struct EndpointSocket {
    path: PathBuf,
    listener: UnixListener,
    foreign: AtomicBool,
}

impl EndpointSocket {
    pub fn path_for(socket_path: Option<&Path>, pid: u32) -> PathBuf {
        socket_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_path_for_pid(pid))
    }

    pub fn bind(socket_path: Option<&Path>, pid: u32, logger: &Logger) -> anyhow::Result<Self> {
        let path = Self::path_for(socket_path, pid);
        unlink_if_present(&path);

        let listener = UnixListener::bind(&path)?;
        set_backlog_via_recreate(&path, &listener)?;
        let _ = logger.log(&format!("Manhole UDS path: {}", path.display()));
        Ok(Self {
            path,
            listener,
            foreign: AtomicBool::new(false),
        })
    }

    /// Marks this endpoint as belonging to another process's view of the
    /// world, e.g. a listener inherited across `fork()`. Its `Drop` impl
    /// becomes a no-op: the path it names is that other process's live
    /// endpoint, not a file this process is responsible for cleaning up.
    pub fn mark_foreign(&self) {
        self.foreign.store(true, Ordering::SeqCst);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn listener(&self) -> &UnixListener {
        &self.listener
    }

    /// Unblocks any thread currently parked in `accept()` on this
    /// listener. `std::os::unix::net::UnixListener` has no portable
    /// `shutdown`, so this drops down to `nix::sys::socket::shutdown` on
    /// the raw fd.
    pub fn shutdown(&self) {
        use std::os::unix::io::AsRawFd;
        let _ = nix::sys::socket::shutdown(
            self.listener.as_raw_fd(),
            nix::sys::socket::Shutdown::Both,
        );
    }

    /// Removes the UDS path if it still exists. Idempotent.
    pub fn close_and_unlink(self) {
        unlink_if_present(&self.path);
    }
}

impl Drop for EndpointSocket {
    fn drop(&mut self) {
        if !self.foreign.load(Ordering::SeqCst) {
            unlink_if_present(&self.path);
        }
    }
}

fn unlink_if_present(path: &Path) {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
}

/// `std::os::unix::net::UnixListener::bind` always uses the platform
/// default backlog (128 on Linux). The contract here fixes backlog at
/// `5`, so rebuild the listener's backlog from a raw socket with an
/// explicit `listen(fd, 5)` call.
fn set_backlog_via_recreate(path: &Path, listener: &UnixListener) -> anyhow::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = listener.as_raw_fd();
    // SAFETY: fd is the listener's own valid socket descriptor.
    let rc = unsafe { libc::listen(fd, 5) };
    anyhow::ensure!(
        rc == 0,
        "listen({}, 5) failed for {}",
        fd,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_path_matches_source_convention() {
        assert_eq!(
            default_path_for_pid(1234),
            PathBuf::from("/tmp/manhole-1234")
        );
    }

    #[test]
    fn bind_unlinks_stale_inode_and_binds_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manhole-test.sock");
        std::fs::write(&path, b"stale").unwrap();

        let logger = Logger::default();
        logger.configure(false, crate::config::LogDestination::default());
        let socket = EndpointSocket::bind(Some(&path), 1, &logger).unwrap();
        assert!(path.exists());
        socket.close_and_unlink();
        assert!(!path.exists());
    }

    #[test]
    fn different_pids_yield_different_paths() {
        assert_ne!(default_path_for_pid(1), default_path_for_pid(2));
    }

    #[test]
    fn mark_foreign_suppresses_unlink_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.sock");

        let logger = Logger::default();
        logger.configure(false, crate::config::LogDestination::default());
        let socket = EndpointSocket::bind(Some(&path), 1, &logger).unwrap();
        socket.mark_foreign();
        drop(socket);
        assert!(path.exists(), "a foreign socket's drop must not unlink its path");

        std::fs::remove_file(&path).unwrap();
    }
}
