// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Scoped replacement of the host's stdin/stdout/stderr.
//!
//! Rust's `Stdin`/`Stdout`/`Stderr` are not swappable references the way
//! a scripting language's equivalents are; this operates one level down,
//! at the OS file-descriptor table, via `dup`/`dup2`. That also means the
//! redirect is genuinely process-wide: any other thread writing through
//! `println!` during the window sends its output to the client socket
//! too, a hazard worth knowing about rather than hiding behind a
//! Rust-level indirection.

use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use nix::unistd::{close, dup, dup2};

struct SavedFd {
    slot: RawFd,
    saved: RawFd,
}

/// RAII guard that restores the host's original stdin/stdout/(stderr)
/// bindings when dropped. Restoration runs even when the body inside
/// [`with_streams`] panics.
///
/// Restoring a slot (`dup2(saved, slot)`) atomically closes whatever
/// duplicate of the client fd currently occupies it, so no separate
/// close is needed for the redirected side.
pub struct StreamGuard {
    saved: Vec<SavedFd>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        for SavedFd { slot, saved } in self.saved.drain(..) {
            let _ = dup2(saved, slot);
            let _ = close(saved);
        }
    }
}

/// Snapshots stdin/stdout/(stderr), redirects them onto duplicates of
/// `client_fd`, runs `body`, then restores the originals — guaranteed on
/// every exit path, including a panic inside `body`. The caller retains
/// ownership of `client_fd` and is responsible for closing it once the
/// session ends.
pub fn with_streams<T>(client_fd: RawFd, redirect_stderr: bool, body: impl FnOnce() -> T) -> T {
    let mut saved = Vec::new();
    let mut slots = vec![libc::STDIN_FILENO, libc::STDOUT_FILENO];
    if redirect_stderr {
        slots.push(libc::STDERR_FILENO);
    }

    for slot in &slots {
        if let Ok(backup) = dup(*slot) {
            saved.push(SavedFd {
                slot: *slot,
                saved: backup,
            });
        }
    }

    for slot in &slots {
        let _ = dup2(client_fd, *slot);
    }

    let guard = StreamGuard { saved };
    let result = body();
    drop(guard);
    result
}

/// Returns `(device, inode)` for a given fd — used by tests to assert
/// that bindings observed after a redirect round-trip match those
/// observed before, without depending on the fd *number* (which can be
/// reused).
pub fn fd_identity(fd: RawFd) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    let file = unsafe { std::fs::File::from_raw_fd(dup(fd).ok()?) };
    let metadata = file.metadata().ok()?;
    Some((metadata.dev(), metadata.ino()))
}
