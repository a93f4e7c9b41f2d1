// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Routes two optional signals to manhole entry points, chaining to
//! whatever handler was previously installed for the same signal number.
//!
//! The "activate" signal only needs to flip a flag and wake a worker
//! thread, so its handler is restricted to async-signal-safe operations:
//! a single `write(2)` to a self-pipe, read by a small dispatcher thread
//! that does the real work of starting the accept loop. The "oneshot"
//! signal instead runs the connection synchronously from inside the
//! handler — `accept()`/`read()`/`write()` on a blocking socket are
//! async-signal-safe per POSIX, and this is an intentional, narrow
//! exception to the rule above.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::OnceLock;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::state::ManholeState;

static ACTIVATE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static DISPATCHER: OnceLock<std::thread::JoinHandle<()>> = OnceLock::new();

/// Tracks signals this crate has taken over, so `release()` can restore
/// whatever was registered before `install()` ran.
pub struct SignalRouter {
    previous: Vec<(Signal, SigAction)>,
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self { previous: Vec::new() }
    }
}

impl SignalRouter {
    /// Registers the activate-signal handler and starts the self-pipe
    /// dispatcher thread the first time it's needed.
    pub fn install_activate(&mut self, signum: i32) -> anyhow::Result<()> {
        ensure_self_pipe()?;
        let signal = signal_from_raw(signum)?;
        let action = SigAction::new(
            SigHandler::Handler(activate_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: installs a handler restricted to the async-signal-safe
        // self-pipe write below; the previous handler is captured for
        // `restore`.
        let old = unsafe { signal::sigaction(signal, &action)? };
        self.previous.push((signal, old));
        Ok(())
    }

    /// Registers the oneshot-signal handler.
    pub fn install_oneshot(&mut self, signum: i32) -> anyhow::Result<()> {
        let signal = signal_from_raw(signum)?;
        let action = SigAction::new(
            SigHandler::Handler(oneshot_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: see module docs — the handler itself performs a
        // synchronous, blocking accept/serve cycle by design.
        let old = unsafe { signal::sigaction(signal, &action)? };
        self.previous.push((signal, old));
        Ok(())
    }

    /// Restores every signal this router took over, in reverse order.
    pub fn restore(&mut self) {
        for (signal, action) in self.previous.drain(..).rev() {
            // SAFETY: `action` was captured from a prior `sigaction` call
            // for this exact signal.
            let _ = unsafe { signal::sigaction(signal, &action) };
        }
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        self.restore();
    }
}

fn signal_from_raw(signum: i32) -> anyhow::Result<Signal> {
    Signal::try_from(signum).map_err(|_| anyhow::anyhow!("signal {signum} is not a valid signal"))
}

fn ensure_self_pipe() -> anyhow::Result<()> {
    if ACTIVATE_WRITE_FD.load(Ordering::SeqCst) >= 0 {
        return Ok(());
    }
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: fds is a valid, appropriately sized buffer for pipe(2).
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    anyhow::ensure!(rc == 0, "failed to create the activate-signal self-pipe");
    let (read_fd, write_fd) = (fds[0], fds[1]);
    ACTIVATE_WRITE_FD.store(write_fd, Ordering::SeqCst);

    let handle = std::thread::Builder::new()
        .name("Manhole-activate".to_string())
        .spawn(move || dispatcher_loop(read_fd))
        .expect("failed to spawn manhole signal dispatcher thread");
    let _ = DISPATCHER.set(handle);
    Ok(())
}

fn dispatcher_loop(read_fd: RawFd) {
    let mut buf = [0u8; 1];
    loop {
        // SAFETY: buf is a valid 1-byte buffer; read_fd is the pipe's own
        // read end, owned by this thread for its whole lifetime.
        let n = unsafe { libc::read(read_fd, buf.as_mut_ptr() as *mut libc::c_void, 1) };
        if n == 0 {
            break;
        }
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            break;
        }
        ManholeState::global().handle_activate();
    }
    unsafe {
        libc::close(read_fd);
    }
}

extern "C" fn activate_handler(_signum: libc::c_int) {
    let fd = ACTIVATE_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        // SAFETY: single-byte write to a valid pipe fd; write(2) of one
        // byte to a pipe is async-signal-safe.
        unsafe {
            libc::write(fd, [1u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

extern "C" fn oneshot_handler(_signum: libc::c_int) {
    ManholeState::global().handle_oneshot();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_from_raw_rejects_out_of_range_values() {
        assert!(signal_from_raw(9999).is_err());
    }

    #[test]
    fn signal_from_raw_accepts_usr1() {
        assert!(signal_from_raw(libc::SIGUSR1).is_ok());
    }
}
