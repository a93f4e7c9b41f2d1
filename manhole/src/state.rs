// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide installation state: the single manhole a process can have
//! active at a time, and the operations that mutate it.

use std::sync::{Arc, Mutex, OnceLock};

use crate::config::Config;
use crate::error::{ManholeError, Result};
use crate::logger::Logger;
use crate::signal_router::SignalRouter;
use crate::socket::EndpointSocket;
use crate::thread::ManholeThread;

struct Installed {
    config: Arc<Config>,
    socket: Arc<EndpointSocket>,
    thread: Option<ManholeThread>,
    signal_router: SignalRouter,
}

/// The process-wide manhole singleton.
///
/// Exactly zero or one manhole is active per process. Installation is
/// gated by `INSTANCE`'s inner mutex rather than a raw global so it is
/// safe to call from multiple threads (including a signal-triggered
/// dispatcher thread) concurrently.
pub struct ManholeState {
    logger: Arc<Logger>,
    installed: Mutex<Option<Installed>>,
}

static INSTANCE: OnceLock<ManholeState> = OnceLock::new();

impl ManholeState {
    pub fn global() -> &'static ManholeState {
        INSTANCE.get_or_init(|| ManholeState {
            logger: Arc::new(Logger::default()),
            installed: Mutex::new(None),
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Installs a manhole with `config`. Fails with `AlreadyInstalled`
    /// unless `strict` is false, in which case a prior installation is
    /// released first and replaced.
    pub fn install(&self, config: Config) -> Result<()> {
        let strict = config.strict;
        let mut guard = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            if strict {
                return Err(ManholeError::AlreadyInstalled);
            }
            let previous = guard.take().unwrap();
            drop_installed(previous, &self.logger);
        }

        self.logger.configure(config.verbose, config.log_destination.clone());
        let config = Arc::new(config);
        let pid = std::process::id();
        let socket = Arc::new(EndpointSocket::bind(
            config.socket_path.as_deref(),
            pid,
            &self.logger,
        )?);

        let mut signal_router = SignalRouter::default();

        // Both routes are registered independently: a config naming both
        // an activate and a oneshot signal wires up both entry points
        // (rejected only when the two signals are the same number, at
        // `ConfigBuilder::build` time).
        if let Some(signum) = config.oneshot_signal {
            signal_router.install_oneshot(signum).map_err(ManholeError::Other)?;
        }
        if let Some(signum) = config.activate_signal {
            signal_router.install_activate(signum).map_err(ManholeError::Other)?;
        }

        let mut thread = None;
        if config.starts_thread_immediately() {
            thread = Some(ManholeThread::start(
                socket.clone(),
                config.clone(),
                self.logger.clone(),
            ));
        }

        *guard = Some(Installed {
            config,
            socket,
            thread,
            signal_router,
        });
        Ok(())
    }

    /// Tears down the active installation, if any. Idempotent.
    pub fn release(&self) {
        let mut guard = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(installed) = guard.take() {
            drop_installed(installed, &self.logger);
        }
        self.logger.release();
    }

    /// Restarts the accept thread after it died or after a fork, reusing
    /// the existing configuration. A no-op if no manhole is installed or
    /// the thread is already running in this process.
    pub fn reinstall(&self) {
        let mut guard = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        let Some(installed) = guard.as_mut() else { return };
        if let Some(thread) = installed.thread.as_ref() {
            if thread.started_in_current_process() {
                return;
            }
            // A freshly forked child inherits a bit-for-bit copy of the
            // parent's handle, naming an OS thread that doesn't exist
            // here. Drop it rather than join it.
            installed.thread = None;
        }
        if !installed.config.starts_thread_immediately() {
            return;
        }
        if !rebind_socket(installed, &self.logger) {
            return;
        }
        std::thread::sleep(installed.config.reinstall_delay);
        installed.thread = Some(ManholeThread::start(
            installed.socket.clone(),
            installed.config.clone(),
            self.logger.clone(),
        ));
    }

    pub fn log_fork_detected(&self) {
        let _ = self.logger.log("Fork detected. Reinstalling Manhole.");
    }

    /// Starts the accept thread from the activate-signal dispatcher. A
    /// no-op if already running in this process; a stale, fork-inherited
    /// handle is replaced rather than trusted.
    pub fn handle_activate(&self) {
        let mut guard = self.installed.lock().unwrap_or_else(|e| e.into_inner());
        let Some(installed) = guard.as_mut() else { return };
        let running = matches!(&installed.thread, Some(thread) if thread.started_in_current_process());
        if !running {
            installed.thread = None;
            if !rebind_socket(installed, &self.logger) {
                return;
            }
            installed.thread = Some(ManholeThread::start(
                installed.socket.clone(),
                installed.config.clone(),
                self.logger.clone(),
            ));
        }
    }

    /// Runs one synchronous accept/serve cycle directly from the oneshot
    /// signal handler, then removes the listening socket. Never panics or
    /// propagates — any failure is swallowed so a misbehaving manhole
    /// can't take the host process down with it.
    pub fn handle_oneshot(&self) {
        let snapshot = {
            let guard = self.installed.lock().unwrap_or_else(|e| e.into_inner());
            guard.as_ref().map(|installed| installed.config.clone())
        };
        let Some(config) = snapshot else { return };

        let _ = self.logger.log(&format!(
            "Waiting for new connection (in pid:{}) ...",
            std::process::id()
        ));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let pid = std::process::id();
            if let Ok(socket) = EndpointSocket::bind(config.socket_path.as_deref(), pid, &self.logger) {
                if let Ok((stream, _)) = socket.listener().accept() {
                    crate::connection::serve(stream, &config, &self.logger);
                }
                socket.close_and_unlink();
            }
        }));
        if result.is_err() {
            let _ = self.logger.log("Oneshot failure: handler panicked");
        }
    }
}

/// Binds a fresh listener at `installed.config.socket_path` (or the
/// current process's pid-derived default) and swaps it into `installed`,
/// marking the old one foreign first.
///
/// The old socket is marked foreign unconditionally, not just on the fork
/// path: the new bind already unlinks any stale inode at its own target
/// path, so the old instance's own unlink-on-drop would either collide
/// with that (same path, same process) or destroy a path it has no claim
/// to (different pid after a fork). Mirrors `get_socket()` in the source
/// this crate was ported from, which is re-invoked fresh on every thread
/// (re)start rather than cached.
fn rebind_socket(installed: &mut Installed, logger: &Logger) -> bool {
    let pid = std::process::id();
    match EndpointSocket::bind(installed.config.socket_path.as_deref(), pid, logger) {
        Ok(fresh) => {
            installed.socket.mark_foreign();
            installed.socket = Arc::new(fresh);
            true
        }
        Err(_) => false,
    }
}

fn drop_installed(mut installed: Installed, logger: &Logger) {
    if let Some(thread) = installed.thread.take() {
        thread.stop();
        installed.socket.shutdown();
        thread.join();
    }
    installed.signal_router.restore();
    Arc::try_unwrap(installed.socket)
        .map(EndpointSocket::close_and_unlink)
        .unwrap_or_else(|shared| shared.shutdown());
    let _ = logger;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_auth::StubPeerAuthenticator;
    use std::sync::Arc;

    fn fresh_state() -> ManholeState {
        ManholeState {
            logger: Arc::new(Logger::default()),
            installed: Mutex::new(None),
        }
    }

    #[test]
    fn install_twice_strict_fails() {
        let state = fresh_state();
        let dir = tempfile::tempdir().unwrap();

        let config_a = Config::builder()
            .socket_path(dir.path().join("a.sock"))
            .thread(false)
            .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
            .build()
            .unwrap();
        state.install(config_a).unwrap();

        let config_b = Config::builder()
            .socket_path(dir.path().join("b.sock"))
            .thread(false)
            .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
            .build()
            .unwrap();
        let err = state.install(config_b).unwrap_err();
        assert!(matches!(err, ManholeError::AlreadyInstalled));

        state.release();
    }

    #[test]
    fn install_non_strict_replaces_previous() {
        let state = fresh_state();
        let dir = tempfile::tempdir().unwrap();

        let config_a = Config::builder()
            .socket_path(dir.path().join("a.sock"))
            .thread(false)
            .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
            .build()
            .unwrap();
        state.install(config_a).unwrap();

        let config_b = Config::builder()
            .socket_path(dir.path().join("b.sock"))
            .thread(false)
            .strict(false)
            .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
            .build()
            .unwrap();
        state.install(config_b).unwrap();

        state.release();
    }
}
