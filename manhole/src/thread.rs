// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! The long-lived accept loop that serves one connection at a time.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::Config;
use crate::logger::Logger;
use crate::socket::EndpointSocket;
use crate::threading::set_current_thread_name;

/// Owns the accept-loop worker thread and its stop flag.
///
/// The accept loop blocks on `accept()`, spawns a fresh worker thread to
/// run [`crate::connection::serve`], then loops back. By default it joins
/// that worker before accepting again, so only one connection is served
/// at a time (a connection needs exclusive access to stdin/stdout/stderr
/// while a REPL session is redirected onto it); `config.daemon_connection`
/// skips the join, letting connections overlap.
pub struct ManholeThread {
    should_run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    started_pid: u32,
}

impl ManholeThread {
    /// Spawns the accept loop against `socket`. Blocks until the spawned
    /// thread has signaled it is running (bounded by `config.start_timeout`),
    /// mirroring the caller's expectation that `install()` only returns
    /// once the listener is actually being serviced.
    pub fn start(socket: Arc<EndpointSocket>, config: Arc<Config>, logger: Arc<Logger>) -> Self {
        let should_run = Arc::new(AtomicBool::new(true));
        let started = Arc::new(AtomicBool::new(false));

        let loop_should_run = should_run.clone();
        let loop_started = started.clone();
        let bind_delay = config.bind_delay;
        let start_timeout = config.start_timeout;

        let handle = std::thread::Builder::new()
            .name("Manhole".to_string())
            .spawn(move || {
                set_current_thread_name("Manhole");
                loop_started.store(true, Ordering::SeqCst);

                if !bind_delay.is_zero() {
                    let _ = logger.log(&format!(
                        "Delaying UDS binding {} seconds ...",
                        bind_delay.as_secs_f64()
                    ));
                    std::thread::sleep(bind_delay);
                }

                while loop_should_run.load(Ordering::SeqCst) {
                    let _ = logger.log(&format!(
                        "Waiting for new connection (in pid:{}) ...",
                        std::process::id()
                    ));
                    match socket.listener().accept() {
                        Ok((stream, _addr)) => {
                            spawn_connection_worker(stream, config.clone(), logger.clone());
                        }
                        Err(err) => {
                            if err.kind() == std::io::ErrorKind::Interrupted {
                                continue;
                            }
                            // Shutdown (EINVAL/EBADF after `EndpointSocket::shutdown`)
                            // is the expected way this loop ends.
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn manhole accept thread");

        wait_started(&started, start_timeout);
        Self {
            should_run,
            handle: Some(handle),
            started_pid: std::process::id(),
        }
    }

    /// `true` once this thread was started by the process it's currently
    /// running in. `false` right after a `fork()`: the `Installed` state
    /// (and this handle along with it) is copied bit-for-bit into the
    /// child, but the OS thread it names only exists in the parent.
    pub fn started_in_current_process(&self) -> bool {
        self.started_pid == std::process::id()
    }

    /// Requests the loop stop after its current `accept()` unblocks.
    /// Callers must also call [`EndpointSocket::shutdown`] to actually
    /// unblock a thread parked in `accept()`.
    pub fn stop(&self) {
        self.should_run.store(false, Ordering::SeqCst);
    }

    /// Joins the worker thread, consuming self. Used during a clean
    /// `release()` after `stop()` and the socket shutdown have run.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Constructs the connection handler in a fresh worker thread, then either
/// joins it (the accept loop waits for one connection to finish before
/// accepting the next) or lets it run detached per
/// `config.daemon_connection`, allowing overlapping connections.
fn spawn_connection_worker(stream: UnixStream, config: Arc<Config>, logger: Arc<Logger>) {
    let daemon = config.daemon_connection;
    let handle = std::thread::Builder::new()
        .name("Manhole -------".to_string())
        .spawn(move || crate::connection::serve(stream, &config, &logger))
        .expect("failed to spawn manhole connection worker thread");
    if daemon {
        drop(handle);
    } else {
        let _ = handle.join();
    }
}

fn wait_started(started: &AtomicBool, timeout: Duration) {
    let deadline = std::time::Instant::now() + timeout;
    while !started.load(Ordering::SeqCst) {
        if std::time::Instant::now() >= deadline {
            break;
        }
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogDestination;
    use crate::peer_auth::StubPeerAuthenticator;

    #[test]
    fn accept_loop_serves_one_connection_then_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manhole-thread-test.sock");
        let logger = Arc::new(Logger::default());
        logger.configure(false, LogDestination::default());

        let socket = Arc::new(EndpointSocket::bind(Some(&path), 1, &logger).unwrap());
        let config = Arc::new(
            Config::builder()
                .peer_authenticator(Arc::new(StubPeerAuthenticator {
                    pid: 1,
                    uid: 0,
                    gid: 0,
                }))
                .start_timeout(Duration::from_millis(500))
                .build()
                .unwrap(),
        );

        let thread = ManholeThread::start(socket.clone(), config, logger);

        let client = UnixStream::connect(&path).unwrap();
        drop(client);

        thread.stop();
        socket.shutdown();
        thread.join();
    }
}
