// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ManholeError, Result};
use crate::evaluator::{DefaultEvaluator, Evaluator, LineExecutor, PassthroughLineExecutor};
use crate::peer_auth::{KernelPeerAuthenticator, PeerAuthenticator};

/// Where [`crate::logger::Logger`] writes its `Manhole[pid:ts]: …` lines.
///
/// The fd arm is unbuffered (a single `write(2)` per line, fork-safe); the
/// handle arm is serialized by an internal mutex. `Fd` is the crate
/// default so logging survives a fork before buffered stdio is
/// reinitialized in the child.
#[derive(Clone)]
pub enum LogDestination {
    Fd(RawFd),
    Handle(Arc<std::sync::Mutex<dyn std::io::Write + Send>>),
}

impl Default for LogDestination {
    fn default() -> Self {
        LogDestination::Fd(libc::STDERR_FILENO)
    }
}

/// Which built-in connection handler to run for an accepted, authenticated
/// client. `Custom` lets a host supply its own, matching the source's
/// `connection_handler` accepting either the `"repl"`/`"exec"` aliases or
/// an arbitrary callable.
#[derive(Clone)]
pub enum ConnectionHandlerKind {
    /// Dump stack traces, redirect stdio, hand control to an [`Evaluator`].
    Repl(Arc<dyn Evaluator>),
    /// No stdio redirection; read newline-terminated statements and run
    /// them through a [`LineExecutor`].
    Exec(Arc<dyn LineExecutor>),
    /// Caller-supplied handler taking the raw, already-authenticated
    /// stream.
    Custom(Arc<dyn Fn(std::os::unix::net::UnixStream) + Send + Sync>),
}

impl Default for ConnectionHandlerKind {
    fn default() -> Self {
        ConnectionHandlerKind::Repl(Arc::new(DefaultEvaluator::default()))
    }
}

/// Names bound into the REPL evaluator's namespace. The evaluator decides
/// how to interpret the string values; the default evaluator treats them
/// as opaque text substitutions, since `manhole` does not ship a general
/// expression engine.
pub type Locals = Vec<(String, String)>;

/// Immutable, validated configuration for one `install()` call. Build one
/// with [`ConfigBuilder`].
#[derive(Clone)]
pub struct Config {
    pub verbose: bool,
    pub log_destination: LogDestination,
    pub patch_fork: bool,
    pub socket_path: Option<PathBuf>,
    pub activate_signal: Option<i32>,
    pub oneshot_signal: Option<i32>,
    pub sigmask: Vec<i32>,
    pub start_timeout: Duration,
    pub bind_delay: Duration,
    pub reinstall_delay: Duration,
    pub locals: Locals,
    pub daemon_connection: bool,
    pub redirect_stderr: bool,
    pub connection_handler: ConnectionHandlerKind,
    pub peer_authenticator: Arc<dyn PeerAuthenticator>,
    pub strict: bool,
    pub thread: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("verbose", &self.verbose)
            .field("patch_fork", &self.patch_fork)
            .field("socket_path", &self.socket_path)
            .field("activate_signal", &self.activate_signal)
            .field("oneshot_signal", &self.oneshot_signal)
            .field("sigmask", &self.sigmask)
            .field("start_timeout", &self.start_timeout)
            .field("bind_delay", &self.bind_delay)
            .field("reinstall_delay", &self.reinstall_delay)
            .field("locals", &self.locals)
            .field("daemon_connection", &self.daemon_connection)
            .field("redirect_stderr", &self.redirect_stderr)
            .field("strict", &self.strict)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `true` when neither `activate_signal` nor `oneshot_signal` gates
    /// installation — i.e. the accept thread should start immediately.
    pub fn starts_thread_immediately(&self) -> bool {
        self.thread && self.activate_signal.is_none() && self.oneshot_signal.is_none()
    }

    /// Fork patching is disabled whenever the child couldn't safely reuse
    /// the parent's activation story.
    pub fn should_patch_fork(&self) -> bool {
        self.patch_fork
            && self.activate_signal.is_none()
            && self.oneshot_signal.is_none()
            && self.socket_path.is_none()
    }
}

pub struct ConfigBuilder {
    verbose: bool,
    log_destination: LogDestination,
    patch_fork: bool,
    socket_path: Option<PathBuf>,
    activate_signal: Option<i32>,
    oneshot_signal: Option<i32>,
    sigmask: Vec<i32>,
    start_timeout: Duration,
    bind_delay: Duration,
    reinstall_delay: Duration,
    locals: Locals,
    daemon_connection: bool,
    redirect_stderr: bool,
    connection_handler: ConnectionHandlerKind,
    peer_authenticator: Arc<dyn PeerAuthenticator>,
    strict: bool,
    thread: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            verbose: true,
            log_destination: LogDestination::default(),
            patch_fork: true,
            socket_path: None,
            activate_signal: None,
            oneshot_signal: None,
            sigmask: Vec::new(),
            start_timeout: Duration::from_millis(500),
            bind_delay: Duration::ZERO,
            reinstall_delay: Duration::from_millis(500),
            locals: Vec::new(),
            daemon_connection: false,
            redirect_stderr: true,
            connection_handler: ConnectionHandlerKind::default(),
            peer_authenticator: Arc::new(KernelPeerAuthenticator),
            strict: true,
            thread: true,
        }
    }
}

impl ConfigBuilder {
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn log_destination(mut self, destination: LogDestination) -> Self {
        self.log_destination = destination;
        self
    }

    pub fn patch_fork(mut self, patch_fork: bool) -> Self {
        self.patch_fork = patch_fork;
        self
    }

    pub fn socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    pub fn activate_signal(mut self, signum: i32) -> Self {
        self.activate_signal = Some(signum);
        self
    }

    pub fn oneshot_signal(mut self, signum: i32) -> Self {
        self.oneshot_signal = Some(signum);
        self
    }

    pub fn sigmask(mut self, signals: Vec<i32>) -> Self {
        self.sigmask = signals;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn bind_delay(mut self, delay: Duration) -> Self {
        self.bind_delay = delay;
        self
    }

    pub fn reinstall_delay(mut self, delay: Duration) -> Self {
        self.reinstall_delay = delay;
        self
    }

    pub fn locals(mut self, locals: Locals) -> Self {
        self.locals = locals;
        self
    }

    pub fn daemon_connection(mut self, daemon_connection: bool) -> Self {
        self.daemon_connection = daemon_connection;
        self
    }

    pub fn redirect_stderr(mut self, redirect_stderr: bool) -> Self {
        self.redirect_stderr = redirect_stderr;
        self
    }

    pub fn connection_handler(mut self, handler: ConnectionHandlerKind) -> Self {
        self.connection_handler = handler;
        self
    }

    pub fn exec_handler(mut self) -> Self {
        self.connection_handler =
            ConnectionHandlerKind::Exec(Arc::new(PassthroughLineExecutor::default()));
        self
    }

    pub fn peer_authenticator(mut self, authenticator: Arc<dyn PeerAuthenticator>) -> Self {
        self.peer_authenticator = authenticator;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn thread(mut self, thread: bool) -> Self {
        self.thread = thread;
        self
    }

    /// Validates and freezes the configuration. Fails with
    /// [`ManholeError::ConfigurationConflict`] when `activate_signal` and
    /// `oneshot_signal` are the same signal — each must gate a distinct
    /// entry point.
    pub fn build(self) -> Result<Config> {
        if let (Some(a), Some(o)) = (self.activate_signal, self.oneshot_signal) {
            if a == o {
                return Err(ManholeError::ConfigurationConflict);
            }
        }
        Ok(Config {
            verbose: self.verbose,
            log_destination: self.log_destination,
            patch_fork: self.patch_fork,
            socket_path: self.socket_path,
            activate_signal: self.activate_signal,
            oneshot_signal: self.oneshot_signal,
            sigmask: self.sigmask,
            start_timeout: self.start_timeout,
            bind_delay: self.bind_delay,
            reinstall_delay: self.reinstall_delay,
            locals: self.locals,
            daemon_connection: self.daemon_connection,
            redirect_stderr: self.redirect_stderr,
            connection_handler: self.connection_handler,
            peer_authenticator: self.peer_authenticator,
            strict: self.strict,
            thread: self.thread,
        })
    }
}
