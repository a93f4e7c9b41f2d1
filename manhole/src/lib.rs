// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! An in-process debugging endpoint: install it in a running process and
//! connect to a Unix-domain socket to get an interactive session inside
//! that process, with the redirected stdio of a real REPL.

pub mod config;
pub mod connection;
pub mod error;
pub mod evaluator;
pub mod fork_hook;
pub mod install_env;
pub mod logger;
pub mod peer_auth;
pub mod signal_router;
pub mod signals;
pub mod socket;
pub mod state;
pub mod streams;
pub mod thread;
pub mod threading;

pub use config::{Config, ConfigBuilder, ConnectionHandlerKind, LogDestination, Locals};
pub use error::{ManholeError, PeerDescription, Result};
pub use evaluator::{DefaultEvaluator, Evaluator, LineExecutor, PassthroughLineExecutor};
pub use peer_auth::{KernelPeerAuthenticator, PeerAuthenticator, PeerCredentials, StubPeerAuthenticator};

use state::ManholeState;

/// Installs a manhole with the given configuration. This is the crate's
/// single public entry point for bringing one up.
///
/// Fails with [`ManholeError::AlreadyInstalled`] if one is already
/// running and `config.strict` is `true`; otherwise the previous
/// installation is released first and this one replaces it.
pub fn install(config: Config) -> Result<()> {
    ManholeState::global().install(config)
}

/// Tears down the active installation, if any: stops the accept thread,
/// unlinks the socket, restores signal handlers and `fork` hooks. A no-op
/// if nothing is installed.
pub fn release() {
    ManholeState::global().release()
}

/// Writes the calling thread's backtrace to the logger, framed the same
/// way the source's multi-thread stack dump is framed.
///
/// Rust cannot, unlike an interpreter with a GIL, enumerate every other
/// live thread's call stack without each thread cooperating (there is no
/// analogue of walking `sys._current_frames()`); hosts that want a full
/// multi-thread dump must register their threads so a handler running
/// inside a REPL session can ask each one to contribute its own capture
/// through a cooperative mechanism the host controls. This function
/// captures only the thread it runs on, typically the accept/connection
/// thread handling the active session.
pub fn dump_current_stacktrace(redirect_stderr: bool) {
    let backtrace = std::backtrace::Backtrace::force_capture();
    let pid = std::process::id();
    let thread_id = threading::current_thread_id();
    let banner = format!(
        "\n######### ProcessID={pid}, ThreadID={thread_id} #########\n{backtrace}\n#############################################\n"
    );
    if redirect_stderr {
        eprint!("{banner}");
    } else {
        print!("{banner}");
    }
}

/// Bootstraps an installation from the `INSTALL_ENV` environment variable,
/// if present. Intended to be called once, early in a host's startup path.
pub fn bootstrap_from_env() -> Result<bool> {
    install_env::bootstrap_from_env()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_auth::StubPeerAuthenticator;
    use std::sync::Arc;

    #[test]
    fn install_and_release_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .socket_path(dir.path().join("lib-test.sock"))
            .thread(false)
            .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
            .build()
            .unwrap();
        install(config).unwrap();
        release();
    }
}
