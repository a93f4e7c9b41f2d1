// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driven entirely through the public API. Each
//! test uses its own socket path, but `install`/`release` share one
//! process-wide singleton, so tests that call them run serialized
//! through [`serialized`].

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use manhole::{Config, LogDestination, PeerAuthenticator, StubPeerAuthenticator};

/// `manhole::install`/`release` operate on one process-wide singleton, so
/// tests in this file that exercise it must not run concurrently with
/// each other even though `cargo test` defaults to a multi-threaded
/// runner within one binary.
fn serialized() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}

fn trusted_authenticator() -> Arc<dyn PeerAuthenticator> {
    Arc::new(StubPeerAuthenticator {
        pid: std::process::id() as i64,
        uid: 0,
        gid: 0,
    })
}

#[test]
fn simple_session_round_trips_print() {
    let _guard = serialized();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("simple.sock");

    let config = Config::builder()
        .socket_path(&socket_path)
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config).unwrap();

    let mut client = connect_retrying(&socket_path);
    client.write_all(b"print('FOOBAR')\n").unwrap();
    client.write_all(b"exit\n").unwrap();

    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    assert!(response.contains("ProcessID"));
    assert!(response.contains("ThreadID"));
    assert!(response.contains("FOOBAR"));
    assert!(response.contains(">>>"));

    manhole::release();
}

#[test]
fn install_release_install_round_trip_is_idempotent() {
    let _guard = serialized();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("roundtrip.sock");

    let config_a = Config::builder()
        .socket_path(&socket_path)
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config_a).unwrap();
    manhole::release();
    assert!(!socket_path.exists());

    let config_b = Config::builder()
        .socket_path(&socket_path)
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config_b).unwrap();
    assert!(socket_path.exists());

    let mut client = connect_retrying(&socket_path);
    client.write_all(b"exit\n").unwrap();
    let mut response = String::new();
    let _ = client.read_to_string(&mut response);
    assert!(response.contains(">>>"));

    manhole::release();
}

#[test]
fn auth_rejection_closes_connection_without_prompt() {
    let _guard = serialized();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("rejected.sock");

    let log: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let config = Config::builder()
        .socket_path(&socket_path)
        .log_destination(LogDestination::Handle(log.clone()))
        .peer_authenticator(Arc::new(StubPeerAuthenticator::default()))
        .build()
        .unwrap();
    manhole::install(config).unwrap();

    let mut client = connect_retrying(&socket_path);
    let mut response = Vec::new();
    let _ = client.read_to_end(&mut response);
    assert!(response.is_empty(), "rejected peer must see no prompt banner");

    manhole::release();

    let logged = String::from_utf8(log.lock().unwrap().clone()).unwrap();
    assert!(logged.contains("SuspiciousClient: Can't accept client with PID:-1 UID:-1 GID:-1"));
}

#[test]
fn activate_and_oneshot_on_the_same_signal_is_rejected() {
    let err = Config::builder()
        .activate_signal(libc::SIGUSR2)
        .oneshot_signal(libc::SIGUSR2)
        .build()
        .unwrap_err();
    assert!(matches!(err, manhole::ManholeError::ConfigurationConflict));
}

#[test]
fn stream_restoration_leaves_stdout_identity_unchanged() {
    let _guard = serialized();
    let before = manhole::streams::fd_identity(libc::STDOUT_FILENO);

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("streams.sock");
    let config = Config::builder()
        .socket_path(&socket_path)
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config).unwrap();

    let mut client = connect_retrying(&socket_path);
    client.write_all(b"print('X')\n").unwrap();
    client.write_all(b"exit\n").unwrap();
    let mut response = String::new();
    let _ = client.read_to_string(&mut response);

    manhole::release();

    let after = manhole::streams::fd_identity(libc::STDOUT_FILENO);
    assert_eq!(before, after);
}

/// Scenario 2: a forked child reinstalls onto its own pid-derived socket
/// path, leaving the parent's endpoint untouched.
#[test]
#[cfg(unix)]
fn fork_reinstalls_accept_thread_in_child() {
    let _guard = serialized();

    let config = Config::builder()
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config).unwrap();

    let parent_pid = std::process::id();
    let parent_path = manhole::socket::default_path_for_pid(parent_pid);
    assert!(parent_path.exists());

    let state = manhole::state::ManholeState::global();
    let fork_result = unsafe { manhole::fork_hook::fork_with_hook(state) }.unwrap();

    match fork_result {
        nix::unistd::ForkResult::Child => {
            let child_path = manhole::socket::default_path_for_pid(std::process::id());
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            while !child_path.exists() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            let ok = child_path.exists()
                && child_path != parent_path
                && session_round_trips_exit(&child_path);
            manhole::release();
            std::process::exit(if ok { 0 } else { 1 });
        }
        nix::unistd::ForkResult::Parent { child } => {
            let status = nix::sys::wait::waitpid(child, None).unwrap();
            assert_eq!(
                status,
                nix::sys::wait::WaitStatus::Exited(child, 0),
                "forked child failed the scenario 2 assertions: {status:?}"
            );

            assert!(parent_path.exists(), "parent's own endpoint must be unaffected");
            assert!(session_round_trips_exit(&parent_path));

            manhole::release();
        }
    }
}

/// Scenario 3: the oneshot signal serves exactly one connection on a
/// freshly bound endpoint, then removes it; a second signal opens another.
#[test]
#[cfg(unix)]
fn oneshot_signal_serves_one_connection_then_removes_socket() {
    let _guard = serialized();
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("oneshot.sock");

    let config = Config::builder()
        .socket_path(&socket_path)
        .oneshot_signal(libc::SIGUSR2)
        .peer_authenticator(trusted_authenticator())
        .build()
        .unwrap();
    manhole::install(config).unwrap();
    assert!(!socket_path.exists(), "no endpoint before the signal fires");

    raise_oneshot_and_serve(&socket_path);
    assert!(!socket_path.exists(), "oneshot endpoint removed after serving its one connection");

    raise_oneshot_and_serve(&socket_path);
    assert!(!socket_path.exists(), "a second signal opens and then removes a fresh endpoint");

    manhole::release();
}

fn raise_oneshot_and_serve(socket_path: &std::path::Path) {
    let raiser = std::thread::spawn(|| {
        // SAFETY: raises SIGUSR2 on the calling thread; the handler
        // registered for it is this crate's own `oneshot_handler`.
        unsafe {
            libc::raise(libc::SIGUSR2);
        }
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !socket_path.exists() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(session_round_trips_exit(socket_path));
    raiser.join().unwrap();
}

fn session_round_trips_exit(path: &std::path::Path) -> bool {
    let mut client = connect_retrying(path);
    if client.write_all(b"exit\n").is_err() {
        return false;
    }
    let mut response = String::new();
    let _ = client.read_to_string(&mut response);
    response.contains(">>>")
}

fn connect_retrying(path: &std::path::Path) -> UnixStream {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Ok(stream) = UnixStream::connect(path) {
            return stream;
        }
        if std::time::Instant::now() >= deadline {
            panic!("timed out connecting to {path:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
