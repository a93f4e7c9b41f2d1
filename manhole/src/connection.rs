// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Handles one accepted, credential-checked client connection.

use std::io::{BufReader, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use crate::config::{Config, ConnectionHandlerKind};
use crate::logger::Logger;
use crate::peer_auth::PeerAuthenticator;
use crate::streams::with_streams;
use crate::threading::set_current_thread_name;

/// Runs credential checking and the configured handler for one client.
///
/// Mirrors the name given to the per-connection worker before credentials
/// are known ("Manhole -------") and after ("Manhole < PID:<pid>"), purely
/// as an operational aid visible in `ps`/`top`.
pub fn serve(stream: UnixStream, config: &Config, logger: &Logger) {
    set_current_thread_name("Manhole -------");
    let _ = logger.log("Started connection thread. Checking credentials ...");

    let creds = match config.peer_authenticator.check(&stream) {
        Ok(creds) => creds,
        Err(err) => {
            let _ = logger.log(&format!("{err}"));
            return;
        }
    };
    set_current_thread_name(&format!("Manhole < PID:{}", creds.pid));
    let _ = logger.log(&format!(
        "Accepted connection on fd:{} from PID:{} UID:{} GID:{}",
        stream.as_raw_fd(),
        creds.pid,
        creds.uid,
        creds.gid
    ));

    match &config.connection_handler {
        ConnectionHandlerKind::Repl(evaluator) => {
            run_repl(stream, config.redirect_stderr, evaluator.clone(), &config.locals, logger)
        }
        ConnectionHandlerKind::Exec(executor) => run_exec(stream, executor.clone(), logger),
        ConnectionHandlerKind::Custom(handler) => handler(stream),
    }
}

fn run_repl(
    stream: UnixStream,
    redirect_stderr: bool,
    evaluator: Arc<dyn crate::evaluator::Evaluator>,
    locals: &crate::config::Locals,
    logger: &Logger,
) {
    let client_fd = stream.as_raw_fd();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        with_streams(client_fd, redirect_stderr, || {
            use std::os::unix::io::FromRawFd;
            crate::dump_current_stacktrace(redirect_stderr);
            let input_fd = nix::unistd::dup(client_fd).unwrap_or(client_fd);
            let output_fd = nix::unistd::dup(client_fd).unwrap_or(client_fd);
            let mut input = BufReader::new(unsafe { std::fs::File::from_raw_fd(input_fd) });
            let mut output = unsafe { std::fs::File::from_raw_fd(output_fd) };
            evaluator.run(&mut input, &mut output, locals);
            let _ = output.flush();
            let _ = logger.log("DONE.");
        })
    }));
    if result.is_err() {
        let _ = logger.log("REPL session panicked");
    }
    drop(stream);
    let _ = logger.log("Cleaned up.");
}

fn run_exec(stream: UnixStream, executor: Arc<dyn crate::evaluator::LineExecutor>, logger: &Logger) {
    use std::io::BufRead;
    let reader_stream = match stream.try_clone() {
        Ok(cloned) => cloned,
        Err(_) => return,
    };
    let mut reader = BufReader::new(reader_stream);
    let mut writer = stream;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']);
                executor.execute(trimmed, &mut writer);
            }
        }
    }
    let _ = logger.log("DONE.");
}
