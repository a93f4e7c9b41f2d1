// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Client for connecting to an installed manhole's Unix-domain socket.

use std::io::{BufRead, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

const HISTORY_FILE_NAME: &str = ".manhole_history";
const CONNECT_FAILURE_EXIT_CODE: i32 = 5;

#[derive(Parser, Debug)]
#[command(about = "Connect to a manhole.")]
struct Cli {
    /// A numerical process id, a path in the form /tmp/manhole-1234, or a
    /// raw socket path.
    target: String,

    /// Timeout to use, in seconds.
    #[arg(short = 't', long = "timeout", default_value_t = 1.0)]
    timeout: f64,

    /// Send USR1 to the process before connecting.
    #[arg(short = '1', group = "signal_flag")]
    usr1: bool,

    /// Send USR2 to the process before connecting.
    #[arg(short = '2', group = "signal_flag")]
    usr2: bool,

    /// Send the given signal (name or number) to the process before connecting.
    #[arg(short = 's', long = "signal", group = "signal_flag")]
    signal: Option<String>,
}

enum Target {
    Pid(i32),
    Path(PathBuf),
}

fn parse_target(value: &str) -> Target {
    let digits = value
        .strip_prefix("/tmp/manhole-")
        .unwrap_or(value);
    match digits.parse::<i32>() {
        Ok(pid) if digits == value || value.starts_with("/tmp/manhole-") => Target::Pid(pid),
        _ => Target::Path(PathBuf::from(value)),
    }
}

fn resolve_signal(cli: &Cli) -> Option<i32> {
    if cli.usr1 {
        return Some(libc::SIGUSR1);
    }
    if cli.usr2 {
        return Some(libc::SIGUSR2);
    }
    cli.signal
        .as_deref()
        .and_then(manhole::signals::signal_number_from_name)
}

fn main() {
    let cli = Cli::parse();
    let history_path = history_file_path();
    let mut history = load_history(&history_path);

    let target = parse_target(&cli.target);
    if let Some(signum) = resolve_signal(&cli) {
        if let Target::Pid(pid) = target {
            // SAFETY: kill(2) with a validated pid and signal number.
            unsafe {
                libc::kill(pid, signum);
            }
        } else {
            eprintln!("Cannot send a signal to a raw socket path target.");
        }
    }

    let socket_path = match &target {
        Target::Pid(pid) => PathBuf::from(format!("/tmp/manhole-{pid}")),
        Target::Path(path) => path.clone(),
    };

    let timeout = Duration::from_secs_f64(cli.timeout);
    let stream = match connect_with_timeout(&socket_path, timeout) {
        Some(stream) => stream,
        None => {
            eprintln!("Failed to connect to {:?}: Timeout", socket_path);
            std::process::exit(CONNECT_FAILURE_EXIT_CODE);
        }
    };

    run_session(stream, timeout, &mut history);
    save_history(&history_path, &history);
}

fn connect_with_timeout(path: &Path, timeout: Duration) -> Option<UnixStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return Some(stream),
            Err(err) => {
                let transient = matches!(
                    err.raw_os_error(),
                    Some(libc::ENOENT) | Some(libc::ECONNREFUSED)
                );
                if !transient {
                    eprintln!("Failed to connect to {path:?}: {err}");
                }
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Bridges the terminal and the socket: a reader thread prints incoming
/// bytes while the main thread reads operator lines and forwards them,
/// newline-terminated, until the peer disconnects or the operator hits EOF.
fn run_session(stream: UnixStream, timeout: Duration, history: &mut Vec<String>) {
    let reader_stream = stream.try_clone().expect("unix stream clone");
    let alive = Arc::new(AtomicBool::new(true));
    let reader_alive = alive.clone();

    let reader = std::thread::spawn(move || {
        let mut socket = reader_stream;
        let mut buf = [0u8; 64 * 1024];
        loop {
            match socket.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = std::io::stdout().write_all(&buf[..n]);
                    let _ = std::io::stdout().flush();
                }
            }
        }
        reader_alive.store(false, Ordering::SeqCst);
    });

    let mut writer = stream;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if !alive.load(Ordering::SeqCst) {
            break;
        }
        let Ok(line) = line else { break };
        if writer.write_all(line.as_bytes()).is_err() {
            break;
        }
        if writer.write_all(b"\n").is_err() {
            break;
        }
        history.push(line);
    }

    // Give the reader a final window to drain anything already in flight
    // before tearing the connection down.
    let drain_deadline = Instant::now() + timeout;
    while alive.load(Ordering::SeqCst) && Instant::now() < drain_deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    let _ = reader.join();
}

fn history_file_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(HISTORY_FILE_NAME)
}

fn load_history(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|contents| contents.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

fn save_history(path: &Path, history: &[String]) {
    if let Ok(mut file) = std::fs::File::create(path) {
        let _ = file.write_all(history.join("\n").as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numeric_pid() {
        assert!(matches!(parse_target("1234"), Target::Pid(1234)));
    }

    #[test]
    fn parses_manhole_path_form() {
        assert!(matches!(parse_target("/tmp/manhole-5678"), Target::Pid(5678)));
    }

    #[test]
    fn treats_other_paths_as_raw_socket_paths() {
        assert!(matches!(
            parse_target("/var/run/app.sock"),
            Target::Path(_)
        ));
    }
}
