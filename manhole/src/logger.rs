// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Fail-silent diagnostic sink for the crate's own internal messages.
//!
//! This is the one logging surface in the crate that must *not* be swapped
//! for a generic facade: end-to-end tests assert on the literal line
//! format it produces.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use crate::config::LogDestination;
use crate::error::{ManholeError, Result};

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Internal state behind the crate-wide logger. `None` destination means
/// "not installed yet": `log()` fails with `NotInstalled`.
struct LoggerState {
    enabled: bool,
    destination: Option<LogDestination>,
}

/// The fail-silent logger shared by every installed manhole.
///
/// `enabled=false` makes `log()` a no-op; with no destination configured,
/// `log()` returns [`ManholeError::NotInstalled`]. Any I/O or formatting
/// failure while writing is swallowed, never propagated.
pub struct Logger {
    state: std::sync::Mutex<LoggerState>,
}

impl Default for Logger {
    fn default() -> Self {
        Self {
            state: std::sync::Mutex::new(LoggerState {
                enabled: true,
                destination: None,
            }),
        }
    }
}

impl Logger {
    pub fn configure(&self, enabled: bool, destination: LogDestination) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.enabled = enabled;
        state.destination = Some(destination);
    }

    pub fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.enabled = true;
        state.destination = None;
    }

    /// Writes `Manhole[<pid>:<elapsed-seconds.4digits>]: <message>\n`.
    ///
    /// The fd arm performs a single unbuffered `write(2)`, safe to call
    /// from a post-fork child before any buffered stdio is reinitialized.
    /// The handle arm serializes writers with `self.state`'s mutex so
    /// concurrent calls don't interleave.
    pub fn log(&self, message: &str) -> Result<()> {
        let (enabled, destination) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.enabled, state.destination.clone())
        };
        if !enabled {
            return Ok(());
        }
        let destination = destination.ok_or(ManholeError::NotInstalled)?;

        let pid = std::process::id();
        let elapsed = process_start().elapsed().as_secs_f64();
        let line = format!("Manhole[{pid}:{elapsed:.4}]: {message}\n");

        match destination {
            LogDestination::Fd(fd) => {
                // A single write(2); failures are intentionally ignored.
                let bytes = line.as_bytes();
                // SAFETY: bytes is a valid slice for its own length; fd is
                // caller-provided and write() reports errors via errno,
                // which we discard per the fail-silent contract.
                unsafe {
                    libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
                }
            }
            LogDestination::Handle(handle) => {
                if let Ok(mut guard) = handle.lock() {
                    let _ = guard.write_all(line.as_bytes());
                    let _ = guard.flush();
                }
            }
        }
        Ok(())
    }
}
