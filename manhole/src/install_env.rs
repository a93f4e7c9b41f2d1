// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Parses the `INSTALL_ENV` bootstrap variable and drives an automatic
//! `install()` from it — the non-interactive path used by packaging hooks
//! that can set an environment variable but can't call a Rust function
//! directly before `main()` runs.
//!
//! Format: semicolon-separated `key=value` pairs, e.g.
//! `activate_signal=USR2;verbose=false;socket_path=/tmp/app.sock`.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, ConfigBuilder};
use crate::error::Result;
use crate::peer_auth::KernelPeerAuthenticator;
use crate::signals::signal_number_from_name;
use crate::state::ManholeState;

pub const INSTALL_ENV_VAR: &str = "INSTALL_ENV";

/// Reads `INSTALL_ENV` and installs a manhole from it, if the variable is
/// set and non-empty. Returns `Ok(false)` when the variable is absent.
pub fn bootstrap_from_env() -> Result<bool> {
    match std::env::var(INSTALL_ENV_VAR) {
        Ok(value) if !value.trim().is_empty() => {
            let config = parse_install_env(&value)?;
            ManholeState::global().install(config)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn parse_install_env(raw: &str) -> Result<Config> {
    let mut builder = Config::builder().peer_authenticator(Arc::new(KernelPeerAuthenticator));
    for pair in raw.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        builder = apply_option(builder, key.trim(), value.trim());
    }
    builder.build()
}

fn apply_option(builder: ConfigBuilder, key: &str, value: &str) -> ConfigBuilder {
    match key {
        "verbose" => builder.verbose(parse_bool(value)),
        "patch_fork" => builder.patch_fork(parse_bool(value)),
        "thread" => builder.thread(parse_bool(value)),
        "strict" => builder.strict(parse_bool(value)),
        "daemon_connection" => builder.daemon_connection(parse_bool(value)),
        "redirect_stderr" => builder.redirect_stderr(parse_bool(value)),
        "socket_path" => builder.socket_path(value),
        "activate_signal" => match signal_number_from_name(value) {
            Some(signum) => builder.activate_signal(signum),
            None => builder,
        },
        "oneshot_signal" => match signal_number_from_name(value) {
            Some(signum) => builder.oneshot_signal(signum),
            None => builder,
        },
        "start_timeout" => match parse_secs(value) {
            Some(d) => builder_with_start_timeout(builder, d),
            None => builder,
        },
        "bind_delay" => match parse_secs(value) {
            Some(d) => builder_with_bind_delay(builder, d),
            None => builder,
        },
        "reinstall_delay" => match parse_secs(value) {
            Some(d) => builder_with_reinstall_delay(builder, d),
            None => builder,
        },
        _ => builder,
    }
}

fn builder_with_start_timeout(builder: ConfigBuilder, d: Duration) -> ConfigBuilder {
    builder.start_timeout(d)
}

fn builder_with_bind_delay(builder: ConfigBuilder, d: Duration) -> ConfigBuilder {
    builder.bind_delay(d)
}

fn builder_with_reinstall_delay(builder: ConfigBuilder, d: Duration) -> ConfigBuilder {
    builder.reinstall_delay(d)
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_secs(value: &str) -> Option<Duration> {
    value.parse::<f64>().ok().map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boolean_and_signal_options() {
        let config = parse_install_env("verbose=false;activate_signal=USR2;thread=true").unwrap();
        assert!(!config.verbose);
        assert_eq!(config.activate_signal, Some(libc::SIGUSR2));
    }

    #[test]
    fn ignores_unknown_and_malformed_entries() {
        let config = parse_install_env("bogus;also_bogus=;socket_path=/tmp/x.sock").unwrap();
        assert_eq!(config.socket_path, Some(std::path::PathBuf::from("/tmp/x.sock")));
    }

    #[test]
    fn conflicting_signals_are_rejected_at_build_time() {
        let err = parse_install_env("activate_signal=USR1;oneshot_signal=USR1").unwrap_err();
        assert!(matches!(err, crate::error::ManholeError::ConfigurationConflict));
    }
}
