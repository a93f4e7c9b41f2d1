// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Errors that can cross the public API boundary of [`crate::install`],
/// [`crate::release`] and the peer-authentication path.
///
/// Failures that happen *inside* a connection (a bad evaluator command, an
/// I/O hiccup while serving) never reach this type: they are caught,
/// formatted and handed to the [`crate::logger::Logger`] instead, per the
/// accept-loop liveness guarantee.
#[derive(Debug, thiserror::Error)]
pub enum ManholeError {
    /// `install()` was called a second time while `strict` was requested.
    #[error("manhole already installed")]
    AlreadyInstalled,

    /// The logger was used before `install()` configured a destination.
    #[error("manhole is not installed")]
    NotInstalled,

    /// `activate_signal` and `oneshot_signal` were configured to the same
    /// signal number.
    #[error("activate_signal and oneshot_signal must differ")]
    ConfigurationConflict,

    /// A connecting peer's credentials did not satisfy the accept policy.
    #[error("SuspiciousClient: Can't accept client with {0}")]
    SuspiciousClient(PeerDescription),

    /// Wraps lower-level failures (socket setup, signal registration, …)
    /// that do not have their own named variant.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Formats as `PID:<pid> UID:<uid> GID:<gid>`, matching the diagnostic
/// string logged on a rejected connection.
///
/// Fields are signed so a stub credential source can represent "unknown"
/// uniformly as `-1`, the same sentinel a real kernel facility would never
/// return for a live peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerDescription {
    pub pid: i64,
    pub uid: i64,
    pub gid: i64,
}

impl fmt::Display for PeerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{} UID:{} GID:{}", self.pid, self.uid, self.gid)
    }
}

pub type Result<T> = std::result::Result<T, ManholeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspicious_client_message_matches_source_format() {
        let desc = PeerDescription {
            pid: -1,
            uid: -1,
            gid: -1,
        };
        let err = ManholeError::SuspiciousClient(desc);
        assert_eq!(
            err.to_string(),
            "SuspiciousClient: Can't accept client with PID:-1 UID:-1 GID:-1"
        );
    }
}
