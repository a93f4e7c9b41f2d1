// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Reads the kernel-reported identity of a connected Unix-domain-socket
//! peer and decides whether the connection should be served.
//!
//! The real credential read and the accept policy sit behind a narrow
//! trait so the rejection path can be exercised in tests without a
//! second, specially-privileged process.

use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use crate::error::{ManholeError, PeerDescription};

/// The `(pid, uid, gid)` of a connected peer, as attested by the kernel.
/// Stored signed (see [`crate::error::PeerDescription`]) so a stub source
/// can represent "unknown" as `-1` uniformly across all three fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i64,
    pub uid: i64,
    pub gid: i64,
}

/// Reads and validates peer credentials for an accepted connection.
///
/// Implementations must not perform any application-level handshake:
/// credentials are read via the OS facility immediately after `accept()`,
/// with no protocol round-trip.
pub trait PeerAuthenticator: Send + Sync {
    /// Returns the raw credentials without judging them.
    fn read_credentials(&self, stream: &UnixStream) -> anyhow::Result<PeerCredentials>;

    /// Reads credentials and applies the accept policy: `uid` must be
    /// root or the process's own effective uid.
    fn check(&self, stream: &UnixStream) -> Result<PeerCredentials, ManholeError> {
        let creds = self
            .read_credentials(stream)
            .map_err(ManholeError::Other)?;
        let euid = effective_uid() as i64;
        if creds.uid != 0 && creds.uid != euid {
            return Err(ManholeError::SuspiciousClient(PeerDescription {
                pid: creds.pid,
                uid: creds.uid,
                gid: creds.gid,
            }));
        }
        Ok(creds)
    }
}

fn effective_uid() -> libc::uid_t {
    // SAFETY: geteuid() has no preconditions.
    unsafe { libc::geteuid() }
}

/// Reads real kernel peer credentials: `SO_PEERCRED` on Linux,
/// `LOCAL_PEERCRED` on macOS/FreeBSD.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelPeerAuthenticator;

#[cfg(target_os = "linux")]
impl PeerAuthenticator for KernelPeerAuthenticator {
    fn read_credentials(&self, stream: &UnixStream) -> anyhow::Result<PeerCredentials> {
        let creds = nix::sys::socket::getsockopt(stream, nix::sys::socket::sockopt::PeerCredentials)?;
        Ok(PeerCredentials {
            pid: creds.pid() as i64,
            uid: creds.uid() as i64,
            gid: creds.gid() as i64,
        })
    }
}

#[cfg(any(target_os = "macos", target_os = "freebsd"))]
impl PeerAuthenticator for KernelPeerAuthenticator {
    fn read_credentials(&self, stream: &UnixStream) -> anyhow::Result<PeerCredentials> {
        // nix does not expose LOCAL_PEERCRED directly on these targets, so
        // fall back to the raw libc getsockopt call, matching the raw
        // `struct xucred` ABI documented by the platform.
        #[repr(C)]
        struct XuCred {
            cr_version: u32,
            cr_uid: libc::uid_t,
            cr_ngroups: libc::c_short,
            cr_groups: [libc::gid_t; 16],
        }
        const LOCAL_PEERCRED: libc::c_int = 0x001;
        const SOL_LOCAL: libc::c_int = 0;

        let fd = stream.as_raw_fd();
        let mut cred: XuCred = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<XuCred>() as libc::socklen_t;
        // SAFETY: cred/len point to valid, appropriately sized storage.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                SOL_LOCAL,
                LOCAL_PEERCRED,
                &mut cred as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        anyhow::ensure!(rc == 0, "LOCAL_PEERCRED getsockopt failed");

        let mut pid: libc::pid_t = 0;
        let mut pid_len = std::mem::size_of::<libc::pid_t>() as libc::socklen_t;
        const LOCAL_PEERPID: libc::c_int = 0x002;
        // SAFETY: pid/pid_len point to valid, appropriately sized storage.
        unsafe {
            libc::getsockopt(
                fd,
                SOL_LOCAL,
                LOCAL_PEERPID,
                &mut pid as *mut _ as *mut libc::c_void,
                &mut pid_len,
            );
        }

        Ok(PeerCredentials {
            pid: pid as i64,
            uid: cred.cr_uid as i64,
            gid: cred.cr_groups.first().copied().unwrap_or(0) as i64,
        })
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "freebsd")))]
impl PeerAuthenticator for KernelPeerAuthenticator {
    fn read_credentials(&self, _stream: &UnixStream) -> anyhow::Result<PeerCredentials> {
        anyhow::bail!("peer credentials are not supported on this platform")
    }
}

/// Returns a fixed credential tuple regardless of the actual peer —
/// used to exercise the rejection path without a second, specially
/// privileged test process.
#[derive(Debug, Clone, Copy)]
pub struct StubPeerAuthenticator {
    pub pid: i64,
    pub uid: i64,
    pub gid: i64,
}

impl Default for StubPeerAuthenticator {
    fn default() -> Self {
        Self {
            pid: -1,
            uid: -1,
            gid: -1,
        }
    }
}

impl PeerAuthenticator for StubPeerAuthenticator {
    fn read_credentials(&self, _stream: &UnixStream) -> anyhow::Result<PeerCredentials> {
        Ok(PeerCredentials {
            pid: self.pid,
            uid: self.uid,
            gid: self.gid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_authenticator_is_rejected_by_default() {
        let stub = StubPeerAuthenticator::default();
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let err = stub.check(&a).unwrap_err();
        match err {
            ManholeError::SuspiciousClient(desc) => {
                assert_eq!(desc.pid, -1);
                assert_eq!(desc.uid, -1);
            }
            other => panic!("expected SuspiciousClient, got {other:?}"),
        }
    }

    #[test]
    fn stub_authenticator_accepts_root_uid() {
        let stub = StubPeerAuthenticator {
            pid: 123,
            uid: 0,
            gid: 0,
        };
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let creds = stub.check(&a).unwrap();
        assert_eq!(creds.pid, 123);
    }

    #[test]
    fn kernel_authenticator_accepts_own_euid_over_socketpair() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        let auth = KernelPeerAuthenticator;
        let creds = auth.check(&a).expect("self-connect must be trusted");
        assert_eq!(creds.uid, effective_uid() as i64);
    }
}
