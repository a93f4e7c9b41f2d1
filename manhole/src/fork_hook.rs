// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! Fork-aware wrappers that reinstall the manhole in a freshly forked child.
//!
//! The source this crate is modeled on monkey-patches `os.fork`/`os.forkpty`
//! at the interpreter level so any caller's fork picks up the reinstall for
//! free. Rust has no equivalent hook into `libc::fork` call sites compiled
//! elsewhere in the binary, so this crate exposes `fork_with_hook` and
//! `forkpty_with_hook` as the wrappers a host must call in place of the raw
//! primitives wherever it forks and wants the manhole to survive.

use nix::pty::{forkpty, ForkptyResult};
use nix::unistd::{fork, ForkResult, Pid};

use crate::state::ManholeState;

/// Forks the process. In the child, reinstalls the manhole (the old
/// listener fd and accept thread do not survive `fork()` in a usable
/// state) before returning, matching `patched_fork`'s behavior.
///
/// # Safety
/// Same constraints as `nix::unistd::fork`: between the fork and any
/// `exec`/`_exit` in the child, only async-signal-safe operations are
/// well-defined. The reinstall performed here spawns a new accept thread
/// and therefore is not itself async-signal-safe; callers that need a
/// strictly safe child path should not use this wrapper.
pub unsafe fn fork_with_hook(state: &ManholeState) -> nix::Result<ForkResult> {
    let result = fork()?;
    if let ForkResult::Child = result {
        state.log_fork_detected();
        state.reinstall();
    }
    Ok(result)
}

/// As [`fork_with_hook`], but for `forkpty()`. Returns the same
/// `ForkptyResult` nix would, after reinstalling in the child branch.
///
/// # Safety
/// See [`fork_with_hook`].
pub unsafe fn forkpty_with_hook(state: &ManholeState) -> nix::Result<ForkptyResult> {
    let result = forkpty(None, None)?;
    if let ForkptyResult::Child = result {
        state.log_fork_detected();
        state.reinstall();
    }
    Ok(result)
}

/// `true` when called from the child branch of a just-completed fork,
/// i.e. `pid == 0` in the POSIX convention `ForkResult` already encodes.
pub fn is_child(result: &ForkResult) -> bool {
    matches!(result, ForkResult::Child)
}

#[allow(dead_code)]
fn parent_pid(result: &ForkResult) -> Option<Pid> {
    match result {
        ForkResult::Parent { child } => Some(*child),
        ForkResult::Child => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_child_matches_fork_result_variant() {
        assert!(is_child(&ForkResult::Child));
        assert!(!is_child(&ForkResult::Parent {
            child: Pid::from_raw(123)
        }));
    }
}
