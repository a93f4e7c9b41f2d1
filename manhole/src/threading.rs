// Copyright 2026-Present the manhole authors.
// SPDX-License-Identifier: Apache-2.0

//! OS-thread helpers that the rest of the crate uses to name and identify
//! the accept thread and per-connection workers in a way that shows up in
//! `ps -T`/`gdb`, mirroring the source's `pthread_setname_np` calls.

/// Returns a numeric identifier for the current OS thread (the kernel TID,
/// not [`std::thread::ThreadId`], which is process-local and not visible
/// to external tools).
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> i64 {
    // SAFETY: SYS_gettid has no preconditions for the calling thread.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

#[cfg(target_os = "macos")]
pub fn current_thread_id() -> i64 {
    let mut tid: u64 = 0;
    // SAFETY: pthread_threadid_np has no preconditions when pthread_t is 0
    // (current thread) and the output pointer is valid.
    unsafe { libc::pthread_threadid_np(0, &mut tid) };
    tid as i64
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn current_thread_id() -> i64 {
    0
}

/// Sets the OS-visible name of the current thread, truncated to 15 bytes
/// (the `pthread_setname_np` limit on Linux). Best-effort: failures are
/// swallowed, matching the source's `pthread_setname_np` wrapper which
/// silently no-ops when the platform doesn't support it.
pub fn set_current_thread_name(name: &str) {
    set_thread_name_impl(name);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_thread_name_impl(name: &str) {
    use std::ffi::CString;
    let truncated: String = name.chars().take(15).collect();
    if let Ok(cname) = CString::new(truncated) {
        // SAFETY: cname is a valid, NUL-terminated C string alive for the
        // duration of the call; pthread_self() is always a valid handle.
        unsafe {
            libc::pthread_setname_np(libc::pthread_self(), cname.as_ptr());
        }
    }
}

#[cfg(target_os = "macos")]
fn set_thread_name_impl(name: &str) {
    use std::ffi::CString;
    let truncated: String = name.chars().take(15).collect();
    if let Ok(cname) = CString::new(truncated) {
        // SAFETY: cname is a valid, NUL-terminated C string.
        unsafe {
            libc::pthread_setname_np(cname.as_ptr());
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
fn set_thread_name_impl(_name: &str) {}
