//! Signals to a child's whole process group.
//!
//! Children start in their own group (pgid == pid), so helper processes the tool
//! spawns (ffmpeg) are stopped, continued and killed together with it.

#[cfg(unix)]
fn send_to_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) with a negative pid only signals that group; no memory is touched.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc != 0 {
        tracing::debug!(
            pid,
            signal,
            "group signal failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Cooperative termination. Continues the group too, so a stopped group sees it.
#[cfg(unix)]
pub(super) fn terminate_group(pid: u32) {
    send_to_group(pid, libc::SIGTERM);
    send_to_group(pid, libc::SIGCONT);
}

#[cfg(unix)]
pub(super) fn kill_group(pid: u32) {
    send_to_group(pid, libc::SIGKILL);
}

/// Pauses the group while a file conflict waits for a decision.
#[cfg(unix)]
pub(super) fn stop_group(pid: u32) {
    send_to_group(pid, libc::SIGSTOP);
}

#[cfg(unix)]
pub(super) fn continue_group(pid: u32) {
    send_to_group(pid, libc::SIGCONT);
}

#[cfg(not(unix))]
pub(super) fn terminate_group(_pid: u32) {}

#[cfg(not(unix))]
pub(super) fn kill_group(_pid: u32) {}

#[cfg(not(unix))]
pub(super) fn stop_group(_pid: u32) {}

#[cfg(not(unix))]
pub(super) fn continue_group(_pid: u32) {}
