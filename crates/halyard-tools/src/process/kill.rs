//! Terminating a spawned shell together with everything it started.

use std::time::Duration;

/// Time a process group gets to exit after the polite signal.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_millis(200);

/// Terminate the process tree rooted at `pid`, escalating to a forceful kill
/// if it is still around after [`KILL_GRACE_PERIOD`].
#[cfg(unix)]
pub(crate) async fn terminate_tree(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if let Err(e) = signal_group(pgid, libc::SIGTERM) {
        tracing::debug!(pid, error = %e, "SIGTERM to process group failed");
    }
    tokio::time::sleep(KILL_GRACE_PERIOD).await;
    if group_may_be_alive(pgid) {
        tracing::debug!(pid, "process group still alive after grace period, sending SIGKILL");
        if let Err(e) = signal_group(pgid, libc::SIGKILL) {
            tracing::debug!(pid, error = %e, "SIGKILL to process group failed");
        }
    }
}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) with a negative pid only sends a signal; no memory is touched.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Probe the group with signal 0.
///
/// Only `ESRCH` proves the group is gone. Any other failure, `EPERM`
/// included, is inconclusive and reported as alive so the caller escalates.
#[cfg(unix)]
fn group_may_be_alive(pgid: libc::pid_t) -> bool {
    match signal_group(pgid, 0) {
        Ok(()) => true,
        Err(e) => e.raw_os_error() != Some(libc::ESRCH),
    }
}

/// Windows has no process groups to signal; `taskkill /t /f` already kills
/// the whole tree forcefully.
#[cfg(windows)]
pub(crate) async fn terminate_tree(pid: u32) {
    use std::process::Stdio;

    let status = tokio::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        tracing::debug!(pid, error = %e, "taskkill failed");
    }
}
