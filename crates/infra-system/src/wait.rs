// Reaping one specific child together with its own resource usage
// reason: wait4 reports per-child rusage; tokio's wait reports none and
// getrusage(RUSAGE_CHILDREN) mixes every reaped child of this process

#![cfg(unix)]

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use execport_core::domain::ResourceUsage;

/// Block until `pid` exits, reap it, and return its status and CPU time
///
/// Run on a blocking thread (`tokio::task::spawn_blocking`).
pub fn wait_pid(pid: u32) -> io::Result<(ExitStatus, ResourceUsage)> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; all-zero is a valid value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        // SAFETY: both out-pointers reference live locals for the whole call
        let rc = unsafe { libc::wait4(pid as libc::pid_t, &mut status, 0, &mut usage) };
        if rc >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    Ok((
        ExitStatus::from_raw(status),
        ResourceUsage {
            user_time: duration(usage.ru_utime),
            system_time: duration(usage.ru_stime),
        },
    ))
}

fn duration(tv: libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
}
