// Platform process attributes and termination
// reason: nix for signals/fd plumbing on Unix (same stack as graceful kill)

use std::fs::File;
use std::io;

use tokio::process::Command;

use execport_core::domain::SysProcAttr;

/// Apply process attributes and extra inherited files to `command`
///
/// Extra file `i` appears in the child as descriptor `3 + i`.
#[cfg(unix)]
pub fn apply(command: &mut Command, attr: &SysProcAttr, extra_files: &[File]) -> io::Result<()> {
    use std::os::unix::io::{AsRawFd, RawFd};

    if let Some(uid) = attr.uid {
        command.uid(uid);
    }
    if let Some(gid) = attr.gid {
        command.gid(gid);
    }
    if let Some(pgid) = attr.process_group {
        command.process_group(pgid);
    }

    if !attr.setsid && extra_files.is_empty() {
        return Ok(());
    }

    let setsid = attr.setsid;
    let mut fds: Vec<RawFd> = extra_files.iter().map(AsRawFd::as_raw_fd).collect();

    // SAFETY: the hook runs between fork and exec and only makes
    // async-signal-safe calls (setsid, fcntl, dup2); `fds` is allocated
    // before the fork and only mutated in place.
    unsafe {
        command.pre_exec(move || {
            if setsid {
                nix::unistd::setsid().map_err(io::Error::from)?;
            }
            remap_fds(&mut fds)
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply(_command: &mut Command, attr: &SysProcAttr, extra_files: &[File]) -> io::Result<()> {
    if attr.is_default() && extra_files.is_empty() {
        return Ok(());
    }
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process attributes and extra files are only supported on Unix",
    ))
}

/// Move `fds` onto descriptors 3, 4, ... in the child
#[cfg(unix)]
fn remap_fds(fds: &mut [std::os::unix::io::RawFd]) -> io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg};
    use nix::unistd::dup2;

    let first_free = 3 + fds.len() as i32;

    // Sources sitting inside the target range would be clobbered by dup2
    for fd in fds.iter_mut() {
        if *fd < first_free {
            *fd = fcntl(*fd, FcntlArg::F_DUPFD_CLOEXEC(first_free)).map_err(io::Error::from)?;
        }
    }
    for (i, fd) in fds.iter().enumerate() {
        dup2(*fd, 3 + i as i32).map_err(io::Error::from)?;
    }
    Ok(())
}

/// Ask the process to exit (SIGTERM)
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    send_signal(pid, nix::sys::signal::Signal::SIGTERM)
}

/// Kill the process outright (SIGKILL)
#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    send_signal(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), signal) {
        // Already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination is not supported on this platform",
    ))
}
