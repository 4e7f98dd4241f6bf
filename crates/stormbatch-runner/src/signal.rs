//! Platform interrupt delivery.
//!
//! Unix children get `SIGINT`. Windows has no `SIGINT` for other processes.
//! Each child is started as the leader of its own process group (see
//! `launcher`) and receives a `CTRL_BREAK_EVENT` for that group, since
//! `CTRL_C_EVENT` cannot be targeted at a single group.

use std::io;

/// Ask process `pid` to interrupt itself.
///
/// Returns `Ok(false)` when the process no longer exists.
#[cfg(unix)]
pub fn interrupt(pid: u32) -> io::Result<bool> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) has no memory-safety preconditions; pid comes from a
    // Child we spawned and have not yet reaped.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::kill(pid, libc::SIGINT) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}

/// Ask process `pid` to interrupt itself.
///
/// Returns `Ok(false)` when the process no longer exists.
#[cfg(windows)]
pub fn interrupt(pid: u32) -> io::Result<bool> {
    use windows_sys::Win32::System::Console::{CTRL_BREAK_EVENT, GenerateConsoleCtrlEvent};

    // The group id of a child started with CREATE_NEW_PROCESS_GROUP is its pid.
    // SAFETY: GenerateConsoleCtrlEvent takes plain integers and touches no
    // caller memory.
    #[allow(unsafe_code)]
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(true)
    }
}

#[cfg(not(any(unix, windows)))]
pub fn interrupt(_pid: u32) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupting child processes is not supported on this platform",
    ))
}
