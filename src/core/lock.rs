//! OS-level advisory locking of backing files
//!
//! The persisted lock flag in the root block is only inspected while this
//! lock is held, which closes the read-then-write race between two processes
//! opening the same volume.

use crate::core::error::Result;
use std::fs::File;

/// Try to take an exclusive `flock` without blocking
///
/// Returns `Ok(false)` when another open file description holds the lock.
#[cfg(unix)]
pub fn try_lock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays valid for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }

    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        tracing::debug!("flock held by another open description");
        return Ok(false);
    }
    Err(err.into())
}

#[cfg(unix)]
pub fn unlock(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays valid for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Without `flock` the persisted flag is the only guard.
#[cfg(not(unix))]
pub fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
pub fn unlock(_file: &File) -> Result<()> {
    Ok(())
}
