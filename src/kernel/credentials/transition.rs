//! UID/GID transition to the sandbox identity.
//!
//! Runs in the forked child between fork and exec, so it must stay
//! async-signal-safe: raw syscalls only, no allocation, no logging.
//!
//! CRITICAL: setresgid MUST be called BEFORE setresuid to prevent
//! privilege escalation through saved-set-user-ID.

use std::io;

/// Clear groups -> setresgid -> setresuid -> verify.
pub fn drop_to_unprivileged(uid: u32, gid: u32) -> io::Result<()> {
    clear_supplementary_groups()?;
    // CRITICAL: GID before UID
    set_gid(gid)?;
    set_uid(uid)?;
    verify_transition(uid, gid)
}

fn clear_supplementary_groups() -> io::Result<()> {
    // SAFETY: an empty group list with a null pointer is the documented way to drop all groups.
    if unsafe { libc::setgroups(0, std::ptr::null()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// MUST be called BEFORE set_uid.
fn set_gid(gid: u32) -> io::Result<()> {
    let gid = gid as libc::gid_t;
    // SAFETY: setresgid atomically sets all three GIDs.
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// MUST be called AFTER set_gid.
fn set_uid(uid: u32) -> io::Result<()> {
    let uid = uid as libc::uid_t;
    // SAFETY: setresuid atomically sets all three UIDs. Fails with EAGAIN when
    // the target uid is already over RLIMIT_NPROC.
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn verify_transition(expected_uid: u32, expected_gid: u32) -> io::Result<()> {
    // SAFETY: plain getters with no failure modes.
    let (ruid, euid, rgid, egid) =
        unsafe { (libc::getuid(), libc::geteuid(), libc::getgid(), libc::getegid()) };

    if ruid != expected_uid || euid != expected_uid || rgid != expected_gid || egid != expected_gid
    {
        return Err(io::Error::from_raw_os_error(libc::EPERM));
    }

    // Regaining root must be impossible once the drop is done.
    if unsafe { libc::setuid(0) } == 0 {
        return Err(io::Error::from_raw_os_error(libc::EPERM));
    }

    Ok(())
}
