//! chroot jail entry for native confinement.

use crate::config::types::{Result, SandboxError};
use crate::kernel::credentials::drop_to_unprivileged;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Everything the child needs to confine itself, prepared before fork so that
/// [`NativeJail::enter`] never allocates.
#[derive(Debug, Clone)]
pub struct NativeJail {
    root: CString,
    uid: u32,
    gid: u32,
}

impl NativeJail {
    pub fn new(root: &Path, uid: u32, gid: u32) -> Result<Self> {
        let root = CString::new(root.as_os_str().as_bytes())
            .map_err(|e| SandboxError::Config(format!("Invalid jail root: {}", e)))?;
        Ok(Self { root, uid, gid })
    }

    /// chroot -> chdir("/") -> drop identity. Called from `pre_exec`.
    pub fn enter(&self) -> io::Result<()> {
        // SAFETY: root is a valid NUL-terminated path owned by self.
        if unsafe { libc::chroot(self.root.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: static NUL-terminated literal.
        if unsafe { libc::chdir(c"/".as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }

        // Identity drop must follow chroot: chroot needs CAP_SYS_CHROOT.
        drop_to_unprivileged(self.uid, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_root_with_nul_byte() {
        let path = Path::new(std::ffi::OsStr::from_bytes(b"/jail\0/root"));
        assert!(NativeJail::new(path, 500, 500).is_err());
    }

    #[test]
    fn keeps_identity() {
        let jail = NativeJail::new(Path::new("/jail/readonly"), 500, 501).unwrap();
        assert_eq!(jail.root.as_bytes(), b"/jail/readonly");
        assert_eq!((jail.uid, jail.gid), (500, 501));
    }
}
