//! Credential validation logic.

use crate::config::types::{Result, SandboxError};

/// Reject root UIDs/GIDs (0) as the sandbox identity.
pub fn validate_ids(uid: u32, gid: u32) -> Result<()> {
    if uid == 0 || gid == 0 {
        return Err(SandboxError::Privilege(format!(
            "Cannot run untrusted code as root UID/GID (uid={}, gid={})",
            uid, gid
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_ids_rejects_root_uid() {
        assert!(validate_ids(0, 1000).is_err());
    }

    #[test]
    fn validate_ids_rejects_root_gid() {
        assert!(validate_ids(1000, 0).is_err());
    }

    #[test]
    fn validate_ids_accepts_non_root() {
        assert!(validate_ids(500, 500).is_ok());
    }
}
