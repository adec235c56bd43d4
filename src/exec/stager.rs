/// Script staging in the jail's temp directory
use crate::config::types::{Result, SandboxError};
use std::fs::{self, Permissions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempPath};

const SCRIPT_PREFIX: &str = "jailrun-";
const RANDOM_LEN: usize = 12;

/// Writes request code into uniquely named files under the jail temp dir
#[derive(Debug, Clone)]
pub struct TempFileStager {
    dir: PathBuf,
    mode: u32,
}

impl TempFileStager {
    pub fn new<P: AsRef<Path>>(dir: P, mode: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            mode,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the file exclusively, write `code` plus a trailing newline,
    /// flush, and set the mode so the sandbox identity can read it.
    pub fn stage(&self, code: &[u8]) -> Result<StagedScript> {
        let mut file = Builder::new()
            .prefix(SCRIPT_PREFIX)
            .rand_bytes(RANDOM_LEN)
            .tempfile_in(&self.dir)
            .map_err(|e| {
                SandboxError::Filesystem(format!(
                    "Failed to create script in {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;

        file.write_all(code)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        fs::set_permissions(file.path(), Permissions::from_mode(self.mode))?;

        let path = file.into_temp_path();
        let basename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SandboxError::Filesystem(format!("Unusable script name: {}", path.display()))
            })?;

        log::debug!("Staged {} bytes at {}", code.len() + 1, path.display());
        Ok(StagedScript {
            path: Some(path),
            basename,
        })
    }
}

/// A staged script. The file is removed on [`StagedScript::close`] or drop.
#[derive(Debug)]
pub struct StagedScript {
    path: Option<TempPath>,
    basename: String,
}

impl StagedScript {
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Host path, or `None` once closed
    pub fn host_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Delete the file now. Idempotent; a missing file is not an error.
    pub fn close(&mut self) -> Result<()> {
        match self.path.take() {
            Some(path) => match path.close() {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(SandboxError::Filesystem(format!(
                    "Failed to delete {}: {}",
                    self.basename, e
                ))),
            },
            None => Ok(()),
        }
    }
}
