/// Host-clean verification for the jail temp directory
use crate::config::types::{Result, SandboxError};
use log::{error, info};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Entries of the jail temp directory captured before a request
pub struct TempDirBaseline {
    dir: PathBuf,
    entries: BTreeSet<String>,
}

impl TempDirBaseline {
    pub fn capture<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = list_entries(&dir)?;
        Ok(Self { dir, entries })
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries present now that were not in the baseline
    pub fn residue(&self) -> Result<Vec<String>> {
        Ok(list_entries(&self.dir)?
            .into_iter()
            .filter(|name| !self.entries.contains(name))
            .collect())
    }

    /// Fails when anything was left behind
    pub fn verify(&self) -> Result<()> {
        let residue = self.residue()?;
        if !residue.is_empty() {
            error!(
                "Residue in {} after request: {:?}",
                self.dir.display(),
                residue
            );
            return Err(SandboxError::Filesystem(format!(
                "Temp baseline violated: {} leftover entries",
                residue.len()
            )));
        }

        info!("Temp baseline verification passed");
        Ok(())
    }
}

fn list_entries(dir: &Path) -> Result<BTreeSet<String>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        SandboxError::Filesystem(format!("Failed to read {}: {}", dir.display(), e))
    })?;
    Ok(entries
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect())
}
