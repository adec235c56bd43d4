/// Configuration loading from a JSON file
use crate::config::types::{Result, SandboxConfig, SandboxError};
use std::path::Path;

impl SandboxConfig {
    /// Load configuration from a JSON file. Missing keys keep their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SandboxError::Config(format!("Failed to parse config JSON: {}", e)))
    }

    /// Load from `path` when given, otherwise fall back to the built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let config = Self::load_from_file(path)?;
                log::info!("Loaded sandbox configuration from {}", path.display());
                Ok(config)
            }
            None => {
                log::debug!("No config file given, using built-in defaults");
                Ok(Self::default())
            }
        }
    }
}
