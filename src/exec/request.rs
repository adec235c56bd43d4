/// Execution requests and the checks performed before one is accepted
use crate::config::types::{RuntimeVersion, UnsupportedVersion};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of work: untrusted code and the runtime to run it with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: Vec<u8>,
    pub runtime_version: RuntimeVersion,
    /// Replaces the internal script path in output; the configured default
    /// applies when absent
    pub display_name: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("ruby version is not specified")]
    MissingVersion,

    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),
}

impl ExecutionRequest {
    pub fn new(code: impl Into<Vec<u8>>, runtime_version: RuntimeVersion) -> Self {
        Self {
            code: code.into(),
            runtime_version,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Build a request from loosely typed parameters.
    ///
    /// Version problems are rejected even when code is absent. Absent code is
    /// `Ok(None)`: nothing to run, and the caller answers with empty output.
    /// A blank name counts as absent.
    pub fn from_params(
        code: Option<&str>,
        version: Option<&str>,
        name: Option<&str>,
    ) -> Result<Option<Self>, RequestError> {
        let version = match version {
            Some(v) if !v.is_empty() => v.parse::<RuntimeVersion>()?,
            _ => return Err(RequestError::MissingVersion),
        };

        let Some(code) = code else {
            return Ok(None);
        };

        let display_name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        Ok(Some(Self {
            code: code.as_bytes().to_vec(),
            runtime_version: version,
            display_name,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_params_builds_request() {
        let request = ExecutionRequest::from_params(Some("puts 1"), Some("1.9.3"), Some("a.rb"))
            .unwrap()
            .unwrap();
        assert_eq!(request.code, b"puts 1");
        assert_eq!(request.runtime_version, RuntimeVersion::V1_9_3);
        assert_eq!(request.display_name.as_deref(), Some("a.rb"));
    }

    #[test]
    fn missing_or_empty_version_is_rejected() {
        assert_eq!(
            ExecutionRequest::from_params(Some("x"), None, None),
            Err(RequestError::MissingVersion)
        );
        assert_eq!(
            ExecutionRequest::from_params(Some("x"), Some(""), None),
            Err(RequestError::MissingVersion)
        );
    }

    #[test]
    fn padded_version_is_not_accepted() {
        assert_eq!(
            ExecutionRequest::from_params(Some("x"), Some("1.9.3 "), None),
            Err(RequestError::UnsupportedVersion(UnsupportedVersion(
                "1.9.3 ".to_string()
            )))
        );
    }

    #[test]
    fn unsupported_version_is_rejected_before_code_check() {
        let err = ExecutionRequest::from_params(None, Some("3.3.0"), None).unwrap_err();
        assert_eq!(err.to_string(), "ruby 3.3.0 is not available");
    }

    #[test]
    fn missing_code_means_nothing_to_run() {
        assert_eq!(
            ExecutionRequest::from_params(None, Some("1.8.7"), None),
            Ok(None)
        );
    }

    #[test]
    fn blank_name_falls_back_to_default() {
        let request = ExecutionRequest::from_params(Some(""), Some("1.8.6"), Some(" "))
            .unwrap()
            .unwrap();
        assert_eq!(request.display_name, None);
        assert!(request.code.is_empty());
    }
}
