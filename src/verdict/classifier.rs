/// Failure classification
///
/// Every failure, whichever stage produced it, collapses into one of three
/// kinds. The caller sees only the kind and a fixed short message; the detail
/// stays in the server log.
use serde::Serialize;
use std::fmt;

/// Closed failure taxonomy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Timeout,
    ResourceExhausted,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::ResourceExhausted => write!(f, "ResourceExhausted"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// What went wrong, as observed by the executor
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservedFailure {
    /// The deadline elapsed before the process finished
    DeadlineElapsed,
    /// The host refused to create a process (spawn status or output marker)
    HostExhausted(String),
    /// Combined output reached the byte ceiling
    OutputCeiling,
    /// Any other failure; the string is log-only detail
    Internal(String),
}

impl fmt::Display for ObservedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedFailure::DeadlineElapsed => write!(f, "deadline elapsed"),
            ObservedFailure::HostExhausted(detail) => write!(f, "host exhausted: {}", detail),
            ObservedFailure::OutputCeiling => write!(f, "output ceiling reached"),
            ObservedFailure::Internal(detail) => write!(f, "internal: {}", detail),
        }
    }
}

/// Classified failure ready to hand back to the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Sanitized `<Kind> message` text
    pub message: String,
}

pub struct ErrorClassifier {
    max_output: usize,
    exhaustion_markers: Vec<String>,
}

impl ErrorClassifier {
    pub fn new(max_output: usize, exhaustion_markers: Vec<String>) -> Self {
        Self {
            max_output,
            exhaustion_markers,
        }
    }

    /// Inspect the output of a naturally completed run for a failure signal.
    pub fn detect(&self, output: &[u8]) -> Option<ObservedFailure> {
        if let Some(marker) = self.find_marker(output) {
            return Some(ObservedFailure::HostExhausted(format!(
                "output contains {:?}",
                marker
            )));
        }
        if output.len() >= self.max_output {
            return Some(ObservedFailure::OutputCeiling);
        }
        None
    }

    /// Map a failure to its kind. Precedence: deadline, then exhaustion or
    /// ceiling (from the failure itself or from the output), then unknown.
    pub fn classify(&self, failure: &ObservedFailure, output: &[u8]) -> ErrorKind {
        match failure {
            ObservedFailure::DeadlineElapsed => ErrorKind::Timeout,
            ObservedFailure::HostExhausted(_) | ObservedFailure::OutputCeiling => {
                ErrorKind::ResourceExhausted
            }
            ObservedFailure::Internal(_) => {
                if self.detect(output).is_some() {
                    ErrorKind::ResourceExhausted
                } else {
                    ErrorKind::Unknown
                }
            }
        }
    }

    /// Classify and render the caller-facing message. Logs the full detail.
    pub fn classification(&self, failure: &ObservedFailure, output: &[u8]) -> Classification {
        let kind = self.classify(failure, output);
        match kind {
            ErrorKind::Unknown => log::error!("Unknown execution failure: {}", failure),
            _ => log::info!("Execution failed with {}: {}", kind, failure),
        }

        let text = match (kind, failure) {
            (ErrorKind::Timeout, _) => "execution expired.".to_string(),
            (ErrorKind::ResourceExhausted, ObservedFailure::OutputCeiling) => {
                format!("result data is over than {} byte.", self.max_output)
            }
            (ErrorKind::ResourceExhausted, _) => "resource is unavailable.".to_string(),
            (ErrorKind::Unknown, _) => "fatal error occurred.".to_string(),
        };

        Classification {
            kind,
            message: format!("<{}> {}", kind, text),
        }
    }

    fn find_marker(&self, output: &[u8]) -> Option<&str> {
        self.exhaustion_markers
            .iter()
            .filter(|marker| !marker.is_empty())
            .find(|marker| contains(output, marker.as_bytes()))
            .map(String::as_str)
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
