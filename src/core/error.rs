//! DP-007: Error taxonomy.
//!
//! Step-level failures are data (`ErrorInfo` carrying an `ErrorKind`) so the
//! retry evaluator can branch on them. Run-level failures that prevent the
//! engine from producing an audit trail are `EngineError`s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Structural recipe defect, detected before execution.
    Validation,
    /// A `${name}` placeholder had no binding.
    UnresolvedVariable,
    ElementNotFound,
    WindowNotFound,
    FileNotFound,
    PermissionDenied,
    /// OCR ran but produced no text.
    OcrEmpty,
    ProcessFailed,
    Io,
    /// No backend can perform the action on this host.
    Unsupported,
    /// Any other provider-reported failure.
    Provider,
    TimeoutExceeded,
    VerificationFailure,
    Cancelled,
}

impl ErrorKind {
    /// Whether a failed attempt with this kind may be retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::UnresolvedVariable
                | Self::ElementNotFound
                | Self::WindowNotFound
                | Self::FileNotFound
                | Self::OcrEmpty
                | Self::ProcessFailed
                | Self::Io
                | Self::Provider
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::UnresolvedVariable => "unresolved_variable",
            Self::ElementNotFound => "element_not_found",
            Self::WindowNotFound => "window_not_found",
            Self::FileNotFound => "file_not_found",
            Self::PermissionDenied => "permission_denied",
            Self::OcrEmpty => "ocr_empty",
            Self::ProcessFailed => "process_failed",
            Self::Io => "io",
            Self::Unsupported => "unsupported",
            Self::Provider => "provider",
            Self::TimeoutExceeded => "timeout_exceeded",
            Self::VerificationFailure => "verification_failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step failure as recorded in results and log events.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map an I/O error onto the step taxonomy.
    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Io,
        };
        Self::new(kind, format!("{}: {}", context, err))
    }
}

/// Failures that stop the engine itself rather than a single step.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("recipe parse error: {0}")]
    Parse(String),

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("event log error: {0}")]
    Log(String),

    #[error("artifact capture failed: {0}")]
    Artifact(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dp007_retryable_kinds() {
        assert!(ErrorKind::UnresolvedVariable.is_retryable());
        assert!(ErrorKind::ElementNotFound.is_retryable());
        assert!(ErrorKind::ProcessFailed.is_retryable());
        assert!(!ErrorKind::TimeoutExceeded.is_retryable());
        assert!(!ErrorKind::VerificationFailure.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Unsupported.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_dp007_error_info_display() {
        let e = ErrorInfo::new(ErrorKind::FileNotFound, "missing.txt");
        assert_eq!(e.to_string(), "file_not_found: missing.txt");
    }

    #[test]
    fn test_dp007_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = ErrorInfo::from_io("read a.txt", &io);
        assert_eq!(e.kind, ErrorKind::FileNotFound);
        assert!(e.message.starts_with("read a.txt"));

        let io = std::io::Error::other("boom");
        assert_eq!(ErrorInfo::from_io("x", &io).kind, ErrorKind::Io);
    }

    #[test]
    fn test_dp007_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::UnresolvedVariable).unwrap();
        assert_eq!(json, "\"unresolved_variable\"");
        let back: ErrorKind = serde_json::from_str("\"ocr_empty\"").unwrap();
        assert_eq!(back, ErrorKind::OcrEmpty);
    }

    #[test]
    fn test_dp007_engine_error_display() {
        let e = EngineError::Parse("bad indent".to_string());
        assert_eq!(e.to_string(), "recipe parse error: bad indent");
    }
}
