//! Error taxonomy shared by every Caseflow crate.

use thiserror::Error;

use crate::types::{CaseAction, CaseStatus, Channel};

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, CaseflowError>;

#[derive(Debug, Error)]
pub enum CaseflowError {
    /// A required field is missing or malformed (e.g. escalation without a reason).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid transition: cannot {action} a case in status '{from}'")]
    InvalidTransition { from: CaseStatus, action: CaseAction },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Lost the single-writer race on a case; re-fetch and retry.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dispatch error on {channel}: {reason}")]
    Dispatch { channel: Channel, reason: String },

    /// Malformed rule predicate or settings, rejected when written.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The explicit error kind surfaced to collaborators alongside every failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidTransition,
    NotFound,
    Conflict,
    Dispatch,
    Configuration,
    Storage,
}

impl ErrorKind {
    /// Conflicts and channel failures are expected to succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Conflict | ErrorKind::Dispatch)
    }
}

impl CaseflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaseflowError::Validation(_) => ErrorKind::Validation,
            CaseflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CaseflowError::NotFound { .. } => ErrorKind::NotFound,
            CaseflowError::Conflict(_) => ErrorKind::Conflict,
            CaseflowError::Dispatch { .. } => ErrorKind::Dispatch,
            CaseflowError::Configuration(_) => ErrorKind::Configuration,
            CaseflowError::Storage(_) | CaseflowError::Io(_) => ErrorKind::Storage,
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        CaseflowError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = CaseflowError::InvalidTransition {
            from: CaseStatus::Closed,
            action: CaseAction::Escalate,
        };
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert!(!err.kind().is_retryable());
        assert!(err.to_string().contains("closed"));

        let err = CaseflowError::Conflict("case-1 changed".into());
        assert!(err.kind().is_retryable());

        let err = CaseflowError::not_found("case", "case-9");
        assert_eq!(err.to_string(), "case not found: case-9");
    }
}
