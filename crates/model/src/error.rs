//! The error taxonomy shared by every layer of the store.
//!
//! Errors are numeric-coded and category-tagged. [`StoreError::to_string`]
//! yields the full diagnostic message; [`StoreError::safe_message`] yields a
//! sanitized message that never embeds user data and is suitable for
//! surfacing to end users.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Coarse classification of an error, mapped to the leading digit of its
/// numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// 1xxx: query compilation and execution.
    Query,
    /// 2xxx: storage engine and on-disk state.
    Storage,
    /// 3xxx: reserved for the inference collaborator.
    Reasoning,
    /// 4xxx: input validation.
    Validation,
    /// 5xxx: internal faults and resource exhaustion.
    System,
}

/// Which configured limit a [`StoreError::LimitExceeded`] refers to.
///
/// Only limits where a partial answer would be silently wrong raise; the
/// property-path and DESCRIBE bounds truncate with telemetry instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Distinct,
    OrderBy,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Distinct => write!(f, "distinct"),
            LimitKind::OrderBy => write!(f, "order_by"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    // 1xxx query
    #[error("unsupported query feature: {feature}")]
    UnsupportedFeature { feature: String },
    #[error("query exceeded its deadline of {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("query exceeded the {kind} limit of {limit} bindings")]
    LimitExceeded { kind: LimitKind, limit: usize },
    #[error("variable `{name}` is not bound at this point in the query")]
    VariableNotBound { name: String },

    // 2xxx storage
    #[error("store is closed")]
    StoreClosed,
    #[error("failed to open store at `{path}`: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("corruption detected in {context}: {detail}")]
    CorruptionDetected { context: String, detail: String },
    #[error("dictionary row missing for id {id:#018x}")]
    DictionaryMissing { id: u64 },

    // 4xxx validation
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file too large: {path} ({size} bytes)")]
    FileTooLarge { path: String, size: u64 },

    // 5xxx system
    #[error("internal error: {0}")]
    Internal(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("sequence counter exhausted for tag {tag}")]
    CounterExhausted { tag: u8 },
}

impl StoreError {
    /// The stable numeric code of this error.
    pub fn code(&self) -> u16 {
        match self {
            StoreError::UnsupportedFeature { .. } => 1101,
            StoreError::Timeout { .. } => 1102,
            StoreError::LimitExceeded { .. } => 1103,
            StoreError::VariableNotBound { .. } => 1104,
            StoreError::StoreClosed => 2201,
            StoreError::OpenFailed { .. } => 2202,
            StoreError::Io(_) => 2203,
            StoreError::CorruptionDetected { .. } => 2204,
            StoreError::DictionaryMissing { .. } => 2404,
            StoreError::InvalidInput(_) => 4401,
            StoreError::InvalidConfig(_) => 4402,
            StoreError::InvalidPath(_) => 4403,
            StoreError::FileNotFound(_) => 4404,
            StoreError::FileTooLarge { .. } => 4405,
            StoreError::Internal(_) => 5501,
            StoreError::ResourceExhausted(_) => 5502,
            StoreError::NotImplemented(_) => 5503,
            StoreError::CounterExhausted { .. } => 5301,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code() / 1000 {
            1 => ErrorCategory::Query,
            2 => ErrorCategory::Storage,
            3 => ErrorCategory::Reasoning,
            4 => ErrorCategory::Validation,
            _ => ErrorCategory::System,
        }
    }

    /// A message safe to show to end users: no term text, no file paths, no
    /// internal state.
    pub fn safe_message(&self) -> &'static str {
        match self {
            StoreError::UnsupportedFeature { .. } => "the query uses an unsupported feature",
            StoreError::Timeout { .. } => "the query timed out",
            StoreError::LimitExceeded { .. } => "the query exceeded a result-size limit",
            StoreError::VariableNotBound { .. } => "the query references an unbound variable",
            StoreError::StoreClosed => "the store is closed",
            StoreError::OpenFailed { .. } => "the store could not be opened",
            StoreError::Io(_) => "a storage I/O error occurred",
            StoreError::CorruptionDetected { .. } => "the store detected corrupted data",
            StoreError::DictionaryMissing { .. } => "an internal dictionary entry is missing",
            StoreError::InvalidInput(_) => "the input is invalid",
            StoreError::InvalidConfig(_) => "the configuration is invalid",
            StoreError::InvalidPath(_) => "the path is invalid",
            StoreError::FileNotFound(_) => "a required file was not found",
            StoreError::FileTooLarge { .. } => "a file exceeds the size limit",
            StoreError::Internal(_) => "an internal error occurred",
            StoreError::ResourceExhausted(_) => "a resource limit was reached",
            StoreError::NotImplemented(_) => "the operation is not implemented",
            StoreError::CounterExhausted { .. } => "the identifier space is exhausted",
        }
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout { .. } | StoreError::Io(_) | StoreError::ResourceExhausted(_)
        )
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_categories() {
        let errors = [
            StoreError::Timeout {
                timeout: Duration::from_secs(1),
            },
            StoreError::StoreClosed,
            StoreError::InvalidInput("x".into()),
            StoreError::Internal("y".into()),
        ];
        for e in errors {
            let leading = e.code() / 1000;
            match e.category() {
                ErrorCategory::Query => assert_eq!(leading, 1),
                ErrorCategory::Storage => assert_eq!(leading, 2),
                ErrorCategory::Reasoning => assert_eq!(leading, 3),
                ErrorCategory::Validation => assert_eq!(leading, 4),
                ErrorCategory::System => assert_eq!(leading, 5),
            }
        }
    }

    #[test]
    fn safe_messages_do_not_leak() {
        let e = StoreError::OpenFailed {
            path: "/secret/location".into(),
            reason: "denied".into(),
        };
        assert!(!e.safe_message().contains("secret"));
        assert!(e.to_string().contains("/secret/location"));
    }

    #[test]
    fn retriable_subset() {
        assert!(StoreError::Io("disk".into()).is_retriable());
        assert!(!StoreError::StoreClosed.is_retriable());
        assert!(!StoreError::CorruptionDetected {
            context: "spo".into(),
            detail: "bad key".into()
        }
        .is_retriable());
    }
}
