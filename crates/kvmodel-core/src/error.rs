//! Error taxonomy for the session and transaction core.

use std::fmt;

/// Result alias used throughout the session core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the session, transaction, manager, and backend-adapter
/// contract.
#[derive(Debug)]
pub enum Error {
    /// A transaction invariant was violated: begin while one is already open,
    /// commit twice, an unknown manager was referenced, or a backend reported
    /// an id that is not tracked by the session.
    InvalidTransaction(String),
    /// An operation required an attached session but the instance carries no
    /// session link.
    SessionNotAvailable,
    /// One or more failures occurred while committing a transaction.
    Commit(CommitException),
    /// The same identity was found under two distinct object instances.
    DuplicateIdentity(String),
    /// An argument was structurally invalid for the operation attempted.
    ValueError(String),
    /// `get_or_create` filtered to zero rows.
    DoesNotExist,
    /// `get_or_create` filtered to more than one row.
    MultipleFound(usize),
    /// A backend adapter reported a failure.
    Backend(BackendError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTransaction(msg) => write!(f, "invalid transaction: {msg}"),
            Error::SessionNotAvailable => write!(f, "instance is not bound to a session"),
            Error::Commit(e) => write!(f, "{e}"),
            Error::DuplicateIdentity(msg) => write!(f, "duplicated identity: {msg}"),
            Error::ValueError(msg) => write!(f, "{msg}"),
            Error::DoesNotExist => write!(f, "matching instance does not exist"),
            Error::MultipleFound(n) => write!(f, "expected at most one match, found {n}"),
            Error::Backend(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Commit(e) => Some(e),
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

/// Aggregated failure raised when one or more errors occurred during a
/// commit pipeline.
#[derive(Debug)]
pub struct CommitException {
    /// Number of errors collected during the commit.
    pub failures: usize,
    /// Human-readable aggregate message.
    pub message: String,
}

impl CommitException {
    /// Build a `CommitException` from a non-empty list of error messages.
    ///
    /// Matches the exact message shapes surfaced to callers: a lone error is
    /// reported verbatim, and two or more are prefixed with a count.
    pub fn from_messages(messages: Vec<String>) -> Self {
        let failures = messages.len();
        let message = if failures > 1 {
            format!(
                "There were {failures} exceptions during commit.\n\n{}",
                messages.join("\n\n")
            )
        } else {
            messages
                .into_iter()
                .next()
                .unwrap_or_else(|| "commit failed".to_string())
        };
        Self { failures, message }
    }
}

impl fmt::Display for CommitException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommitException {}

/// A failure reported by a `BackendAdapter` implementation.
#[derive(Debug)]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Connection,
    Protocol,
    Query,
    Timeout,
}

impl Error {
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Error::Backend(BackendError {
            kind,
            message: message.into(),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_message_is_verbatim() {
        let e = CommitException::from_messages(vec!["boom".to_string()]);
        assert_eq!(e.failures, 1);
        assert_eq!(e.message, "boom");
    }

    #[test]
    fn multiple_failures_are_prefixed_with_count() {
        let e = CommitException::from_messages(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(e.failures, 2);
        assert!(e.message.starts_with("There were 2 exceptions during commit."));
        assert!(e.message.contains("a"));
        assert!(e.message.contains("b"));
    }
}
