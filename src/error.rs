//! Error types and classification.
//!
//! The engine itself represents failure as data (the [`Outcome`] box); the
//! error type here covers the cases where an *accessor* cannot produce an
//! outcome at all:
//!
//! - the blocking accessor observed an impossible state combination
//! - the worker pool refused a dispatch
//! - a get was attempted before the engine reached a terminal state
//!
//! Errors are classified by [`Recoverability`] so callers can decide
//! whether retrying makes sense.
//!
//! [`Outcome`]: crate::types::Outcome

use core::fmt;

use crate::runtime::worker::SpawnError;
use crate::types::CancelReason;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation was cancelled.
    Cancelled,
    /// The blocking accessor observed an impossible state combination
    /// (for example a terminal engine with an empty outcome box).
    InvalidState,
    /// A result was requested before the engine reached a terminal state.
    NotCompleted,
    /// The worker pool rejected the dispatch.
    WorkerUnavailable,
}

impl ErrorKind {
    /// Returns the recoverability classification for this kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::NotCompleted => Recoverability::Transient,
            Self::Cancelled | Self::InvalidState => Recoverability::Permanent,
            Self::WorkerUnavailable => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context.
    Unknown,
}

/// The error type for engine accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Creates a cancellation error from a structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("{reason}"))
    }

    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(msg: &'static str) -> Self {
        Self::new(ErrorKind::InvalidState).with_message(msg)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Cancelled => write!(f, "cancelled")?,
            ErrorKind::InvalidState => write!(f, "invalid engine state")?,
            ErrorKind::NotCompleted => write!(f, "engine has not completed")?,
            ErrorKind::WorkerUnavailable => write!(f, "worker pool unavailable")?,
        }
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<SpawnError> for Error {
    fn from(err: SpawnError) -> Self {
        Self::new(ErrorKind::WorkerUnavailable).with_message(err.to_string())
    }
}

/// Convenient result alias for accessor operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_classification() {
        assert_eq!(
            ErrorKind::NotCompleted.recoverability(),
            Recoverability::Transient
        );
        assert!(ErrorKind::NotCompleted.is_retryable());
        assert_eq!(
            ErrorKind::InvalidState.recoverability(),
            Recoverability::Permanent
        );
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::invalid_state("terminal engine with empty outcome box");
        let rendered = err.to_string();
        assert!(rendered.contains("invalid engine state"));
        assert!(rendered.contains("empty outcome box"));
    }

    #[test]
    fn cancelled_from_reason() {
        let err = Error::cancelled(&CancelReason::user("stop"));
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("stop"));
    }

    #[test]
    fn spawn_error_converts() {
        let err: Error = SpawnError::Shutdown.into();
        assert_eq!(err.kind(), ErrorKind::WorkerUnavailable);
    }
}
