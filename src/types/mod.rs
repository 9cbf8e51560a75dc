//! Core value types: the outcome box, cancellation, and execution context.

pub mod cancel;
pub mod context;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason, CancelToken};
pub use context::ExecContext;
pub use outcome::{Outcome, OutcomeError, PanicPayload};
