//! Promissory: a cold-start promise engine with blocking, continuation, and
//! host-task resolution paths.
//!
//! # Overview
//!
//! Promissory is a hand-rolled future/promise abstraction. A [`Promise`]
//! wraps a shared state engine holding a deferred computation; the
//! computation can be resolved by blocking a thread, by registering a
//! continuation for later resumption, or eagerly at construction. There is
//! no event loop: background dispatch happens on a small shared worker
//! pool, the blocking accessor runs an unclaimed callback inline, and only
//! the blocking accessor ever blocks.
//!
//! # Core guarantees
//!
//! - **At-most-once dispatch**: one atomic claim guards the deferred
//!   callback; racing resolution paths cannot run it twice
//! - **First terminal write wins**: a late write from an abandoned
//!   computation after cancellation is silently dropped
//! - **Panics become data**: callback panics are caught at the dispatch
//!   boundary and stored as [`Outcome::Panicked`], resurfacing only through
//!   raw extraction
//! - **Prompt cancellation**: a fired token releases blocking waiters
//!   without waiting for an in-flight computation
//!
//! # Module structure
//!
//! - [`types`]: Outcome box, cancellation token, execution context
//! - [`engine`]: The state machine behind every handle
//! - [`promise`]: The future handle and builder surface
//! - [`combinator`]: map/bind/apply/flatten composition
//! - [`extract`]: Awaiter and result-extraction strategies
//! - [`maybe`]: Option-shaped promises
//! - [`interop`]: Conversion to and from `std::future::Future`
//! - [`runtime`]: The shared background worker pool
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```
//! use promissory::{Outcome, Promise};
//!
//! let total: Promise<u32, String> = Promise::new(|| 40).map(|n| n + 2);
//! assert_eq!(total.result(), Outcome::Ok(42));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod combinator;
pub mod engine;
pub mod error;
pub mod extract;
pub mod interop;
pub mod maybe;
pub mod promise;
pub mod runtime;
pub mod tracing_compat;
pub mod types;

pub use engine::Status;
pub use error::{Error, ErrorKind};
pub use extract::{Awaiter, CheckedExtract, ExtractStrategy, OptionExtract, RawExtract};
pub use interop::Task;
pub use maybe::MaybePromise;
pub use promise::Promise;
pub use types::{CancelKind, CancelReason, CancelToken, ExecContext, Outcome, PanicPayload};
