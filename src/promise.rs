//! The future handle: an immutable value wrapping a shared state engine.
//!
//! A [`Promise`] is cheap to clone; clones share one engine, so resolving
//! through any handle is visible through all of them. Construction never
//! forces execution: a deferred promise stays `Ready` until somebody
//! blocks on it, registers a continuation, or calls [`Promise::start`].

use std::fmt;
use std::sync::Arc;

use crate::engine::{Engine, Status};
use crate::types::{CancelToken, ExecContext, Outcome};

/// A handle to a deferred computation producing `Outcome<T, E>`.
pub struct Promise<T, E> {
    pub(crate) engine: Arc<Engine<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// A promise that is already successfully resolved.
    ///
    /// No callback exists and none is ever dispatched.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self::from_outcome(Outcome::Ok(value))
    }

    /// A promise that is already failed.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self::from_outcome(Outcome::Err(error))
    }

    /// A promise terminal at construction, holding an arbitrary outcome.
    #[must_use]
    pub fn from_outcome(outcome: Outcome<T, E>) -> Self {
        Self {
            engine: Engine::pre_completed(outcome, ExecContext::capture(), CancelToken::new()),
        }
    }

    /// Wraps a synchronous computation; it runs at most once, on first
    /// dispatch, under the context captured here.
    pub fn new(f: impl FnOnce() -> T + Send + 'static) -> Self {
        Self::new_in(f, ExecContext::capture(), CancelToken::new())
    }

    /// Like [`Promise::new`] with an explicit context and token.
    pub fn new_in(
        f: impl FnOnce() -> T + Send + 'static,
        context: ExecContext,
        token: CancelToken,
    ) -> Self {
        let mut f = Some(f);
        Self::from_outcome_fn_in(
            move || f.take().map(|f| Outcome::Ok(f())),
            context,
            token,
        )
    }

    /// Wraps a raw deferred callback. `None` means "outcome not yet
    /// available"; the dispatching thread retries after a yield.
    pub fn from_outcome_fn(f: impl FnMut() -> Option<Outcome<T, E>> + Send + 'static) -> Self {
        Self::from_outcome_fn_in(f, ExecContext::capture(), CancelToken::new())
    }

    /// Like [`Promise::from_outcome_fn`] with an explicit context and token.
    pub fn from_outcome_fn_in(
        f: impl FnMut() -> Option<Outcome<T, E>> + Send + 'static,
        context: ExecContext,
        token: CancelToken,
    ) -> Self {
        Self {
            engine: Engine::new(Some(Box::new(f)), context, token),
        }
    }

    /// A promise with no callback, resolvable only through
    /// [`set_result`](Self::set_result), [`set_exception`](Self::set_exception),
    /// or its token.
    #[must_use]
    pub fn pending() -> Self {
        Self::pending_in(ExecContext::capture(), CancelToken::new())
    }

    /// Like [`Promise::pending`] with an explicit context and token.
    #[must_use]
    pub fn pending_in(context: ExecContext, token: CancelToken) -> Self {
        Self {
            engine: Engine::new(None, context, token),
        }
    }

    /// Current engine status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.engine.status()
    }

    /// True once the engine reached `Completed`, `Failed`, or `Cancelled`.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.engine.is_terminal()
    }

    /// The cancellation token this promise was bound to at construction.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        self.engine.token()
    }

    /// The execution context captured at construction.
    #[must_use]
    pub fn context(&self) -> &ExecContext {
        self.engine.context()
    }

    /// Dispatches the deferred callback to the background worker pool
    /// without blocking. No-op on promises that have no undispatched
    /// callback.
    pub fn start(&self) {
        self.engine.start();
    }

    /// Resolves the promise successfully.
    ///
    /// Returns `false` if the engine was already terminal and the write was
    /// dropped.
    pub fn set_result(&self, value: T) -> bool {
        self.engine.try_complete(Outcome::Ok(value))
    }

    /// Resolves the promise with an error.
    ///
    /// Returns `false` if the engine was already terminal and the write was
    /// dropped.
    pub fn set_exception(&self, error: E) -> bool {
        self.engine.try_complete(Outcome::Err(error))
    }

    /// Registers a continuation; runs immediately if already terminal,
    /// otherwise fires once, in registration order, on the completing
    /// thread. Registration cold-starts an undispatched callback.
    pub fn on_complete(&self, continuation: impl FnOnce() + Send + 'static) {
        self.engine.on_complete(continuation);
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Blocks until terminal and returns the outcome box.
    ///
    /// # Panics
    ///
    /// Panics on an invalid-state observation (a terminal engine with an
    /// empty outcome box), which no reachable transition produces. Use
    /// [`try_result`](Self::try_result) for the non-panicking form.
    #[must_use]
    pub fn result(&self) -> Outcome<T, E> {
        match self.engine.wait() {
            Ok(outcome) => outcome,
            Err(err) => panic!("promise in invalid state: {err}"),
        }
    }

    /// Blocks until terminal and returns the outcome box.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error instead of panicking where
    /// [`result`](Self::result) would panic.
    pub fn try_result(&self) -> crate::error::Result<Outcome<T, E>> {
        self.engine.wait()
    }

    /// Non-blocking peek at the outcome box.
    #[must_use]
    pub fn peek(&self) -> Option<Outcome<T, E>> {
        self.engine.outcome_snapshot()
    }
}

impl<T, E> PartialEq for Promise<T, E>
where
    T: PartialEq + Send + 'static,
    E: PartialEq + Send + 'static,
{
    /// Value equality: status plus outcome, not engine identity.
    fn eq(&self, other: &Self) -> bool {
        self.engine.value_eq(&other.engine)
    }
}

impl<T, E> fmt::Debug for Promise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn completed_resolves_without_dispatch() {
        let p: Promise<i32, String> = Promise::completed(42);
        assert_eq!(p.status(), Status::Completed);
        assert_eq!(p.result(), Outcome::Ok(42));
    }

    #[test]
    fn failed_carries_the_error() {
        let p: Promise<i32, String> = Promise::failed("nope".to_string());
        assert_eq!(p.status(), Status::Failed);
        assert_eq!(p.result(), Outcome::Err("nope".to_string()));
    }

    #[test]
    fn sync_fn_promise_runs_lazily() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let p: Promise<i32, String> = Promise::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            21 * 2
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.status(), Status::Ready);
        assert_eq!(p.result(), Outcome::Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Re-reading the outcome box never re-runs the callback.
        assert_eq!(p.result(), Outcome::Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pending_promise_resolves_through_set_result() {
        let p: Promise<i32, String> = Promise::pending();
        assert_eq!(p.status(), Status::Created);
        assert!(p.set_result(5));
        assert_eq!(p.result(), Outcome::Ok(5));
        assert!(!p.set_result(6));
        assert!(!p.set_exception("late".to_string()));
    }

    #[test]
    fn clones_share_one_engine() {
        let p: Promise<i32, String> = Promise::pending();
        let q = p.clone();
        assert!(q.set_exception("boom".to_string()));
        assert_eq!(p.result(), Outcome::Err("boom".to_string()));
    }

    #[test]
    fn equality_is_by_value_not_identity() {
        let a: Promise<i32, String> = Promise::completed(42);
        let b: Promise<i32, String> = Promise::completed(42);
        let c: Promise<i32, String> = Promise::completed(7);
        let d: Promise<i32, String> = Promise::pending();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(d, d.clone());
    }

    #[test]
    fn peek_never_blocks() {
        let p: Promise<i32, String> = Promise::pending();
        assert_eq!(p.peek(), None);
        p.set_result(1);
        assert_eq!(p.peek(), Some(Outcome::Ok(1)));
    }
}
