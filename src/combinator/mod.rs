//! Functional composition over promises.
//!
//! Each combinator builds a new handle whose deferred callback resolves the
//! parent with the blocking accessor and then applies a transformation.
//! Building is non-forcing: the parent is not dispatched until someone
//! forces the derived promise. The parent's execution context and
//! cancellation token propagate into the derived engine, so cancelling the
//! parent's token cancels the whole chain.
//!
//! `Err`, `Cancelled`, and `Panicked` outcomes pass through untouched;
//! transformation functions only ever see success payloads. Functor and
//! monad laws hold under blocking extraction (see the property tests in
//! `tests/algebraic_laws.rs`).

use crate::promise::Promise;
use crate::types::{Outcome, PanicPayload};

/// Resolves the parent's outcome inside a derived callback, converting the
/// (unreachable) invalid-state observation into panic data rather than
/// unwinding.
fn resolve_parent<T, E>(parent: &Promise<T, E>) -> Outcome<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    match parent.try_result() {
        Ok(outcome) => outcome,
        Err(err) => Outcome::Panicked(PanicPayload::new(err.to_string())),
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Functor map: a promise of `f` applied to this promise's success
    /// value. Failure, cancellation, and panic outcomes pass through.
    pub fn map<U>(&self, f: impl FnOnce(T) -> U + Send + 'static) -> Promise<U, E>
    where
        U: Send + 'static,
    {
        let parent = self.clone();
        let mut f = Some(f);
        Promise::from_outcome_fn_in(
            move || {
                Some(match resolve_parent(&parent) {
                    Outcome::Ok(value) => match f.take() {
                        Some(f) => Outcome::Ok(f(value)),
                        None => Outcome::Panicked(PanicPayload::new("map transform ran twice")),
                    },
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
                    Outcome::Panicked(payload) => Outcome::Panicked(payload),
                })
            },
            self.context().clone(),
            self.token().clone(),
        )
    }

    /// Monadic bind: `f` produces the continuation promise, which is built
    /// and forced only once this promise succeeds.
    pub fn bind<U>(&self, f: impl FnOnce(T) -> Promise<U, E> + Send + 'static) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
    {
        let parent = self.clone();
        let mut f = Some(f);
        Promise::from_outcome_fn_in(
            move || {
                Some(match resolve_parent(&parent) {
                    Outcome::Ok(value) => match f.take() {
                        Some(f) => resolve_parent(&f(value)),
                        None => Outcome::Panicked(PanicPayload::new("bind continuation ran twice")),
                    },
                    Outcome::Err(e) => Outcome::Err(e),
                    Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
                    Outcome::Panicked(payload) => Outcome::Panicked(payload),
                })
            },
            self.context().clone(),
            self.token().clone(),
        )
    }

    /// Applicative apply: resolves the function promise first, then maps
    /// this promise through it. The function type must be `Clone` because a
    /// resolved promise hands out clones of its payload.
    pub fn apply<U, F>(&self, functions: &Promise<F, E>) -> Promise<U, E>
    where
        F: FnOnce(T) -> U + Clone + Send + 'static,
        U: Clone + Send + 'static,
    {
        let parent = self.clone();
        functions.bind(move |f| parent.map(f))
    }
}

impl<T, E> Promise<Promise<T, E>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Collapses one level of promise nesting.
    #[must_use]
    pub fn flatten(&self) -> Promise<T, E> {
        self.bind(|inner| inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Status;
    use crate::types::{CancelReason, CancelToken, ExecContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn map_transforms_success() {
        let p: Promise<i32, String> = Promise::completed(1);
        let q = p.map(|v| v + 1).map(|v| v * 2);
        assert_eq!(q.result(), Outcome::Ok(4));
    }

    #[test]
    fn map_is_non_forcing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let p: Promise<i32, String> = Promise::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            1
        });
        let q = p.map(|v| v + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(p.status(), Status::Ready);
        assert_eq!(q.result(), Outcome::Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn map_passes_failure_through_without_calling_f() {
        let p: Promise<i32, String> = Promise::failed("boom".to_string());
        let q: Promise<i32, String> = p.map(|_| unreachable!("must not run on failure"));
        assert_eq!(q.result(), Outcome::Err("boom".to_string()));
    }

    #[test]
    fn bind_sequences_two_promises() {
        let p: Promise<i32, String> = Promise::new(|| 3);
        let q = p.bind(|v| Promise::new(move || v * 10));
        assert_eq!(q.result(), Outcome::Ok(30));
    }

    #[test]
    fn bind_short_circuits_on_failure() {
        let p: Promise<i32, String> = Promise::failed("early".to_string());
        let q: Promise<i32, String> =
            p.bind(|_| unreachable!("continuation must not be built on failure"));
        assert_eq!(q.result(), Outcome::Err("early".to_string()));
    }

    #[test]
    fn apply_resolves_function_then_value() {
        let values: Promise<i32, String> = Promise::completed(5);
        let functions: Promise<fn(i32) -> i32, String> = Promise::completed(|v| v + 2);
        assert_eq!(values.apply(&functions).result(), Outcome::Ok(7));
    }

    #[test]
    fn flatten_collapses_nesting() {
        let nested: Promise<Promise<i32, String>, String> =
            Promise::new(|| Promise::new(|| 9));
        assert_eq!(nested.flatten().result(), Outcome::Ok(9));
    }

    #[test]
    fn derived_promise_inherits_context_and_token() {
        let token = CancelToken::new();
        let context = ExecContext::named("chain-origin");
        let p: Promise<i32, String> =
            Promise::new_in(|| 1, context.clone(), token.clone());
        let q = p.map(|v| v + 1);
        assert_eq!(q.context(), &context);

        token.cancel(CancelReason::user("stop the chain"));
        assert!(q.result().is_cancelled());
    }

    #[test]
    fn panic_in_parent_propagates_as_panic_outcome() {
        let p: Promise<i32, String> = Promise::new(|| panic!("inner"));
        let q = p.map(|v| v + 1);
        match q.result() {
            Outcome::Panicked(payload) => assert_eq!(payload.message(), "inner"),
            other => panic!("expected Panicked, got {other:?}"),
        }
    }
}
