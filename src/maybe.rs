//! Option-shaped promises.
//!
//! A [`MaybePromise`] always carries "a value or nothing" as its success
//! payload. Its `map`/`bind` short-circuit on nothing without invoking the
//! continuation function, and its extraction collapses failure and
//! emptiness into one `None` (unlike the checked strategy, which keeps
//! error detail).

use crate::engine::Status;
use crate::promise::Promise;
use crate::types::Outcome;

/// A promise whose payload is `Option<T>`.
pub struct MaybePromise<T, E> {
    inner: Promise<Option<T>, E>,
}

impl<T, E> std::fmt::Debug for MaybePromise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaybePromise")
            .field("status", &self.inner.status())
            .finish_non_exhaustive()
    }
}

impl<T, E> Clone for MaybePromise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> MaybePromise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Already resolved with a present value.
    #[must_use]
    pub fn completed(value: T) -> Self {
        Self {
            inner: Promise::completed(Some(value)),
        }
    }

    /// Already resolved with nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inner: Promise::completed(None),
        }
    }

    /// Already failed.
    #[must_use]
    pub fn failed(error: E) -> Self {
        Self {
            inner: Promise::failed(error),
        }
    }

    /// Wraps a deferred computation producing a value-or-nothing.
    pub fn new(f: impl FnOnce() -> Option<T> + Send + 'static) -> Self {
        Self {
            inner: Promise::new(f),
        }
    }

    /// Adopts an existing option-payload promise.
    #[must_use]
    pub fn from_promise(inner: Promise<Option<T>, E>) -> Self {
        Self { inner }
    }

    /// Unwraps back to the plain handle.
    #[must_use]
    pub fn into_promise(self) -> Promise<Option<T>, E> {
        self.inner
    }

    /// Current engine status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// Dispatches without blocking; see [`Promise::start`].
    pub fn start(&self) {
        self.inner.start();
    }
}

impl<T, E> MaybePromise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Maps the present value; nothing and failures pass through.
    pub fn map<U>(&self, f: impl FnOnce(T) -> U + Send + 'static) -> MaybePromise<U, E>
    where
        U: Send + 'static,
    {
        MaybePromise {
            inner: self.inner.map(|opt| opt.map(f)),
        }
    }

    /// Monadic bind; the continuation runs only for a present value.
    pub fn bind<U>(
        &self,
        f: impl FnOnce(T) -> MaybePromise<U, E> + Send + 'static,
    ) -> MaybePromise<U, E>
    where
        U: Clone + Send + 'static,
    {
        MaybePromise {
            inner: self.inner.bind(move |opt| match opt {
                Some(value) => f(value).inner,
                None => Promise::completed(None),
            }),
        }
    }

    /// Blocks and collapses the outcome: a present success value, or `None`
    /// for emptiness, failure, cancellation, and panics alike.
    #[must_use]
    pub fn result_option(&self) -> Option<T> {
        match self.inner.try_result() {
            Ok(Outcome::Ok(opt)) => opt,
            _ => None,
        }
    }
}
