//! Result-extraction strategies and the awaiter view.
//!
//! An [`Awaiter`] binds one promise to one [`ExtractStrategy`] for the
//! duration of a single await point: `is_completed` / `on_completed` /
//! `get_result`, the protocol a host async lowering expects. Awaiters are
//! transient; any number of them may observe one engine without re-running
//! its callback.
//!
//! Three strategies ship with the crate:
//! - [`RawExtract`]: the value or a panic. The only path through which a
//!   captured callback panic resurfaces.
//! - [`OptionExtract`]: the value or `None`; failure detail is discarded.
//! - [`CheckedExtract`]: `Result<T, F>` with a caller-chosen error shape;
//!   never panics.

use std::fmt;
use std::sync::Arc;

use crate::promise::Promise;
use crate::types::Outcome;

/// Converts a resolved outcome (or an invalid-state observation) into the
/// shape a consumer asked for.
pub trait ExtractStrategy<T, E> {
    /// The extracted shape.
    type Output;

    /// Consumes the blocking accessor's result.
    fn extract(&self, resolved: crate::error::Result<Outcome<T, E>>) -> Self::Output;
}

/// Panicking extraction: the success value or nothing at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawExtract;

impl<T, E> ExtractStrategy<T, E> for RawExtract
where
    E: fmt::Debug,
{
    type Output = T;

    fn extract(&self, resolved: crate::error::Result<Outcome<T, E>>) -> T {
        match resolved {
            Ok(Outcome::Ok(value)) => value,
            Ok(Outcome::Err(e)) => panic!("promise failed: {e:?}"),
            Ok(Outcome::Cancelled(reason)) => panic!("promise cancelled: {reason}"),
            Ok(Outcome::Panicked(payload)) => {
                // Resurface the captured panic as a panic.
                std::panic::resume_unwind(Box::new(payload.message().to_string()))
            }
            Err(err) => panic!("promise in invalid state: {err}"),
        }
    }
}

/// Lossy extraction: failure, cancellation, and panic all collapse to `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionExtract;

impl<T, E> ExtractStrategy<T, E> for OptionExtract {
    type Output = Option<T>;

    fn extract(&self, resolved: crate::error::Result<Outcome<T, E>>) -> Option<T> {
        match resolved {
            Ok(Outcome::Ok(value)) => Some(value),
            _ => None,
        }
    }
}

/// Typed-result extraction into `Result<T, F>`.
///
/// `Err(e)` goes through the mapper when one is set; cancellation, panics,
/// and (unreachable) invalid-state observations always use the fallback
/// factory. Never panics.
pub struct CheckedExtract<E, F> {
    mapper: Option<Arc<dyn Fn(E) -> F + Send + Sync>>,
    fallback: Arc<dyn Fn() -> F + Send + Sync>,
}

impl<E, F> CheckedExtract<E, F> {
    /// Every non-success outcome becomes a clone of `default`.
    #[must_use]
    pub fn default_value(default: F) -> Self
    where
        F: Clone + Send + Sync + 'static,
    {
        Self {
            mapper: None,
            fallback: Arc::new(move || default.clone()),
        }
    }

    /// `Err(e)` goes through `mapper`; everything else non-success becomes
    /// a clone of `default`.
    #[must_use]
    pub fn mapped(mapper: impl Fn(E) -> F + Send + Sync + 'static, default: F) -> Self
    where
        F: Clone + Send + Sync + 'static,
    {
        Self {
            mapper: Some(Arc::new(mapper)),
            fallback: Arc::new(move || default.clone()),
        }
    }
}

impl<E, F> Clone for CheckedExtract<E, F> {
    fn clone(&self) -> Self {
        Self {
            mapper: self.mapper.clone(),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

impl<E, F> fmt::Debug for CheckedExtract<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckedExtract")
            .field("has_mapper", &self.mapper.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E, F> ExtractStrategy<T, E> for CheckedExtract<E, F> {
    type Output = Result<T, F>;

    fn extract(&self, resolved: crate::error::Result<Outcome<T, E>>) -> Result<T, F> {
        match resolved {
            Ok(Outcome::Ok(value)) => Ok(value),
            Ok(Outcome::Err(e)) => match &self.mapper {
                Some(mapper) => Err(mapper(e)),
                None => Err((self.fallback)()),
            },
            Ok(Outcome::Cancelled(_)) | Ok(Outcome::Panicked(_)) | Err(_) => {
                Err((self.fallback)())
            }
        }
    }
}

/// A transient view binding one engine to one extraction strategy.
pub struct Awaiter<T, E, S> {
    promise: Promise<T, E>,
    strategy: S,
}

impl<T, E, S> Awaiter<T, E, S>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    S: ExtractStrategy<T, E>,
{
    /// Mirrors the engine's terminal check.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.promise.is_completed()
    }

    /// Registers the resumption; runs wherever completion fires. On an
    /// undispatched promise this cold-starts execution.
    pub fn on_completed(&self, continuation: impl FnOnce() + Send + 'static) {
        self.promise.on_complete(continuation);
    }

    /// Blocks if necessary, then extracts through the bound strategy.
    pub fn get_result(self) -> S::Output {
        self.strategy.extract(self.promise.try_result())
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// An awaiter that panics on any non-success outcome.
    #[must_use]
    pub fn awaiter_raw(&self) -> Awaiter<T, E, RawExtract>
    where
        E: fmt::Debug,
    {
        Awaiter {
            promise: self.clone(),
            strategy: RawExtract,
        }
    }

    /// An awaiter collapsing every non-success outcome to `None`.
    #[must_use]
    pub fn awaiter_option(&self) -> Awaiter<T, E, OptionExtract> {
        Awaiter {
            promise: self.clone(),
            strategy: OptionExtract,
        }
    }

    /// An awaiter extracting into `Result<T, F>` with the given strategy.
    #[must_use]
    pub fn awaiter_checked<F>(
        &self,
        strategy: CheckedExtract<E, F>,
    ) -> Awaiter<T, E, CheckedExtract<E, F>> {
        Awaiter {
            promise: self.clone(),
            strategy,
        }
    }
}
