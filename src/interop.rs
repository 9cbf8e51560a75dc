//! Conversion to and from the host task abstraction, `std::future::Future`.
//!
//! `into_task()` wraps a promise in a [`Task`] that implements
//! `Future<Output = Outcome<T, E>>` through the engine's lazily created
//! bridge: one waker slot, one completion continuation, created on first
//! poll and cached for the engine's lifetime. Conversion itself dispatches
//! an undispatched callback, alongside first continuation registration and
//! the blocking accessor. `from_task()` goes the other way, wrapping a
//! future in a deferred promise that drives it to completion on the worker
//! pool. A round trip preserves the outcome.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::engine::Engine;
use crate::promise::Promise;
use crate::types::Outcome;

/// A promise viewed as a host task.
pub struct Task<T, E> {
    engine: Arc<Engine<T, E>>,
}

impl<T, E> Future for Task<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Outcome<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.engine.outcome_snapshot() {
            return Poll::Ready(outcome);
        }
        let bridge = self.engine.bridge();
        *bridge.waker.lock() = Some(cx.waker().clone());
        if !bridge.registered.swap(true, Ordering::AcqRel) {
            let bridge = Arc::clone(bridge);
            // Also cold-starts an undispatched callback.
            self.engine.on_complete(move || {
                if let Some(waker) = bridge.waker.lock().take() {
                    waker.wake();
                }
            });
        }
        // Completion may have landed between the snapshot and the waker
        // store; the stored waker would never be taken for it.
        match self.engine.outcome_snapshot() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Views this promise as a host task. Conversion dispatches an
    /// undispatched callback to the worker pool, so the computation runs
    /// whether or not the task is ever polled. Clone the handle first to
    /// keep direct access.
    #[must_use]
    pub fn into_task(self) -> Task<T, E> {
        self.engine.start();
        Task {
            engine: self.engine,
        }
    }

    /// Wraps a host task in a deferred promise. The future is driven to
    /// completion on the worker pool once the promise is forced.
    pub fn from_task(task: impl Future<Output = Outcome<T, E>> + Send + 'static) -> Self {
        let mut task = Some(Box::pin(task));
        Promise::from_outcome_fn(move || task.take().map(block_on))
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Outcome<T, E>;
    type IntoFuture = Task<T, E>;

    fn into_future(self) -> Task<T, E> {
        self.into_task()
    }
}

struct ThreadWaker(std::thread::Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }
}

/// Parks the calling thread between polls.
fn block_on<F: Future>(mut future: Pin<Box<F>>) -> F::Output {
    let waker = Waker::from(Arc::new(ThreadWaker(std::thread::current())));
    let mut cx = Context::from_waker(&waker);
    loop {
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => return output,
            Poll::Pending => std::thread::park(),
        }
    }
}
