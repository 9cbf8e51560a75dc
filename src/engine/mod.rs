//! The state engine behind every promise handle.
//!
//! An engine owns one deferred computation and drives it through the
//! status lattice:
//!
//! ```text
//! Created ──set_result/set_exception──────────────┐
//! Ready ──start()/first continuation──▶ RunningAsync ──▶ Completed
//! Ready ──blocking waiter─────────────▶ Running ───────▶ Failed
//!   *  ──token fired──────────────────▶ Cancelled
//! ```
//!
//! `Completed`, `Failed`, and `Cancelled` are terminal. Three call paths
//! can try to dispatch the same callback (pre-completion, `start`, the
//! blocking accessor); a single atomic claim on the transition out of
//! `Ready` guarantees the callback runs at most once. Terminal writes go
//! through [`Engine::try_complete`], where the first write wins and later
//! writes (for example a background computation finishing after
//! cancellation) are silently dropped.
//!
//! All mutable state lives under one `parking_lot::Mutex`; the paired
//! condvar is the only blocking primitive, used solely by the blocking
//! accessor.

use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::Waker;

use crate::error::Error;
use crate::runtime;
use crate::tracing_compat::{debug, trace};
use crate::types::{CancelToken, ExecContext, Outcome, PanicPayload};

/// The deferred-computation contract: a zero-argument callback returning
/// `None` while the outcome is still unavailable and `Some` once resolved.
///
/// The dispatch guard ensures it is invoked by at most one thread; that
/// thread retries after a yield whenever it sees `None`.
pub type DeferredFn<T, E> = Box<dyn FnMut() -> Option<Outcome<T, E>> + Send + 'static>;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Observable engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// No callback present; resolvable only via `set_result`/`set_exception`
    /// or cancellation.
    Created,
    /// A callback is present but has not been dispatched.
    Ready,
    /// The callback runs inline on a blocking waiter's thread.
    Running,
    /// The callback was dispatched to a background worker without blocking
    /// the caller.
    RunningAsync,
    /// Terminal: the outcome box holds `Ok`.
    Completed,
    /// Terminal: the outcome box holds `Err` or `Panicked`.
    Failed,
    /// Terminal: the outcome box holds `Cancelled`.
    Cancelled,
}

impl Status {
    /// Returns true for `Completed`, `Failed`, and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Host-task bridge state, created lazily on first conversion.
pub(crate) struct TaskBridge {
    pub(crate) waker: Mutex<Option<Waker>>,
    pub(crate) registered: AtomicBool,
}

struct EngineState<T, E> {
    status: Status,
    callback: Option<DeferredFn<T, E>>,
    outcome: Option<Outcome<T, E>>,
    continuations: Vec<Continuation>,
}

/// The mutable state machine. Shared behind an `Arc`; handles, awaiters,
/// and bridges all reference the same engine.
pub struct Engine<T, E> {
    state: Mutex<EngineState<T, E>>,
    cond: Condvar,
    /// Single-dispatch guard: claimed exactly once on the way out of `Ready`.
    claimed: AtomicBool,
    token: CancelToken,
    context: ExecContext,
    bridge: OnceLock<Arc<TaskBridge>>,
}

impl<T, E> Engine<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Builds an engine around an optional deferred callback.
    ///
    /// With a callback the engine starts `Ready`; without one it starts
    /// `Created` and can only be resolved imperatively. The token's
    /// cancellation callback is registered here, once, at assignment.
    pub fn new(
        callback: Option<DeferredFn<T, E>>,
        context: ExecContext,
        token: CancelToken,
    ) -> Arc<Self> {
        let status = if callback.is_some() {
            Status::Ready
        } else {
            Status::Created
        };
        let engine = Arc::new(Self {
            state: Mutex::new(EngineState {
                status,
                callback,
                outcome: None,
                continuations: Vec::new(),
            }),
            cond: Condvar::new(),
            claimed: AtomicBool::new(false),
            token: token.clone(),
            context,
            bridge: OnceLock::new(),
        });
        trace!(?status, "engine constructed");

        let weak = Arc::downgrade(&engine);
        token.on_cancel(move |reason| {
            if let Some(engine) = weak.upgrade() {
                engine.try_complete(Outcome::Cancelled(reason.clone()));
            }
        });
        engine
    }

    /// Builds an engine that is terminal at construction.
    pub fn pre_completed(
        outcome: Outcome<T, E>,
        context: ExecContext,
        token: CancelToken,
    ) -> Arc<Self> {
        let status = terminal_status(&outcome);
        Arc::new(Self {
            state: Mutex::new(EngineState {
                status,
                callback: None,
                outcome: Some(outcome),
                continuations: Vec::new(),
            }),
            cond: Condvar::new(),
            claimed: AtomicBool::new(false),
            token,
            context,
            bridge: OnceLock::new(),
        })
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    /// Returns true if the engine reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Returns the bound cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Returns the captured execution context.
    #[must_use]
    pub fn context(&self) -> &ExecContext {
        &self.context
    }

    /// True once the dispatch claim has been taken.
    pub(crate) fn dispatch_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub(crate) fn bridge(&self) -> &Arc<TaskBridge> {
        self.bridge.get_or_init(|| {
            Arc::new(TaskBridge {
                waker: Mutex::new(None),
                registered: AtomicBool::new(false),
            })
        })
    }

    /// Writes a terminal outcome and fires continuations.
    ///
    /// The first terminal write wins; returns `false` if the engine was
    /// already terminal and the write was dropped.
    pub fn try_complete(&self, outcome: Outcome<T, E>) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                trace!("late terminal write dropped");
                return false;
            }
            let status = terminal_status(&outcome);
            state.status = status;
            state.outcome = Some(outcome);
            // The callback can no longer produce an observable result.
            state.callback = None;
            debug!(?status, "engine reached terminal state");
            self.cond.notify_all();
            std::mem::take(&mut state.continuations)
        };
        // Registration order, on the completing thread.
        for continuation in continuations {
            continuation();
        }
        true
    }

    /// Registers a continuation to run when the engine completes.
    ///
    /// On a terminal engine the continuation runs immediately on this
    /// thread. On a `Ready` engine, registration cold-starts execution.
    pub fn on_complete(self: &Arc<Self>, continuation: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                Some(continuation)
            } else {
                state.continuations.push(Box::new(continuation));
                None
            }
        };
        match run_now {
            Some(continuation) => continuation(),
            None => self.start(),
        }
    }

    /// Dispatches the deferred callback to the background worker pool.
    ///
    /// No-op unless the engine is `Ready` and the dispatch claim is free;
    /// the caller does not block.
    pub fn start(self: &Arc<Self>) {
        if let Some(callback) = self.claim(Status::RunningAsync) {
            self.dispatch(callback);
        }
    }

    /// Blocking resolution: returns the outcome box, running the callback
    /// inline on this thread first if nobody else has claimed it.
    ///
    /// # Errors
    ///
    /// Returns an invalid-state error if the engine is terminal with an
    /// empty outcome box, which no reachable transition produces.
    pub fn wait(self: &Arc<Self>) -> Result<Outcome<T, E>, Error>
    where
        T: Clone,
        E: Clone,
    {
        // A token that fired before anyone looked still terminates promptly.
        if let Some(reason) = self.token.reason() {
            self.try_complete(Outcome::Cancelled(reason));
        }
        loop {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return state
                    .outcome
                    .clone()
                    .ok_or_else(|| Error::invalid_state("terminal engine with empty outcome box"));
            }
            if state.status == Status::Ready {
                drop(state);
                // Run inline: the waiter would only block anyway, and a
                // derived callback resolving its parent here must not
                // occupy a second pool worker, or deep chains would pin
                // one worker per level and exhaust the pool.
                if let Some(callback) = self.claim(Status::Running) {
                    self.run_deferred(callback);
                }
                continue;
            }
            // Created (awaiting imperative completion), Running, or
            // RunningAsync: block until a terminal write signals us.
            self.cond.wait(&mut state);
        }
    }

    /// Non-blocking snapshot of the outcome box.
    #[must_use]
    pub fn outcome_snapshot(&self) -> Option<Outcome<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        self.state.lock().outcome.clone()
    }

    /// Value equality: two engines are equal when status and outcome match.
    #[must_use]
    pub fn value_eq(&self, other: &Self) -> bool
    where
        T: PartialEq,
        E: PartialEq,
    {
        if std::ptr::eq(self, other) {
            return true;
        }
        // Lock in address order so concurrent symmetric comparisons cannot
        // deadlock.
        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let a = first.state.lock();
        let b = second.state.lock();
        a.status == b.status && a.outcome == b.outcome
    }

    /// Claims the dispatch right and takes the callback, or returns `None`
    /// if another path already claimed it (or the engine left `Ready`).
    fn claim(&self, running: Status) -> Option<DeferredFn<T, E>> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let mut state = self.state.lock();
        if state.status != Status::Ready {
            return None;
        }
        state.status = running;
        trace!(?running, "dispatch claimed");
        state.callback.take()
    }

    /// Hands the claimed callback to the worker pool, falling back to the
    /// calling thread if the pool refuses it.
    fn dispatch(self: &Arc<Self>, callback: DeferredFn<T, E>) {
        let slot = Arc::new(Mutex::new(Some(callback)));
        let pool = runtime::global();
        let this = Arc::clone(self);
        let worker_slot = Arc::clone(&slot);
        let spawned = pool.spawn(move || {
            if let Some(callback) = worker_slot.lock().take() {
                this.run_deferred(callback);
            }
        });
        if spawned.is_err() {
            if let Some(callback) = slot.lock().take() {
                self.run_deferred(callback);
            }
        }
    }

    /// The single dispatch boundary: runs the callback under the captured
    /// context, converting panics into `Panicked` outcomes and retrying
    /// after a yield while the callback reports "not yet".
    fn run_deferred(self: &Arc<Self>, mut callback: DeferredFn<T, E>) {
        let context = self.context.clone();
        loop {
            if self.is_terminal() {
                // Cancelled mid-retry; the callback's result would be
                // dropped anyway.
                return;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| context.scope(|| callback())));
            match result {
                Err(payload) => {
                    self.try_complete(Outcome::Panicked(PanicPayload::from_unwind(payload)));
                    return;
                }
                Ok(Some(outcome)) => {
                    self.try_complete(outcome);
                    return;
                }
                Ok(None) => std::thread::yield_now(),
            }
        }
    }
}

const fn terminal_status<T, E>(outcome: &Outcome<T, E>) -> Status {
    match outcome {
        Outcome::Ok(_) => Status::Completed,
        Outcome::Err(_) | Outcome::Panicked(_) => Status::Failed,
        Outcome::Cancelled(_) => Status::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelReason;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn deferred_engine<T, E>(
        f: impl FnMut() -> Option<Outcome<T, E>> + Send + 'static,
    ) -> Arc<Engine<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        Engine::new(
            Some(Box::new(f)),
            ExecContext::named("test"),
            CancelToken::new(),
        )
    }

    #[test]
    fn pre_completed_is_terminal_at_construction() {
        let engine: Arc<Engine<i32, String>> = Engine::pre_completed(
            Outcome::Ok(42),
            ExecContext::named("test"),
            CancelToken::new(),
        );
        assert_eq!(engine.status(), Status::Completed);
        assert!(!engine.dispatch_claimed());
        assert_eq!(engine.wait(), Ok(Outcome::Ok(42)));
    }

    #[test]
    fn blocking_wait_claims_and_resolves() {
        let engine: Arc<Engine<i32, String>> = deferred_engine(|| Some(Outcome::Ok(7)));
        assert_eq!(engine.status(), Status::Ready);
        assert_eq!(engine.wait(), Ok(Outcome::Ok(7)));
        assert_eq!(engine.status(), Status::Completed);
        assert!(engine.dispatch_claimed());
    }

    #[test]
    fn callback_panic_is_caught_at_dispatch_boundary() {
        let engine: Arc<Engine<i32, String>> = deferred_engine(|| panic!("deliberate"));
        let outcome = engine.wait().expect("outcome present");
        match outcome {
            Outcome::Panicked(p) => assert_eq!(p.message(), "deliberate"),
            other => panic!("expected Panicked, got {other:?}"),
        }
        assert_eq!(engine.status(), Status::Failed);
    }

    #[test]
    fn callback_runs_at_most_once_across_racing_paths() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let engine: Arc<Engine<i32, String>> = deferred_engine(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Some(Outcome::Ok(1))
        });

        // Race start() against a blocking waiter.
        let racer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.start())
        };
        let outcome = engine.wait().expect("outcome");
        racer.join().expect("racer");

        assert_eq!(outcome, Outcome::Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_terminal_write_wins() {
        let engine: Arc<Engine<i32, String>> = Engine::new(
            None,
            ExecContext::named("test"),
            CancelToken::new(),
        );
        assert!(engine.try_complete(Outcome::Ok(1)));
        assert!(!engine.try_complete(Outcome::Ok(2)));
        assert!(!engine.try_complete(Outcome::Cancelled(CancelReason::default())));
        assert_eq!(engine.outcome_snapshot(), Some(Outcome::Ok(1)));
    }

    #[test]
    fn cancellation_before_dispatch_wins_deterministically() {
        let token = CancelToken::new();
        token.cancel(CancelReason::user("too late"));
        let engine: Arc<Engine<i32, String>> = Engine::new(
            Some(Box::new(|| Some(Outcome::Ok(7)))),
            ExecContext::named("test"),
            token,
        );
        // The token callback completed the engine at construction.
        assert_eq!(engine.status(), Status::Cancelled);
        let outcome = engine.wait().expect("outcome");
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn cancellation_releases_blocking_waiter_promptly() {
        let token = CancelToken::new();
        let engine: Arc<Engine<i32, String>> =
            Engine::new(None, ExecContext::named("test"), token.clone());

        let waiter = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        token.cancel(CancelReason::timeout());

        let outcome = waiter.join().expect("waiter").expect("outcome");
        assert_eq!(outcome, Outcome::Cancelled(CancelReason::timeout()));
    }

    #[test]
    fn continuations_fire_in_registration_order() {
        let engine: Arc<Engine<i32, String>> =
            Engine::new(None, ExecContext::named("test"), CancelToken::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = Arc::clone(&order);
            engine.on_complete(move || order.lock().push(i));
        }
        engine.try_complete(Outcome::Ok(0));
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn continuation_on_terminal_engine_runs_immediately() {
        let engine: Arc<Engine<i32, String>> = Engine::pre_completed(
            Outcome::Ok(5),
            ExecContext::named("test"),
            CancelToken::new(),
        );
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        engine.on_complete(move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_cold_starts_a_ready_engine() {
        let engine: Arc<Engine<i32, String>> = deferred_engine(|| Some(Outcome::Ok(3)));
        assert!(!engine.dispatch_claimed());

        let (tx, rx) = std::sync::mpsc::channel();
        engine.on_complete(move || {
            let _ = tx.send(());
        });
        assert!(engine.dispatch_claimed());
        rx.recv_timeout(Duration::from_secs(5))
            .expect("continuation fired");
        assert_eq!(engine.status(), Status::Completed);
    }

    #[test]
    fn none_returning_callback_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);
        let engine: Arc<Engine<i32, String>> = deferred_engine(move || {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                None
            } else {
                Some(Outcome::Ok(9))
            }
        });
        assert_eq!(engine.wait(), Ok(Outcome::Ok(9)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn callback_observes_captured_context() {
        let context = ExecContext::named("origin");
        let engine: Arc<Engine<String, String>> = Engine::new(
            Some(Box::new(|| {
                let label = ExecContext::current()
                    .map(|c| c.label().to_string())
                    .unwrap_or_default();
                Some(Outcome::Ok(label))
            })),
            context,
            CancelToken::new(),
        );
        assert_eq!(engine.wait(), Ok(Outcome::Ok("origin".to_string())));
    }

    #[test]
    fn value_equality_compares_status_and_outcome() {
        let a: Arc<Engine<i32, String>> = Engine::pre_completed(
            Outcome::Ok(42),
            ExecContext::named("a"),
            CancelToken::new(),
        );
        let b: Arc<Engine<i32, String>> = Engine::pre_completed(
            Outcome::Ok(42),
            ExecContext::named("b"),
            CancelToken::new(),
        );
        let c: Arc<Engine<i32, String>> = Engine::pre_completed(
            Outcome::Ok(43),
            ExecContext::named("c"),
            CancelToken::new(),
        );
        assert!(a.value_eq(&b));
        assert!(!a.value_eq(&c));
    }

    #[test]
    fn set_result_resolves_created_engine_and_wakes_waiter() {
        let engine: Arc<Engine<i32, String>> =
            Engine::new(None, ExecContext::named("test"), CancelToken::new());
        let waiter = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.wait())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(engine.try_complete(Outcome::Ok(11)));
        assert_eq!(waiter.join().expect("join"), Ok(Outcome::Ok(11)));
    }
}
