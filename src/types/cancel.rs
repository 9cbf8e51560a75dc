//! Cancellation reasons and the fire-once cancellation token.
//!
//! Cancellation is a first-class signal, not a silent drop. A
//! [`CancelToken`] is bound to an engine at construction; the engine
//! registers exactly one callback on it, and the token fires each callback
//! at most once. Reasons carry a [`CancelKind`] so observers can tell *why*
//! the work was abandoned.

use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;

/// The kind of cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit cancellation requested by user code.
    User,
    /// Cancellation due to a timeout or deadline.
    Timeout,
    /// Cancellation because a linked parent computation was cancelled.
    LinkedParent,
    /// Cancellation due to process or pool shutdown.
    Shutdown,
}

impl CancelKind {
    /// Returns the severity of this kind; higher severities win when strengthening.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::User => 0,
            Self::Timeout => 1,
            Self::LinkedParent => 2,
            Self::Shutdown => 3,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Timeout => write!(f, "timeout"),
            Self::LinkedParent => write!(f, "linked parent cancelled"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The reason for a cancellation: kind plus an optional static message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional human-readable message (static for determinism).
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason with the given kind and no message.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates a user cancellation reason with a message.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// Creates a timeout cancellation reason.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// Creates a linked-parent cancellation reason.
    #[must_use]
    pub const fn linked_parent() -> Self {
        Self::new(CancelKind::LinkedParent)
    }

    /// Creates a shutdown cancellation reason.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Strengthens this reason with another, keeping the more severe one.
    ///
    /// Returns `true` if the reason changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind > self.kind {
            self.kind = other.kind;
            self.message = other.message;
            return true;
        }
        if other.kind < self.kind {
            return false;
        }
        match (self.message, other.message) {
            (None, Some(msg)) => {
                self.message = Some(msg);
                true
            }
            (Some(current), Some(candidate)) if candidate < current => {
                self.message = Some(candidate);
                true
            }
            _ => false,
        }
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

type CancelCallback = Box<dyn FnOnce(&CancelReason) + Send>;

struct TokenState {
    cancelled: Option<CancelReason>,
    callbacks: Vec<CancelCallback>,
}

/// A cloneable cancellation token with fire-once callback registration.
///
/// All clones share the same state. The first `cancel` wins; later calls
/// are ignored. Callbacks registered after cancellation run immediately on
/// the registering thread.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CancelToken {
    /// Creates a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TokenState {
                cancelled: None,
                callbacks: Vec::new(),
            })),
        }
    }

    /// Returns true if the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled.is_some()
    }

    /// Returns the reason the token fired with, if it has.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.lock().cancelled.clone()
    }

    /// Fires the token with the given reason.
    ///
    /// Registered callbacks run synchronously on the calling thread, in
    /// registration order. Only the first call has any effect.
    pub fn cancel(&self, reason: CancelReason) {
        let callbacks = {
            let mut state = self.inner.lock();
            if state.cancelled.is_some() {
                return;
            }
            state.cancelled = Some(reason.clone());
            std::mem::take(&mut state.callbacks)
        };
        for cb in callbacks {
            cb(&reason);
        }
    }

    /// Registers a callback to run when the token fires.
    ///
    /// Each callback runs at most once. If the token already fired, the
    /// callback runs immediately on this thread.
    pub fn on_cancel(&self, callback: impl FnOnce(&CancelReason) + Send + 'static) {
        let reason = {
            let mut state = self.inner.lock();
            match state.cancelled.clone() {
                Some(reason) => reason,
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        // Fired already: run on the registering thread, outside the lock.
        callback(&reason);
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CancelToken")
            .field("cancelled", &state.cancelled)
            .field("pending_callbacks", &state.callbacks.len())
            .finish()
    }
}
