//! Captured execution context.
//!
//! An [`ExecContext`] is an explicit value snapshotted when an engine is
//! constructed and passed into the dispatch call, so a deferred callback
//! runs "under" the context of whoever built it. The engine never consults
//! implicit ambient state; the only thread-local involved is the scope
//! marker set by [`ExecContext::scope`] so that code running inside a
//! callback can observe which context it was dispatched under.

use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Vec<ExecContext>> = const { RefCell::new(Vec::new()) };
}

/// A snapshot of the execution context an engine was constructed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    label: Arc<str>,
}

impl ExecContext {
    /// Captures the context of the calling thread.
    ///
    /// If the caller is itself running inside a [`scope`](Self::scope), the
    /// enclosing context is propagated; otherwise the thread name seeds a
    /// fresh context.
    #[must_use]
    pub fn capture() -> Self {
        if let Some(current) = Self::current() {
            return current;
        }
        let label = std::thread::current()
            .name()
            .unwrap_or("unnamed")
            .to_string();
        Self {
            label: Arc::from(label),
        }
    }

    /// Creates a context with an explicit label.
    #[must_use]
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: Arc::from(label.into()),
        }
    }

    /// Returns the context label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the context the calling thread is currently scoped under.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    /// Runs `f` with this context installed as the thread's current scope.
    ///
    /// Scopes nest; the previous scope is restored when `f` returns or
    /// unwinds.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ScopeGuard;
        f()
    }
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_outside_scope_uses_thread_name() {
        assert!(ExecContext::current().is_none());
        let ctx = ExecContext::capture();
        assert!(!ctx.label().is_empty());
    }

    #[test]
    fn scope_installs_and_restores() {
        let ctx = ExecContext::named("dispatcher");
        let observed = ctx.scope(|| ExecContext::current());
        assert_eq!(observed, Some(ctx));
        assert!(ExecContext::current().is_none());
    }

    #[test]
    fn scopes_nest() {
        let outer = ExecContext::named("outer");
        let inner = ExecContext::named("inner");
        outer.scope(|| {
            inner.scope(|| {
                assert_eq!(ExecContext::current(), Some(inner.clone()));
            });
            assert_eq!(ExecContext::current(), Some(outer.clone()));
        });
    }

    #[test]
    fn scope_restores_on_unwind() {
        let ctx = ExecContext::named("panicky");
        let result = std::panic::catch_unwind(|| {
            ctx.scope(|| panic!("boom"));
        });
        assert!(result.is_err());
        assert!(ExecContext::current().is_none());
    }

    #[test]
    fn capture_inside_scope_propagates() {
        let ctx = ExecContext::named("origin");
        let captured = ctx.scope(ExecContext::capture);
        assert_eq!(captured, ctx);
    }
}
