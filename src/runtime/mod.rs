//! Background dispatch runtime.
//!
//! Engines dispatch their deferred callbacks onto one process-wide
//! [`WorkerPool`], initialized lazily on first use with the default
//! configuration.

pub mod worker;

pub use worker::{SpawnError, WorkerPool, WorkerPoolConfig};

use std::sync::OnceLock;

static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();

/// Returns the process-wide worker pool, initializing it on first use.
pub fn global() -> &'static WorkerPool {
    GLOBAL.get_or_init(|| WorkerPool::new(WorkerPoolConfig::default()))
}
