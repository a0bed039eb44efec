//! Deployment worker
//!
//! Admission, the durable task queue, the worker pool that drains it, the
//! deployment engine each worker runs, and the reconciler that cleans up
//! after workers that never finished.

pub mod admission;
pub mod engine;
pub mod pool;
pub mod queue;
pub mod reconcile;

pub use admission::{admit, Admission, PushRequest};
pub use engine::DeploymentEngine;
pub use pool::{run_task, WorkerPool};
pub use queue::{ClaimedTask, SqliteTaskQueue, TaskHandle, TaskQueue};
pub use reconcile::{ReconciledAttempt, Reconciler, TIMED_OUT_EXIT_CODE};
