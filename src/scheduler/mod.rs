//! Periodic dispatch of enqueued workflow runs onto a bounded worker pool.

mod dispatcher;
mod worker_pool;

pub use dispatcher::{DispatchError, Dispatcher, INITIAL_DELAY};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
