//! Bounded worker pool for graph execution units.
//!
//! The pool limits the number of *concurrently executing graphs*; job-level
//! concurrency inside a graph is the external batch scheduler's business.
//! The bound is re-read every dispatcher tick and may change at runtime:
//! growing adds permits immediately, shrinking drains permits as running
//! units finish, and queued units are never lost by a resize. Shutdown
//! cancels units that have not started; running ones finish.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};

/// Errors that can occur when submitting to the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    /// Steady-state size from the last resize.
    pub core_size: usize,
    /// Concurrency bound from the last resize.
    pub max_size: usize,
    /// Units accepted since startup.
    pub submitted: u64,
    /// Units currently executing.
    pub active: u64,
    /// Units finished (successfully or not).
    pub completed: u64,
    /// Units cancelled by shutdown before starting.
    pub cancelled: u64,
}

#[derive(Default)]
struct SharedStats {
    submitted: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
}

/// Semaphore-bounded pool of fire-and-forget execution units.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    core_size: AtomicUsize,
    max_size: AtomicUsize,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
    stats: Arc<SharedStats>,
}

impl WorkerPool {
    /// Creates a pool bounded at `max` concurrent units.
    pub fn new(core: usize, max: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            core_size: AtomicUsize::new(core),
            max_size: AtomicUsize::new(max),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            stats: Arc::new(SharedStats::default()),
        }
    }

    /// Applies new pool limits.
    ///
    /// Called on every dispatcher tick; a no-op when the sizes are
    /// unchanged. Shrinking never drops queued units: excess permits are
    /// reclaimed as running units release them.
    pub fn resize(&self, core: usize, max: usize) {
        self.core_size.store(core, Ordering::SeqCst);
        let previous = self.max_size.swap(max, Ordering::SeqCst);
        if max == previous {
            return;
        }

        info!(previous, core, max, "resizing worker pool");
        if max > previous {
            self.semaphore.add_permits(max - previous);
        } else {
            let semaphore = Arc::clone(&self.semaphore);
            let surplus = previous - max;
            tokio::spawn(async move {
                for _ in 0..surplus {
                    match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => permit.forget(),
                        Err(_) => break,
                    }
                }
            });
        }
    }

    /// Submits a unit of work, fire-and-forget.
    ///
    /// The unit waits for a permit before executing; the caller never
    /// blocks on the unit's completion.
    pub fn submit<F>(&self, unit: F) -> Result<(), PoolError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }

        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let semaphore = Arc::clone(&self.semaphore);
        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("unit cancelled before start");
                    stats.cancelled.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        stats.cancelled.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                },
            };

            stats.active.fetch_add(1, Ordering::SeqCst);
            unit.await;
            stats.active.fetch_sub(1, Ordering::SeqCst);
            stats.completed.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        });

        Ok(())
    }

    /// Shuts the pool down: queued units are cancelled, running units
    /// finish on their own.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down worker pool");
        if self.shutdown_tx.send(()).is_err() {
            warn!("no pending units to cancel");
        }
        self.semaphore.close();
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            core_size: self.core_size.load(Ordering::SeqCst),
            max_size: self.max_size.load(Ordering::SeqCst),
            submitted: self.stats.submitted.load(Ordering::SeqCst),
            active: self.stats.active.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            cancelled: self.stats.cancelled.load(Ordering::SeqCst),
        }
    }
}
