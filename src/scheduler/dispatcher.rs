//! Workflow run dispatcher.
//!
//! A single-threaded periodic poller: every tick it resizes the worker
//! pool to the configured limits, discovers run attempts in `Enqueued`
//! state for the target workflow, persists their transition to `Dequeued`
//! and submits a graph-execution unit to the pool, fire-and-forget. The
//! poll loop never blocks on a submitted unit; execution spawned by prior
//! ticks may still be in flight when a later tick runs.
//!
//! The dispatcher owns all run-attempt state transitions. The transition
//! to `Dequeued` is persisted *before* dispatch so a concurrent poll cycle
//! cannot re-dequeue the same attempt. A unit retries submission a bounded
//! number of times with exponential backoff, then persists the terminal
//! `Failed` state; on success it persists `Completed` and launches
//! attribute extraction per sample.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::{Settings, TARGET_WORKFLOW, UPSTREAM_WORKFLOW};
use crate::dao::{DaoError, MetadataStore};
use crate::error::GraphError;
use crate::executor::{BatchScheduler, SubmitError};
use crate::extract::ExtractionService;
use crate::graph::{GraphBuilder, SampleInputs};
use crate::model::{RunState, WorkflowRunAttempt};

use super::worker_pool::WorkerPool;

/// Fixed delay between service start and the first tick.
pub const INITIAL_DELAY: Duration = Duration::from_secs(60);

/// Errors that can abort a single dispatcher tick.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("store error: {0}")]
    Dao(#[from] DaoError),

    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),
}

/// Errors inside one graph-execution unit.
#[derive(Debug, Error)]
enum RunError {
    #[error("store error: {0}")]
    Dao(#[from] DaoError),

    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),

    #[error("graph construction failed: {0}")]
    Graph(#[from] GraphError),

    #[error("submission failed: {0}")]
    Submit(#[from] SubmitError),
}

/// Periodic poller that dispatches enqueued run attempts.
pub struct Dispatcher {
    store: Arc<dyn MetadataStore>,
    scheduler: Arc<dyn BatchScheduler>,
    pool: Arc<WorkerPool>,
    extraction: Arc<ExtractionService>,
    settings: Arc<Settings>,
    /// Workflow-definition version stamped onto attempts at dequeue time.
    version: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        scheduler: Arc<dyn BatchScheduler>,
        settings: Settings,
    ) -> Self {
        let pool = Arc::new(WorkerPool::new(
            settings.core_pool_size,
            settings.max_pool_size,
        ));
        let extraction = Arc::new(ExtractionService::new(Arc::clone(&store)));
        Self {
            store,
            scheduler,
            pool,
            extraction,
            settings: Arc::new(settings),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Runs the poll loop until a shutdown signal arrives.
    ///
    /// Waits the fixed initial delay, then ticks on the configured period.
    /// A failed tick is logged and retried from scratch on the next tick.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            period_minutes = self.settings.period_minutes,
            "dispatcher started"
        );

        tokio::select! {
            _ = tokio::time::sleep(INITIAL_DELAY) => {}
            _ = shutdown_rx.recv() => {
                self.pool.shutdown();
                return;
            }
        }

        let mut interval = tokio::time::interval(self.settings.period());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "dispatcher tick aborted");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("dispatcher shutting down");
                    self.pool.shutdown();
                    return;
                }
            }
        }
    }

    /// One poll cycle: resize, discover, transition, submit.
    pub async fn tick(&self) -> Result<(), DispatchError> {
        self.pool
            .resize(self.settings.core_pool_size, self.settings.max_pool_size);

        let stats = self.pool.stats();
        info!(
            active = stats.active,
            submitted = stats.submitted,
            completed = stats.completed,
            "dispatcher tick"
        );

        let workflow = self
            .store
            .find_workflow_by_name(TARGET_WORKFLOW)
            .await?
            .ok_or_else(|| DispatchError::WorkflowNotFound(TARGET_WORKFLOW.to_string()))?;

        let attempts = self
            .store
            .find_run_attempts_by_state(workflow.id, RunState::Enqueued)
            .await?;
        if attempts.is_empty() {
            return Ok(());
        }

        info!(count = attempts.len(), "dequeuing run attempts");
        for mut attempt in attempts {
            attempt.mark_dequeued(&self.version);
            // Persisted before dispatch so the next cycle cannot re-dequeue.
            self.store.save_run_attempt(&attempt).await?;

            let unit = RunUnit {
                store: Arc::clone(&self.store),
                scheduler: Arc::clone(&self.scheduler),
                extraction: Arc::clone(&self.extraction),
                settings: Arc::clone(&self.settings),
                attempt,
            };
            if let Err(e) = self.pool.submit(unit.execute()) {
                warn!(error = %e, "worker pool rejected unit");
            }
        }

        Ok(())
    }
}

/// One dequeued run attempt being driven to a terminal state.
struct RunUnit {
    store: Arc<dyn MetadataStore>,
    scheduler: Arc<dyn BatchScheduler>,
    extraction: Arc<ExtractionService>,
    settings: Arc<Settings>,
    attempt: WorkflowRunAttempt,
}

impl RunUnit {
    async fn execute(mut self) {
        let attempt_id = self.attempt.id;
        match self.submit_with_retries().await {
            Ok(()) => {
                self.attempt.mark_completed();
                if let Err(e) = self.store.save_run_attempt(&self.attempt).await {
                    error!(attempt_id, error = %e, "failed to persist completion");
                }
                info!(attempt_id, "run attempt completed");
                for sample_id in &self.attempt.sample_ids {
                    self.extraction.spawn_for_sample(*sample_id);
                }
            }
            Err(e) => {
                error!(attempt_id, error = %e, "run attempt failed terminally");
                self.attempt.mark_failed();
                if let Err(e) = self.store.save_run_attempt(&self.attempt).await {
                    error!(attempt_id, error = %e, "failed to persist failure");
                }
            }
        }
    }

    /// Builds and submits the graph, retrying with exponential backoff up
    /// to the configured attempt bound.
    async fn submit_with_retries(&mut self) -> Result<(), RunError> {
        self.attempt.max_attempts = self.settings.max_submit_attempts;
        loop {
            self.attempt.increment_attempts();
            match self.build_and_submit().await {
                Ok(()) => return Ok(()),
                Err(e) if self.attempt.should_retry() => {
                    let backoff = self.settings.retry_backoff
                        * 2u32.saturating_pow(self.attempt.attempts - 1);
                    warn!(
                        attempt_id = self.attempt.id,
                        attempts = self.attempt.attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "submission failed, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn build_and_submit(&self) -> Result<(), RunError> {
        let upstream = self
            .store
            .find_workflow_by_name(UPSTREAM_WORKFLOW)
            .await?
            .ok_or_else(|| RunError::WorkflowNotFound(UPSTREAM_WORKFLOW.to_string()))?;

        let mut samples = Vec::with_capacity(self.attempt.sample_ids.len());
        for sample_id in &self.attempt.sample_ids {
            let sample = self
                .store
                .find_sample_by_id(*sample_id)
                .await?
                .ok_or(DaoError::NotFound {
                    kind: "sample",
                    id: *sample_id,
                })?;
            let file_data = self.store.find_file_data(*sample_id).await?;
            samples.push(SampleInputs { sample, file_data });
        }

        let graph = GraphBuilder::new(&self.settings).build(&upstream, &samples)?;
        self.scheduler.submit(self.attempt.id, &graph).await?;
        Ok(())
    }
}
