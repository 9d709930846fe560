//! Batch-scheduler collaborator.
//!
//! Actual execution of pipeline steps is delegated to an external batch
//! scheduler that accepts a job description and file-transfer list per node
//! plus the dependency edge set. This crate only produces and submits that
//! description; the only signal back is success or failure at the attempt
//! level.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::graph::JobGraph;
use crate::model::EntityId;

/// Errors that can occur while submitting a graph.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submission rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The external batch scheduler.
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Submits the graph of `attempt_id` for execution.
    async fn submit(&self, attempt_id: EntityId, graph: &JobGraph) -> Result<(), SubmitError>;
}

#[derive(Serialize)]
struct Submission<'a> {
    attempt_id: EntityId,
    graph: &'a JobGraph,
}

/// Scheduler that spools submissions as JSON files for an external pickup
/// process. Used by the standalone binary.
pub struct SpoolScheduler {
    spool_dir: PathBuf,
}

impl SpoolScheduler {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
        }
    }
}

#[async_trait]
impl BatchScheduler for SpoolScheduler {
    async fn submit(&self, attempt_id: EntityId, graph: &JobGraph) -> Result<(), SubmitError> {
        tokio::fs::create_dir_all(&self.spool_dir).await?;
        let payload = serde_json::to_vec_pretty(&Submission { attempt_id, graph })?;
        let path = self.spool_dir.join(format!("attempt-{attempt_id}.json"));
        tokio::fs::write(&path, payload).await?;
        info!(attempt_id, path = %path.display(), nodes = graph.node_count(), "submission spooled");
        Ok(())
    }
}

/// Scheduler double that records submissions in memory, optionally failing
/// the first N calls. Useful for exercising dispatch and retry paths.
#[derive(Default)]
pub struct RecordingScheduler {
    submissions: tokio::sync::Mutex<Vec<(EntityId, JobGraph)>>,
    fail_first: std::sync::atomic::AtomicU32,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` submissions before accepting any.
    pub fn failing(count: u32) -> Self {
        Self {
            submissions: tokio::sync::Mutex::new(Vec::new()),
            fail_first: std::sync::atomic::AtomicU32::new(count),
        }
    }

    /// Submissions accepted so far.
    pub async fn submissions(&self) -> Vec<(EntityId, JobGraph)> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl BatchScheduler for RecordingScheduler {
    async fn submit(&self, attempt_id: EntityId, graph: &JobGraph) -> Result<(), SubmitError> {
        let remaining = self
            .fail_first
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |n| n.checked_sub(1),
            )
            .is_ok();
        if remaining {
            return Err(SubmitError::Rejected("injected failure".to_string()));
        }
        self.submissions
            .lock()
            .await
            .push((attempt_id, graph.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{JobGraph, JobNodeBuilder, PipelineTool};

    fn graph() -> JobGraph {
        let mut graph = JobGraph::default();
        graph.push_node(JobNodeBuilder::new(PipelineTool::SamtoolsFlagstat, "/work").build());
        graph
    }

    #[tokio::test]
    async fn test_spool_scheduler_writes_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let scheduler = SpoolScheduler::new(tmp.path().join("spool"));

        scheduler.submit(17, &graph()).await.unwrap();

        let path = tmp.path().join("spool/attempt-17.json");
        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed["attempt_id"], 17);
        assert_eq!(parsed["graph"]["nodes"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_recording_scheduler_fails_then_accepts() {
        let scheduler = RecordingScheduler::failing(2);
        let g = graph();

        assert!(scheduler.submit(1, &g).await.is_err());
        assert!(scheduler.submit(1, &g).await.is_err());
        assert!(scheduler.submit(1, &g).await.is_ok());
        assert_eq!(scheduler.submissions().await.len(), 1);
    }
}
