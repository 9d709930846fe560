//! Persistence collaborator.
//!
//! Storage of samples, workflows, run attempts and attributes is owned by an
//! external system. `MetadataStore` is the seam this crate talks through;
//! `MemoryStore` is the bundled in-process implementation used by tests and
//! the standalone binary.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Attribute, EntityId, FileData, RunState, Sample, Workflow, WorkflowRunAttempt};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum DaoError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: EntityId },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// The persistence collaborator.
///
/// `upsert_attribute` must be atomic per call: concurrent upserts of the
/// same name on the same sample must never yield duplicates. Callers that
/// need read-modify-write across several attributes serialize through a
/// per-sample lock (see `extract::ExtractionService`).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Looks up a workflow definition by name.
    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, DaoError>;

    /// Returns all run attempts of `workflow_id` currently in `state`.
    async fn find_run_attempts_by_state(
        &self,
        workflow_id: EntityId,
        state: RunState,
    ) -> Result<Vec<WorkflowRunAttempt>, DaoError>;

    /// Persists a run attempt, overwriting any previous version.
    async fn save_run_attempt(&self, attempt: &WorkflowRunAttempt) -> Result<(), DaoError>;

    /// Looks up a sample by id.
    async fn find_sample_by_id(&self, id: EntityId) -> Result<Option<Sample>, DaoError>;

    /// Returns all samples on a flowcell.
    async fn find_samples_by_flowcell(
        &self,
        flowcell_id: EntityId,
    ) -> Result<Vec<Sample>, DaoError>;

    /// Returns the cataloged files of a sample.
    async fn find_file_data(&self, sample_id: EntityId) -> Result<Vec<FileData>, DaoError>;

    /// Returns the attributes of a sample.
    async fn find_attributes(&self, sample_id: EntityId) -> Result<Vec<Attribute>, DaoError>;

    /// Upserts one attribute on a sample, atomically.
    async fn upsert_attribute(
        &self,
        sample_id: EntityId,
        name: &str,
        value: &str,
    ) -> Result<(), DaoError>;
}
