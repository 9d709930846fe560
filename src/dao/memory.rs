//! In-memory metadata store.
//!
//! Backs tests and the standalone binary. All maps live behind a single
//! `RwLock`, which makes every trait method atomic; production deployments
//! plug in their own `MetadataStore` over real storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::model::{
    self, Attribute, EntityId, FileData, RunState, Sample, Workflow, WorkflowRunAttempt,
};

use super::{DaoError, MetadataStore};

#[derive(Default)]
struct State {
    workflows: HashMap<EntityId, Workflow>,
    attempts: HashMap<EntityId, WorkflowRunAttempt>,
    samples: HashMap<EntityId, Sample>,
    file_data: HashMap<EntityId, Vec<FileData>>,
    attributes: HashMap<EntityId, Vec<Attribute>>,
}

/// In-memory `MetadataStore` implementation.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> EntityId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a workflow definition and returns it with its assigned id.
    pub async fn register_workflow(
        &self,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Workflow {
        let workflow = Workflow {
            id: self.allocate_id(),
            name: name.into(),
            version: version.into(),
        };
        self.state
            .write()
            .await
            .workflows
            .insert(workflow.id, workflow.clone());
        workflow
    }

    /// Registers a sample, assigning it an id.
    pub async fn register_sample(&self, mut sample: Sample) -> Sample {
        sample.id = self.allocate_id();
        self.state
            .write()
            .await
            .samples
            .insert(sample.id, sample.clone());
        sample
    }

    /// Enqueues a new run attempt for a workflow over the given samples.
    pub async fn register_run_attempt(
        &self,
        workflow_id: EntityId,
        sample_ids: Vec<EntityId>,
    ) -> WorkflowRunAttempt {
        let attempt = WorkflowRunAttempt::new(self.allocate_id(), workflow_id, sample_ids);
        self.state
            .write()
            .await
            .attempts
            .insert(attempt.id, attempt.clone());
        attempt
    }

    /// Catalogs a file against a sample.
    pub async fn add_file_data(&self, sample_id: EntityId, file_data: FileData) {
        self.state
            .write()
            .await
            .file_data
            .entry(sample_id)
            .or_default()
            .push(file_data);
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, DaoError> {
        let state = self.state.read().await;
        Ok(state.workflows.values().find(|w| w.name == name).cloned())
    }

    async fn find_run_attempts_by_state(
        &self,
        workflow_id: EntityId,
        state: RunState,
    ) -> Result<Vec<WorkflowRunAttempt>, DaoError> {
        let guard = self.state.read().await;
        let mut attempts: Vec<_> = guard
            .attempts
            .values()
            .filter(|a| a.workflow_id == workflow_id && a.state == state)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.id);
        Ok(attempts)
    }

    async fn save_run_attempt(&self, attempt: &WorkflowRunAttempt) -> Result<(), DaoError> {
        self.state
            .write()
            .await
            .attempts
            .insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn find_sample_by_id(&self, id: EntityId) -> Result<Option<Sample>, DaoError> {
        Ok(self.state.read().await.samples.get(&id).cloned())
    }

    async fn find_samples_by_flowcell(
        &self,
        flowcell_id: EntityId,
    ) -> Result<Vec<Sample>, DaoError> {
        let state = self.state.read().await;
        let mut samples: Vec<_> = state
            .samples
            .values()
            .filter(|s| s.flowcell_id == flowcell_id)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.id);
        Ok(samples)
    }

    async fn find_file_data(&self, sample_id: EntityId) -> Result<Vec<FileData>, DaoError> {
        let state = self.state.read().await;
        Ok(state.file_data.get(&sample_id).cloned().unwrap_or_default())
    }

    async fn find_attributes(&self, sample_id: EntityId) -> Result<Vec<Attribute>, DaoError> {
        let state = self.state.read().await;
        Ok(state.attributes.get(&sample_id).cloned().unwrap_or_default())
    }

    async fn upsert_attribute(
        &self,
        sample_id: EntityId,
        name: &str,
        value: &str,
    ) -> Result<(), DaoError> {
        let mut state = self.state.write().await;
        if !state.samples.contains_key(&sample_id) {
            return Err(DaoError::NotFound {
                kind: "sample",
                id: sample_id,
            });
        }
        let attributes = state.attributes.entry(sample_id).or_default();
        model::upsert_attribute(attributes, name, value);
        Ok(())
    }
}
