//! Domain model for the pipeline orchestrator.
//!
//! This module defines the persistent entities the orchestrator works with:
//!
//! - `Sample`: a sequenced sample with its cataloged files and attributes
//! - `FileData`: a cataloged file associated with a sample
//! - `Attribute`: a named QC metric attached to a sample (upsert-by-name)
//! - `Workflow`: a logical pipeline definition
//! - `WorkflowRunAttempt`: one execution instance of a workflow with its
//!   lifecycle state machine

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier type for store-managed entities.
pub type EntityId = u64;

/// Barcode assigned to reads the demultiplexer could not attribute to a
/// sample. Samples carrying it are excluded from processing everywhere.
pub const UNDETERMINED_BARCODE: &str = "Undetermined";

/// Default maximum number of submission attempts for a run attempt.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Mime type of a cataloged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    /// Binary alignment (BAM) data.
    ApplicationBam,
    /// Plain-text statistics summary (flagstat and friends).
    TextStatSummary,
    /// Any other plain text output.
    TextPlain,
}

/// A file cataloged against a sample.
///
/// Carries enough provenance (producing job, producing workflow) to resolve
/// artifacts without touching the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    /// Directory the file lives in.
    pub path: PathBuf,
    /// Bare file name.
    pub name: String,
    /// Mime type of the file.
    pub mime_type: MimeType,
    /// Name of the job class that produced the file, when known.
    pub producing_job: Option<String>,
    /// Id of the workflow run that produced the file, when known.
    pub producing_workflow_id: Option<EntityId>,
}

impl FileData {
    /// Creates a cataloged file without provenance.
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, mime_type: MimeType) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            mime_type,
            producing_job: None,
            producing_workflow_id: None,
        }
    }

    /// Sets the producing job class.
    pub fn with_producing_job(mut self, job: impl Into<String>) -> Self {
        self.producing_job = Some(job.into());
        self
    }

    /// Sets the producing workflow id.
    pub fn with_producing_workflow(mut self, workflow_id: EntityId) -> Self {
        self.producing_workflow_id = Some(workflow_id);
        self
    }

    /// Full path of the file (directory joined with name).
    pub fn full_path(&self) -> PathBuf {
        self.path.join(&self.name)
    }
}

/// A named scalar metric attached to a sample.
///
/// Names are unique within a sample's attribute set; writes are upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Upserts `value` under `name` in a sample's attribute set.
///
/// If an attribute with the same name exists its value is overwritten in
/// place, otherwise a new attribute is appended. Never produces duplicates.
pub fn upsert_attribute(attributes: &mut Vec<Attribute>, name: &str, value: &str) {
    match attributes.iter_mut().find(|a| a.name == name) {
        Some(existing) => existing.value = value.to_string(),
        None => attributes.push(Attribute::new(name, value)),
    }
}

/// A sequenced sample whose upstream alignment artifacts already exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: EntityId,
    pub name: String,
    /// Demultiplexing barcode; `"Undetermined"` excludes the sample.
    pub barcode: String,
    /// Flowcell lane the sample was sequenced on.
    pub lane_index: u32,
    /// Root output directory for this sample's workflow results.
    pub output_directory: PathBuf,
    /// Owning flowcell.
    pub flowcell_id: EntityId,
    /// Name of the sequencer run that produced the sample.
    pub sequencer_run_name: String,
}

impl Sample {
    /// Whether this sample carries the undetermined barcode and must be
    /// skipped by every processing entry point.
    pub fn is_undetermined(&self) -> bool {
        self.barcode == UNDETERMINED_BARCODE
    }
}

/// A logical pipeline definition, identified by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: EntityId,
    pub name: String,
    pub version: String,
}

/// Lifecycle state of a workflow run attempt.
///
/// Legal transitions: `Enqueued -> Dequeued -> {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Waiting to be discovered by the dispatcher.
    Enqueued,
    /// Claimed by the dispatcher; execution in flight.
    Dequeued,
    /// Graph submission succeeded.
    Completed,
    /// Submission exhausted its retries.
    Failed,
}

impl RunState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Enqueued, RunState::Dequeued)
                | (RunState::Dequeued, RunState::Completed)
                | (RunState::Dequeued, RunState::Failed)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Enqueued => write!(f, "enqueued"),
            RunState::Dequeued => write!(f, "dequeued"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// One execution instance of a workflow for a batch of samples.
///
/// The dispatcher owns all state transitions; everything else treats run
/// attempts as read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRunAttempt {
    pub id: EntityId,
    pub workflow_id: EntityId,
    /// Samples processed by this attempt.
    pub sample_ids: Vec<EntityId>,
    /// Version of the workflow definition that processed the attempt,
    /// stamped at dequeue time.
    pub version: Option<String>,
    pub state: RunState,
    pub enqueued: DateTime<Utc>,
    pub dequeued: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// Number of submission attempts made so far.
    pub attempts: u32,
    /// Submission attempts allowed before the attempt is failed terminally.
    pub max_attempts: u32,
}

impl WorkflowRunAttempt {
    /// Creates a freshly enqueued run attempt.
    pub fn new(id: EntityId, workflow_id: EntityId, sample_ids: Vec<EntityId>) -> Self {
        Self {
            id,
            workflow_id,
            sample_ids,
            version: None,
            state: RunState::Enqueued,
            enqueued: Utc::now(),
            dequeued: None,
            finished: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the number of submission attempts allowed.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Stamps the dequeue timestamp and workflow version and moves the
    /// attempt to `Dequeued`.
    pub fn mark_dequeued(&mut self, version: &str) {
        self.version = Some(version.to_string());
        self.dequeued = Some(Utc::now());
        self.state = RunState::Dequeued;
    }

    /// Moves the attempt to its terminal `Completed` state.
    pub fn mark_completed(&mut self) {
        self.finished = Some(Utc::now());
        self.state = RunState::Completed;
    }

    /// Moves the attempt to its terminal `Failed` state.
    pub fn mark_failed(&mut self) {
        self.finished = Some(Utc::now());
        self.state = RunState::Failed;
    }

    /// Records one submission attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether another submission attempt is allowed after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
