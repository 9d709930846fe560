//! Error types shared across the orchestrator's subsystems.
//!
//! Module-local errors (`DaoError`, `PoolError`, `SubmitError`,
//! `ConfigError`) live next to their subsystems; the enums here are the
//! ones that cross module boundaries:
//!
//! - Artifact resolution (fatal for a run attempt's graph build)
//! - Graph construction
//! - Attribute extraction

use std::path::PathBuf;

use thiserror::Error;

use crate::dao::DaoError;
use crate::model::EntityId;

/// Errors that can occur while resolving a sample's alignment artifact.
///
/// Resolution failure is fatal for the whole run attempt: no partial graph
/// is emitted.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no alignment artifact found for sample '{sample}'")]
    NotFound { sample: String },

    #[error("resolved artifact does not exist on disk: {}", path.display())]
    Missing { path: PathBuf },
}

/// Errors that can occur during job-graph construction.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("artifact resolution failed: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("dependency edge references a node outside the graph")]
    UnknownNode,

    #[error("job graph contains a cycle")]
    Cycle,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during attribute extraction.
///
/// Missing output files and malformed numeric tokens are *not* errors:
/// they are logged and skip only the affected file or attribute.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("either a sample id or a flowcell id is required")]
    EmptySelector,

    #[error("sample {0} not found")]
    SampleNotFound(EntityId),

    #[error("store error: {0}")]
    Dao(#[from] DaoError),
}
