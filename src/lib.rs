//! varpipe: execution core of a variant-calling pipeline orchestrator.
//!
//! Given samples whose upstream alignment artifacts already exist, this
//! library builds a job graph of processing steps per sample, periodically
//! dispatches enqueued run attempts under bounded concurrency, and parses
//! tool-output reports into QC attributes after execution.

// Core modules
pub mod cli;
pub mod config;
pub mod dao;
pub mod error;
pub mod executor;
pub mod extract;
pub mod graph;
pub mod model;
pub mod resolver;
pub mod scheduler;

// Re-export commonly used error types
pub use error::{ExtractionError, GraphError, ResolutionError};
