//! Alignment artifact resolution.
//!
//! Locates the BAM input for a sample using an ordered three-tier fallback,
//! first match wins:
//!
//! 1. Catalog lookup by producing job class, BAM mime type and upstream
//!    workflow id
//! 2. Catalog lookup by the expected file name
//! 3. Listing of the upstream workflow's output directory on disk
//!
//! Each tier is a pure lookup returning `Option<PathBuf>`. The winning path
//! must exist on disk or resolution fails; a resolution failure aborts the
//! whole run attempt's graph build.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::ResolutionError;
use crate::model::{FileData, MimeType, Sample, Workflow};

/// Job class that produces the consumable BAM in the upstream alignment
/// workflow.
pub const UPSTREAM_PRODUCING_JOB: &str = "PicardAddOrReplaceReadGroups";

/// Expected name of the upstream BAM for a sample.
///
/// The lane index is zero-padded to three digits; the template must be
/// reproduced exactly or catalog and directory matching silently miss.
pub fn expected_bam_name(sample: &Sample) -> String {
    format!(
        "{}_{}_L{:03}.fixed-rg.bam",
        sample.sequencer_run_name, sample.barcode, sample.lane_index
    )
}

/// Resolves the BAM input for `sample`.
///
/// `file_data` is the sample's catalog; `upstream` is the alignment
/// workflow whose output is consumed.
pub fn resolve_bam(
    sample: &Sample,
    file_data: &[FileData],
    upstream: &Workflow,
) -> Result<PathBuf, ResolutionError> {
    let expected = expected_bam_name(sample);
    let upstream_dir = sample.output_directory.join(&upstream.name);

    let resolved = catalog_by_producing_job(file_data, upstream.id)
        .or_else(|| {
            debug!(sample = %sample.name, expected = %expected, "catalog lookup by producing job missed");
            catalog_by_name(file_data, &expected)
        })
        .or_else(|| {
            debug!(sample = %sample.name, expected = %expected, "catalog lookup by name missed, listing directory");
            directory_listing(&upstream_dir, &expected)
        });

    let path = resolved.ok_or_else(|| ResolutionError::NotFound {
        sample: sample.name.clone(),
    })?;

    if !path.exists() {
        return Err(ResolutionError::Missing { path });
    }

    Ok(path)
}

/// Tier 1: cataloged file produced by the known upstream job class, of BAM
/// mime type, belonging to the upstream workflow.
fn catalog_by_producing_job(file_data: &[FileData], upstream_id: u64) -> Option<PathBuf> {
    file_data
        .iter()
        .find(|fd| {
            fd.mime_type == MimeType::ApplicationBam
                && fd.producing_job.as_deref() == Some(UPSTREAM_PRODUCING_JOB)
                && fd.producing_workflow_id == Some(upstream_id)
        })
        .map(FileData::full_path)
}

/// Tier 2: cataloged file whose name matches the expected template exactly.
fn catalog_by_name(file_data: &[FileData], expected: &str) -> Option<PathBuf> {
    file_data
        .iter()
        .find(|fd| fd.name == expected)
        .map(FileData::full_path)
}

/// Tier 3: entry of the upstream output directory matching the expected
/// name exactly.
fn directory_listing(dir: &Path, expected: &str) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not list upstream output directory");
            return None;
        }
    };
    entries
        .flatten()
        .find(|entry| entry.file_name().to_string_lossy() == expected)
        .map(|entry| entry.path())
}
