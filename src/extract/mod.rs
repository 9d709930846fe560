//! Post-execution QC attribute extraction.
//!
//! After a run attempt completes, each of its samples gets a fire-and-forget
//! extraction task that locates the flagstat and depth-of-coverage reports,
//! parses them, and upserts the derived attributes. Missing files and
//! malformed tokens are logged and skipped; partial extraction is expected.
//!
//! Attribute writes for one sample are serialized through a per-sample
//! lock, so the read-modify-write behind `numberOnTarget` can never race
//! another extraction routine on the same sample.

pub mod coverage;
pub mod flagstat;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::TARGET_WORKFLOW;
use crate::dao::MetadataStore;
use crate::error::ExtractionError;
use crate::model::{EntityId, MimeType, Sample};

pub use coverage::{
    parse_interval_summary, parse_sample_summary, ATTR_MEAN, ATTR_NUMBER_ON_TARGET,
    ATTR_TOTAL_COVERAGE, ATTR_TOTAL_COVERAGE_COUNT,
};
pub use flagstat::{parse_flagstat, ATTR_ALIGNED, ATTR_PAIRED, ATTR_TOTAL_PASSED_READS};

const FLAGSTAT_SUFFIX: &str = ".flagstat";
const SAMPLE_SUMMARY_SUFFIX: &str = ".coverage.sample_summary";
const INTERVAL_SUMMARY_SUFFIX: &str = ".coverage.sample_interval_summary";

/// Selects the samples an extraction pass runs over: one sample by id, or
/// every sample on a flowcell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleSelector {
    pub sample_id: Option<EntityId>,
    pub flowcell_id: Option<EntityId>,
}

impl SampleSelector {
    pub fn by_sample(sample_id: EntityId) -> Self {
        Self {
            sample_id: Some(sample_id),
            flowcell_id: None,
        }
    }

    pub fn by_flowcell(flowcell_id: EntityId) -> Self {
        Self {
            sample_id: None,
            flowcell_id: Some(flowcell_id),
        }
    }

    /// Resolves the selector against the store. A sample id takes
    /// precedence when both are set.
    pub async fn collect(
        &self,
        store: &dyn MetadataStore,
    ) -> Result<Vec<Sample>, ExtractionError> {
        if let Some(sample_id) = self.sample_id {
            let sample = store
                .find_sample_by_id(sample_id)
                .await?
                .ok_or(ExtractionError::SampleNotFound(sample_id))?;
            return Ok(vec![sample]);
        }
        if let Some(flowcell_id) = self.flowcell_id {
            return Ok(store.find_samples_by_flowcell(flowcell_id).await?);
        }
        Err(ExtractionError::EmptySelector)
    }
}

/// Parses tool-output reports and upserts QC attributes on samples.
pub struct ExtractionService {
    store: Arc<dyn MetadataStore>,
    locks: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl ExtractionService {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn sample_lock(&self, sample_id: EntityId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .await
                .entry(sample_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Launches a detached extraction task for one sample. Failures are
    /// logged; the caller never observes them.
    pub fn spawn_for_sample(self: &Arc<Self>, sample_id: EntityId) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.extract_for_sample(sample_id).await {
                error!(sample_id, error = %e, "attribute extraction failed");
            }
        });
    }

    /// Runs flagstat and coverage extraction for one sample, in that order
    /// so `numberOnTarget` can see `totalPassedReads`.
    pub async fn extract_for_sample(&self, sample_id: EntityId) -> Result<(), ExtractionError> {
        let sample = self
            .store
            .find_sample_by_id(sample_id)
            .await?
            .ok_or(ExtractionError::SampleNotFound(sample_id))?;
        if sample.is_undetermined() {
            return Ok(());
        }

        let lock = self.sample_lock(sample.id).await;
        let _guard = lock.lock().await;
        self.flagstat_for_sample(&sample).await?;
        self.coverage_for_sample(&sample).await?;
        Ok(())
    }

    /// Extracts flagstat attributes for every sample the selector matches.
    pub async fn save_flagstat_attributes(
        &self,
        selector: &SampleSelector,
    ) -> Result<(), ExtractionError> {
        for sample in selector.collect(self.store.as_ref()).await? {
            if sample.is_undetermined() {
                continue;
            }
            let lock = self.sample_lock(sample.id).await;
            let _guard = lock.lock().await;
            self.flagstat_for_sample(&sample).await?;
        }
        Ok(())
    }

    /// Extracts depth-of-coverage attributes for every sample the selector
    /// matches.
    pub async fn save_coverage_attributes(
        &self,
        selector: &SampleSelector,
    ) -> Result<(), ExtractionError> {
        for sample in selector.collect(self.store.as_ref()).await? {
            if sample.is_undetermined() {
                continue;
            }
            let lock = self.sample_lock(sample.id).await;
            let _guard = lock.lock().await;
            self.coverage_for_sample(&sample).await?;
        }
        Ok(())
    }

    /// Caller holds the sample lock.
    async fn flagstat_for_sample(&self, sample: &Sample) -> Result<(), ExtractionError> {
        let flagstat_path = match self.locate_flagstat(sample).await? {
            Some(path) => path,
            None => {
                warn!(sample_id = sample.id, "flagstat report not found, skipping");
                return Ok(());
            }
        };

        let text = match tokio::fs::read_to_string(&flagstat_path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    path = %flagstat_path.display(),
                    error = %e,
                    "could not read flagstat report, skipping"
                );
                return Ok(());
            }
        };

        for (name, value) in parse_flagstat(&text) {
            self.store.upsert_attribute(sample.id, &name, &value).await?;
        }
        info!(sample_id = sample.id, path = %flagstat_path.display(), "flagstat attributes saved");
        Ok(())
    }

    /// Caller holds the sample lock.
    async fn coverage_for_sample(&self, sample: &Sample) -> Result<(), ExtractionError> {
        let output_directory = sample.output_directory.join(TARGET_WORKFLOW);
        if !output_directory.exists() {
            warn!(
                sample_id = sample.id,
                path = %output_directory.display(),
                "output directory missing, skipping coverage extraction"
            );
            return Ok(());
        }

        if let Some(path) = find_by_suffix(&output_directory, SAMPLE_SUMMARY_SUFFIX).await {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    if let Some((total_coverage, mean)) = parse_sample_summary(&text) {
                        self.store
                            .upsert_attribute(sample.id, ATTR_TOTAL_COVERAGE, &total_coverage)
                            .await?;
                        self.store
                            .upsert_attribute(sample.id, ATTR_MEAN, &mean)
                            .await?;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read sample summary")
                }
            }
        }

        if let Some(path) = find_by_suffix(&output_directory, INTERVAL_SUMMARY_SUFFIX).await {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let total_coverage_count = parse_interval_summary(&text);
                    self.store
                        .upsert_attribute(
                            sample.id,
                            ATTR_TOTAL_COVERAGE_COUNT,
                            &total_coverage_count.to_string(),
                        )
                        .await?;
                    self.save_number_on_target(sample, total_coverage_count)
                        .await?;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not read interval summary")
                }
            }
        }

        info!(sample_id = sample.id, "coverage attributes saved");
        Ok(())
    }

    /// Upserts the on-target ratio, but only when a prior flagstat pass
    /// already recorded `totalPassedReads`.
    async fn save_number_on_target(
        &self,
        sample: &Sample,
        total_coverage_count: u64,
    ) -> Result<(), ExtractionError> {
        let attributes = self.store.find_attributes(sample.id).await?;
        let total_passed_reads = attributes
            .iter()
            .find(|a| a.name == ATTR_TOTAL_PASSED_READS)
            .and_then(|a| a.value.parse::<u64>().ok());

        if let Some(total_passed_reads) = total_passed_reads {
            let ratio = total_coverage_count as f64 / (total_passed_reads * 100) as f64;
            self.store
                .upsert_attribute(sample.id, ATTR_NUMBER_ON_TARGET, &ratio.to_string())
                .await?;
        }
        Ok(())
    }

    /// Locates the flagstat report: cataloged files first, then a listing
    /// of the workflow output directory.
    async fn locate_flagstat(&self, sample: &Sample) -> Result<Option<PathBuf>, ExtractionError> {
        for file_data in self.store.find_file_data(sample.id).await? {
            if file_data.mime_type == MimeType::TextStatSummary
                && file_data.name.ends_with(FLAGSTAT_SUFFIX)
            {
                return Ok(Some(file_data.full_path()));
            }
        }
        let output_directory = sample.output_directory.join(TARGET_WORKFLOW);
        Ok(find_by_suffix(&output_directory, FLAGSTAT_SUFFIX).await)
    }
}

/// First file in `dir` whose name ends with `suffix`, if any. An unreadable
/// directory is treated as empty.
pub(crate) async fn find_by_suffix(dir: &Path, suffix: &str) -> Option<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return None,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            return Some(entry.path());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::dao::MemoryStore;
    use crate::model::{Attribute, FileData};

    const FLAGSTAT_REPORT: &str = "\
50000 + 0 in total (QC-passed reads + QC-failed reads)
49000 + 0 mapped (98.00%:-nan%)
48000 + 0 properly paired (96.00%:-nan%)
";

    const SAMPLE_SUMMARY: &str = "sample_id\ttotal\tmean\tgranular_third_quartile\n\
                                  S1\t6535241443\t82.92\t101\n\
                                  Total\t6535241443\t82.92\t101\n";

    const INTERVAL_SUMMARY: &str = "Target\ttotal_coverage\taverage_coverage\n\
                                    chr1:100-200\t600000\t42.1\n\
                                    chr1:300-400\t400000\t37.9\n";

    async fn seeded_sample(store: &MemoryStore, tmp: &Path, barcode: &str) -> Sample {
        store
            .register_sample(Sample {
                id: 0,
                name: "S1".to_string(),
                barcode: barcode.to_string(),
                lane_index: 3,
                output_directory: tmp.to_path_buf(),
                flowcell_id: 9,
                sequencer_run_name: "RUN1".to_string(),
            })
            .await
    }

    fn write_reports(tmp: &Path) {
        let dir = tmp.join(TARGET_WORKFLOW);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("s1.realign.fix.pr.flagstat"), FLAGSTAT_REPORT).unwrap();
        std::fs::write(dir.join("s1.realign.fix.pr.coverage.sample_summary"), SAMPLE_SUMMARY)
            .unwrap();
        std::fs::write(
            dir.join("s1.realign.fix.pr.coverage.sample_interval_summary"),
            INTERVAL_SUMMARY,
        )
        .unwrap();
    }

    fn value_of<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
        attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    #[tokio::test]
    async fn test_full_extraction_including_on_target_ratio() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "ACGTAC").await;
        write_reports(tmp.path());

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service.extract_for_sample(sample.id).await.unwrap();

        let attributes = store.find_attributes(sample.id).await.unwrap();
        assert_eq!(value_of(&attributes, ATTR_TOTAL_PASSED_READS), Some("50000"));
        assert_eq!(value_of(&attributes, ATTR_ALIGNED), Some("98.00"));
        assert_eq!(value_of(&attributes, ATTR_PAIRED), Some("96.00"));
        assert_eq!(value_of(&attributes, ATTR_TOTAL_COVERAGE), Some("6535241443"));
        assert_eq!(value_of(&attributes, ATTR_MEAN), Some("82.92"));
        assert_eq!(value_of(&attributes, ATTR_TOTAL_COVERAGE_COUNT), Some("1000000"));
        // 1000000 / (50000 * 100)
        assert_eq!(value_of(&attributes, ATTR_NUMBER_ON_TARGET), Some("0.2"));
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "ACGTAC").await;
        write_reports(tmp.path());

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service.extract_for_sample(sample.id).await.unwrap();
        service.extract_for_sample(sample.id).await.unwrap();

        let attributes = store.find_attributes(sample.id).await.unwrap();
        assert_eq!(attributes.len(), 7);
    }

    #[tokio::test]
    async fn test_undetermined_sample_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "Undetermined").await;
        write_reports(tmp.path());

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service.extract_for_sample(sample.id).await.unwrap();

        assert!(store.find_attributes(sample.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_reports_skip_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "ACGTAC").await;

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service.extract_for_sample(sample.id).await.unwrap();

        assert!(store.find_attributes(sample.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cataloged_flagstat_takes_precedence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "ACGTAC").await;

        // No workflow output directory; only a cataloged report elsewhere.
        let elsewhere = tmp.path().join("archive");
        std::fs::create_dir_all(&elsewhere).unwrap();
        std::fs::write(elsewhere.join("s1.flagstat"), FLAGSTAT_REPORT).unwrap();
        store
            .add_file_data(
                sample.id,
                FileData::new(&elsewhere, "s1.flagstat", MimeType::TextStatSummary),
            )
            .await;

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service
            .save_flagstat_attributes(&SampleSelector::by_sample(sample.id))
            .await
            .unwrap();

        let attributes = store.find_attributes(sample.id).await.unwrap();
        assert_eq!(value_of(&attributes, ATTR_TOTAL_PASSED_READS), Some("50000"));
    }

    #[tokio::test]
    async fn test_on_target_ratio_requires_total_passed_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sample = seeded_sample(&store, tmp.path(), "ACGTAC").await;
        write_reports(tmp.path());

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service
            .save_coverage_attributes(&SampleSelector::by_sample(sample.id))
            .await
            .unwrap();

        let attributes = store.find_attributes(sample.id).await.unwrap();
        assert_eq!(value_of(&attributes, ATTR_TOTAL_COVERAGE_COUNT), Some("1000000"));
        assert_eq!(value_of(&attributes, ATTR_NUMBER_ON_TARGET), None);
    }

    #[tokio::test]
    async fn test_flowcell_selector_covers_all_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let first = seeded_sample(&store, tmp.path(), "ACGTAC").await;
        let second = seeded_sample(&store, tmp.path(), "TGCATG").await;
        write_reports(tmp.path());

        let service = ExtractionService::new(Arc::clone(&store) as Arc<dyn MetadataStore>);
        service
            .save_flagstat_attributes(&SampleSelector::by_flowcell(first.flowcell_id))
            .await
            .unwrap();

        for sample in [&first, &second] {
            let attributes = store.find_attributes(sample.id).await.unwrap();
            assert_eq!(value_of(&attributes, ATTR_TOTAL_PASSED_READS), Some("50000"));
        }
    }

    #[tokio::test]
    async fn test_empty_selector_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let service = ExtractionService::new(store as Arc<dyn MetadataStore>);
        let result = service
            .save_flagstat_attributes(&SampleSelector::default())
            .await;
        assert!(matches!(result, Err(ExtractionError::EmptySelector)));
    }
}
