//! End-to-end dispatch flow: an enqueued run attempt is discovered,
//! dequeued, built into a job graph, submitted, marked completed, and its
//! sample's QC attributes are extracted from the tool reports.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use varpipe::config::{Settings, TARGET_WORKFLOW, UPSTREAM_WORKFLOW};
use varpipe::dao::{MemoryStore, MetadataStore};
use varpipe::executor::{BatchScheduler, RecordingScheduler};
use varpipe::extract;
use varpipe::graph::PipelineTool;
use varpipe::model::{Attribute, FileData, MimeType, RunState, Sample, WorkflowRunAttempt};
use varpipe::scheduler::Dispatcher;

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

struct Fixture {
    store: Arc<MemoryStore>,
    attempt: WorkflowRunAttempt,
    sample: Sample,
}

async fn seed(tmp: &Path) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let target = store.register_workflow(TARGET_WORKFLOW, "1.0").await;
    let upstream = store.register_workflow(UPSTREAM_WORKFLOW, "1.0").await;

    let sample = store
        .register_sample(Sample {
            id: 0,
            name: "S1".to_string(),
            barcode: "ACGTAC".to_string(),
            lane_index: 3,
            output_directory: tmp.to_path_buf(),
            flowcell_id: 11,
            sequencer_run_name: "120110_RUN".to_string(),
        })
        .await;

    // Upstream alignment artifact on disk, cataloged by producing job.
    let bam_name = varpipe::resolver::expected_bam_name(&sample);
    let bam_dir = tmp.join(UPSTREAM_WORKFLOW);
    std::fs::create_dir_all(&bam_dir).unwrap();
    std::fs::write(bam_dir.join(&bam_name), b"bam").unwrap();
    store
        .add_file_data(
            sample.id,
            FileData::new(&bam_dir, &bam_name, MimeType::ApplicationBam)
                .with_producing_job(varpipe::resolver::UPSTREAM_PRODUCING_JOB)
                .with_producing_workflow(upstream.id),
        )
        .await;

    // Tool reports, in place before dispatch so the post-completion
    // extraction task finds them.
    let out_dir = tmp.join(TARGET_WORKFLOW);
    std::fs::create_dir_all(&out_dir).unwrap();
    std::fs::write(out_dir.join("s1.realign.fix.pr.flagstat"), FLAGSTAT_REPORT).unwrap();
    std::fs::write(
        out_dir.join("s1.realign.fix.pr.coverage.sample_summary"),
        SAMPLE_SUMMARY,
    )
    .unwrap();
    std::fs::write(
        out_dir.join("s1.realign.fix.pr.coverage.sample_interval_summary"),
        INTERVAL_SUMMARY,
    )
    .unwrap();

    let attempt = store.register_run_attempt(target.id, vec![sample.id]).await;
    Fixture {
        store,
        attempt,
        sample,
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

fn value_of<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.as_str())
}

#[tokio::test]
async fn test_enqueued_attempt_runs_to_completion_with_attributes() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = seed(tmp.path()).await;
    let scheduler = Arc::new(RecordingScheduler::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&fixture.store) as Arc<dyn MetadataStore>,
        Arc::clone(&scheduler) as Arc<dyn BatchScheduler>,
        Settings::new().with_retry_policy(3, Duration::from_millis(1)),
    );

    dispatcher.tick().await.unwrap();

    let store = Arc::clone(&fixture.store);
    let workflow_id = fixture.attempt.workflow_id;
    let attempt_id = fixture.attempt.id;
    wait_until(|| {
        let store = Arc::clone(&store);
        async move {
            store
                .find_run_attempts_by_state(workflow_id, RunState::Completed)
                .await
                .unwrap()
                .iter()
                .any(|a| a.id == attempt_id)
        }
    })
    .await;

    // Exactly one submission carrying the full five-step graph.
    let submissions = scheduler.submissions().await;
    assert_eq!(submissions.len(), 1);
    let (submitted_id, graph) = &submissions[0];
    assert_eq!(*submitted_id, attempt_id);
    assert_eq!(graph.node_count(), 5);
    assert_eq!(graph.edges().len(), 4);
    let order = graph.validate().unwrap();
    assert_eq!(order.len(), 5);
    assert_eq!(graph.node(order[0]).tool, PipelineTool::PicardMarkDuplicates);

    // A second poll cycle finds nothing left to dequeue.
    dispatcher.tick().await.unwrap();
    assert_eq!(scheduler.submissions().await.len(), 1);

    // The fire-and-forget extraction eventually lands all QC attributes.
    let store = Arc::clone(&fixture.store);
    let sample_id = fixture.sample.id;
    wait_until(|| {
        let store = Arc::clone(&store);
        async move {
            store
                .find_attributes(sample_id)
                .await
                .unwrap()
                .iter()
                .any(|a| a.name == extract::ATTR_NUMBER_ON_TARGET)
        }
    })
    .await;

    let attributes = fixture.store.find_attributes(sample_id).await.unwrap();
    assert_eq!(
        value_of(&attributes, extract::ATTR_TOTAL_PASSED_READS),
        Some("50000")
    );
    assert_eq!(value_of(&attributes, extract::ATTR_ALIGNED), Some("98.00"));
    assert_eq!(value_of(&attributes, extract::ATTR_PAIRED), Some("96.00"));
    assert_eq!(
        value_of(&attributes, extract::ATTR_TOTAL_COVERAGE),
        Some("6535241443")
    );
    assert_eq!(value_of(&attributes, extract::ATTR_MEAN), Some("82.92"));
    assert_eq!(
        value_of(&attributes, extract::ATTR_TOTAL_COVERAGE_COUNT),
        Some("1000000")
    );
    assert_eq!(
        value_of(&attributes, extract::ATTR_NUMBER_ON_TARGET),
        Some("0.2")
    );
}

#[tokio::test]
async fn test_unresolvable_artifact_fails_the_attempt() {
    let tmp = tempfile::tempdir().unwrap();
    let fixture = seed(tmp.path()).await;

    // Remove the alignment artifact from disk; the catalog entry now
    // points at nothing and resolution is fatal.
    let bam_name = varpipe::resolver::expected_bam_name(&fixture.sample);
    std::fs::remove_file(tmp.path().join(UPSTREAM_WORKFLOW).join(&bam_name)).unwrap();

    let scheduler = Arc::new(RecordingScheduler::new());
    let dispatcher = Dispatcher::new(
        Arc::clone(&fixture.store) as Arc<dyn MetadataStore>,
        scheduler,
        Settings::new().with_retry_policy(2, Duration::from_millis(1)),
    );

    dispatcher.tick().await.unwrap();

    let store = Arc::clone(&fixture.store);
    let workflow_id = fixture.attempt.workflow_id;
    let attempt_id = fixture.attempt.id;
    wait_until(|| {
        let store = Arc::clone(&store);
        async move {
            store
                .find_run_attempts_by_state(workflow_id, RunState::Failed)
                .await
                .unwrap()
                .iter()
                .any(|a| a.id == attempt_id)
        }
    })
    .await;
}
