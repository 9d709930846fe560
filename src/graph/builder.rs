//! Job-graph construction for the variant-calling workflow.
//!
//! For each non-Undetermined sample the builder resolves the upstream BAM
//! and emits a fixed five-step chain:
//!
//! ```text
//! MarkDuplicates -> Index -> Flagstat
//!                        \-> DepthOfCoverage -> UnifiedGenotyper
//! ```
//!
//! The genotyper depends on coverage completing even though the two share
//! no data; downstream tooling relies on the resulting execution order, so
//! the edge is kept. Every derived file name is produced by substituting
//! the `.bam` suffix of its immediate predecessor; the suffixes are part
//! of the external file-format contract and must match byte for byte.

use tracing::{debug, info};

use crate::config::{Settings, TARGET_WORKFLOW};
use crate::error::GraphError;
use crate::model::{FileData, Sample, Workflow};
use crate::resolver;

use super::{JobGraph, JobNodeBuilder, NodeId, PipelineTool};

/// Argument flags of the pipeline tools. Fixed constants; only the values
/// coming from `Settings` and per-node file names vary.
pub mod arg {
    pub const INPUT: &str = "INPUT";
    pub const OUTPUT: &str = "OUTPUT";
    pub const METRICS_FILE: &str = "METRICS_FILE";
    pub const INPUT_FILE: &str = "INPUT_FILE";
    pub const OUTPUT_PREFIX: &str = "OUTPUT_PREFIX";
    pub const OUT: &str = "OUT";
    pub const KEY: &str = "KEY";
    pub const REFERENCE_SEQUENCE: &str = "REFERENCE_SEQUENCE";
    pub const PHONE_HOME: &str = "PHONE_HOME";
    pub const DOWNSAMPLING_TYPE: &str = "DOWNSAMPLING_TYPE";
    pub const VALIDATION_STRICTNESS: &str = "VALIDATION_STRICTNESS";
    pub const OMIT_DEPTH_OUTPUT_AT_EACH_BASE: &str = "OMIT_DEPTH_OUTPUT_AT_EACH_BASE";
    pub const INTERVALS: &str = "INTERVALS";
    pub const DBSNP: &str = "DBSNP";
    pub const GENOTYPE_LIKELIHOODS_MODEL: &str = "GENOTYPE_LIKELIHOODS_MODEL";
    pub const OUTPUT_MODE: &str = "OUTPUT_MODE";
    pub const ANNOTATION: &str = "ANNOTATION";
    pub const DOWNSAMPLE_TO_COVERAGE: &str = "DOWNSAMPLE_TO_COVERAGE";
    pub const STAND_CALL_CONF: &str = "STAND_CALL_CONF";
    pub const STAND_EMIT_CONF: &str = "STAND_EMIT_CONF";
    pub const NUM_THREADS: &str = "NUM_THREADS";
    pub const METRICS: &str = "METRICS";
}

/// Variant annotations requested from the genotyper, in submission order.
const GENOTYPER_ANNOTATIONS: [&str; 7] = [
    "AlleleBalance",
    "DepthOfCoverage",
    "HomopolymerRun",
    "MappingQualityZero",
    "QualByDepth",
    "RMSMappingQuality",
    "HaplotypeScore",
];

/// Suffixes of the six depth-of-coverage output files.
const COVERAGE_OUTPUT_SUFFIXES: [&str; 6] = [
    ".sample_cumulative_coverage_counts",
    ".sample_cumulative_coverage_proportions",
    ".sample_interval_statistics",
    ".sample_interval_summary",
    ".sample_statistics",
    ".sample_summary",
];

/// A sample together with its cataloged files, as gathered by the
/// dispatcher.
#[derive(Debug, Clone)]
pub struct SampleInputs {
    pub sample: Sample,
    pub file_data: Vec<FileData>,
}

/// Builds the job graph for one run attempt.
///
/// Pure with respect to persistent state: the only side effect is creating
/// the per-sample output directories the jobs run in.
pub struct GraphBuilder<'a> {
    settings: &'a Settings,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Builds the graph for `samples`, resolving each BAM against
    /// `upstream`.
    ///
    /// Undetermined samples are skipped. A resolution failure aborts the
    /// whole build; no partial graph is emitted.
    pub fn build(
        &self,
        upstream: &Workflow,
        samples: &[SampleInputs],
    ) -> Result<JobGraph, GraphError> {
        let mut graph = JobGraph::default();

        for inputs in samples {
            if inputs.sample.is_undetermined() {
                debug!(sample = %inputs.sample.name, "skipping undetermined sample");
                continue;
            }
            self.append_sample(&mut graph, upstream, inputs)?;
        }

        graph.validate()?;
        info!(
            nodes = graph.node_count(),
            edges = graph.edges().len(),
            "job graph built"
        );
        Ok(graph)
    }

    /// Appends the five-node chain for one sample.
    fn append_sample(
        &self,
        graph: &mut JobGraph,
        upstream: &Workflow,
        inputs: &SampleInputs,
    ) -> Result<(), GraphError> {
        let sample = &inputs.sample;
        let bam_path = resolver::resolve_bam(sample, &inputs.file_data, upstream)?;
        let bam_name = bam_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                GraphError::Resolution(crate::error::ResolutionError::Missing {
                    path: bam_path.clone(),
                })
            })?;

        let output_directory = sample.output_directory.join(TARGET_WORKFLOW);
        std::fs::create_dir_all(&output_directory)?;

        debug!(sample = %sample.name, bam = %bam_name, "appending sample chain");

        let deduped_bam = bam_name.replace(".bam", ".deduped.bam");
        let dedup_metrics = deduped_bam.replace(".bam", ".metrics");
        let dedup = graph.push_node(
            JobNodeBuilder::new(PipelineTool::PicardMarkDuplicates, &output_directory)
                .site(&self.settings.site_name)
                .argument(arg::INPUT, &bam_name)
                .argument(arg::OUTPUT, &deduped_bam)
                .argument(arg::METRICS_FILE, &dedup_metrics)
                .transfer_input(&bam_name)
                .transfer_output(&deduped_bam)
                .transfer_output(&dedup_metrics)
                .build(),
        );

        let deduped_bai = deduped_bam.replace(".bam", ".bai");
        let index = graph.push_node(
            JobNodeBuilder::new(PipelineTool::SamtoolsIndex, &output_directory)
                .site(&self.settings.site_name)
                .argument(arg::INPUT, &deduped_bam)
                .argument(arg::OUTPUT, &deduped_bai)
                .transfer_input(&deduped_bam)
                .transfer_output(&deduped_bai)
                .build(),
        );
        graph.add_edge(dedup, index);

        let flagstat_file = deduped_bam.replace(".bam", ".realign.fix.pr.flagstat");
        let flagstat = graph.push_node(
            JobNodeBuilder::new(PipelineTool::SamtoolsFlagstat, &output_directory)
                .site(&self.settings.site_name)
                .argument(arg::INPUT, &deduped_bam)
                .argument(arg::OUTPUT, &flagstat_file)
                .transfer_input(&deduped_bam)
                .transfer_input(&deduped_bai)
                .transfer_output(&flagstat_file)
                .build(),
        );
        graph.add_edge(index, flagstat);

        let coverage_prefix = deduped_bam.replace(".bam", ".realign.fix.pr.coverage");
        let coverage = graph.push_node(self.coverage_node(
            &output_directory,
            &deduped_bam,
            &deduped_bai,
            &coverage_prefix,
        ));
        graph.add_edge(index, coverage);

        let vcf_file = deduped_bam.replace(".bam", ".realign.fix.pr.vcf");
        let genotyper = graph.push_node(self.genotyper_node(
            &output_directory,
            &deduped_bam,
            &deduped_bai,
            &vcf_file,
        ));
        // Ordering edge only; see module docs.
        graph.add_edge(coverage, genotyper);

        Ok(())
    }

    fn coverage_node(
        &self,
        output_directory: &std::path::Path,
        source: &str,
        source_index: &str,
        prefix: &str,
    ) -> super::JobNode {
        let mut builder = JobNodeBuilder::new(PipelineTool::GatkDepthOfCoverage, output_directory)
            .site(&self.settings.site_name)
            .argument(arg::INPUT_FILE, source)
            .argument(arg::OUTPUT_PREFIX, prefix)
            .argument(arg::KEY, &self.settings.gatk_key)
            .argument(arg::REFERENCE_SEQUENCE, &self.settings.reference_sequence)
            .argument(arg::PHONE_HOME, "NO_ET")
            .argument(arg::DOWNSAMPLING_TYPE, "NONE")
            .argument(arg::VALIDATION_STRICTNESS, "LENIENT")
            .flag(arg::OMIT_DEPTH_OUTPUT_AT_EACH_BASE)
            .argument(
                arg::INTERVALS,
                &self.settings.depth_of_coverage_interval_list,
            )
            .transfer_input(source)
            .transfer_input(source_index);

        for suffix in COVERAGE_OUTPUT_SUFFIXES {
            builder = builder.transfer_output(format!("{prefix}{suffix}"));
        }
        builder.build()
    }

    fn genotyper_node(
        &self,
        output_directory: &std::path::Path,
        source: &str,
        source_index: &str,
        vcf: &str,
    ) -> super::JobNode {
        let metrics = source.replace(".bam", ".metrics");
        let mut builder = JobNodeBuilder::new(PipelineTool::GatkUnifiedGenotyper, output_directory)
            .site(&self.settings.site_name)
            .processors(4)
            .argument(arg::INPUT_FILE, source)
            .argument(arg::OUT, vcf)
            .argument(arg::KEY, &self.settings.gatk_key)
            .argument(
                arg::INTERVALS,
                &self.settings.unified_genotyper_interval_list,
            )
            .argument(arg::REFERENCE_SEQUENCE, &self.settings.reference_sequence)
            .argument(arg::DBSNP, &self.settings.unified_genotyper_dbsnp)
            .argument(arg::PHONE_HOME, "NO_ET")
            .argument(arg::DOWNSAMPLING_TYPE, "NONE")
            .argument(arg::GENOTYPE_LIKELIHOODS_MODEL, "BOTH")
            .argument(arg::OUTPUT_MODE, "EMIT_ALL_SITES");

        for annotation in GENOTYPER_ANNOTATIONS {
            builder = builder.argument(arg::ANNOTATION, annotation);
        }

        builder
            .argument(arg::DOWNSAMPLE_TO_COVERAGE, "250")
            .argument(arg::STAND_CALL_CONF, "4")
            .argument(arg::STAND_EMIT_CONF, "0")
            .argument(arg::NUM_THREADS, "4")
            .argument(arg::METRICS, &metrics)
            .transfer_input(source)
            .transfer_input(source_index)
            .transfer_output(&metrics)
            .transfer_output(vcf)
            .build()
    }
}
