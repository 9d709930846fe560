//! Job node definitions.
//!
//! A `JobNode` describes one external-tool invocation: command identity,
//! ordered argument list, working directory, file-transfer lists and
//! resource requirements. Nodes are immutable once built; construction goes
//! through `JobNodeBuilder`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The pipeline tools this workflow invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineTool {
    PicardMarkDuplicates,
    SamtoolsIndex,
    SamtoolsFlagstat,
    GatkDepthOfCoverage,
    GatkUnifiedGenotyper,
}

impl PipelineTool {
    /// Command name submitted to the batch scheduler.
    pub fn command(&self) -> &'static str {
        match self {
            PipelineTool::PicardMarkDuplicates => "PicardMarkDuplicates",
            PipelineTool::SamtoolsIndex => "SAMToolsIndex",
            PipelineTool::SamtoolsFlagstat => "SAMToolsFlagstat",
            PipelineTool::GatkDepthOfCoverage => "GATKDepthOfCoverage",
            PipelineTool::GatkUnifiedGenotyper => "GATKUnifiedGenotyper",
        }
    }
}

impl std::fmt::Display for PipelineTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// One flag/value pair on a job's command line. Flag-only arguments carry
/// no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    pub flag: String,
    pub value: Option<String>,
}

/// One processing step within a job graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNode {
    /// Tool to invoke.
    pub tool: PipelineTool,
    /// Ordered argument list.
    pub arguments: Vec<Argument>,
    /// Directory the tool runs in.
    pub working_directory: PathBuf,
    /// Files staged in before execution.
    pub transfer_inputs: Vec<String>,
    /// Files staged out after execution.
    pub transfer_outputs: Vec<String>,
    /// Requested processor count.
    pub processors: u32,
    /// Execution site, when configured.
    pub site_name: Option<String>,
}

impl JobNode {
    /// Value of the first argument carrying `flag`, if any.
    pub fn argument(&self, flag: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|a| a.flag == flag)
            .and_then(|a| a.value.as_deref())
    }

    /// Whether a flag-only argument is present.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.arguments.iter().any(|a| a.flag == flag)
    }
}

/// Builder for `JobNode`.
pub struct JobNodeBuilder {
    node: JobNode,
}

impl JobNodeBuilder {
    /// Starts a single-processor node for `tool` running in `working_directory`.
    pub fn new(tool: PipelineTool, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            node: JobNode {
                tool,
                arguments: Vec::new(),
                working_directory: working_directory.into(),
                transfer_inputs: Vec::new(),
                transfer_outputs: Vec::new(),
                processors: 1,
                site_name: None,
            },
        }
    }

    /// Appends a flag/value argument.
    pub fn argument(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.node.arguments.push(Argument {
            flag: flag.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Appends a flag-only argument.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.node.arguments.push(Argument {
            flag: flag.into(),
            value: None,
        });
        self
    }

    /// Adds a file to stage in before execution.
    pub fn transfer_input(mut self, name: impl Into<String>) -> Self {
        self.node.transfer_inputs.push(name.into());
        self
    }

    /// Adds a file to stage out after execution.
    pub fn transfer_output(mut self, name: impl Into<String>) -> Self {
        self.node.transfer_outputs.push(name.into());
        self
    }

    /// Sets the requested processor count.
    pub fn processors(mut self, count: u32) -> Self {
        self.node.processors = count;
        self
    }

    /// Sets the execution site.
    pub fn site(mut self, site: &str) -> Self {
        if !site.is_empty() {
            self.node.site_name = Some(site.to_string());
        }
        self
    }

    pub fn build(self) -> JobNode {
        self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let node = JobNodeBuilder::new(PipelineTool::SamtoolsIndex, "/work").build();
        assert_eq!(node.processors, 1);
        assert!(node.arguments.is_empty());
        assert!(node.site_name.is_none());
        assert_eq!(node.working_directory, Path::new("/work"));
    }

    #[test]
    fn test_builder_preserves_argument_order() {
        let node = JobNodeBuilder::new(PipelineTool::GatkDepthOfCoverage, "/work")
            .argument("INPUT_FILE", "a.bam")
            .flag("OMIT_DEPTH_OUTPUT_AT_EACH_BASE")
            .argument("INTERVALS", "exons.interval_list")
            .build();

        assert_eq!(node.arguments.len(), 3);
        assert_eq!(node.arguments[0].flag, "INPUT_FILE");
        assert_eq!(node.arguments[1].value, None);
        assert_eq!(node.argument("INTERVALS"), Some("exons.interval_list"));
        assert!(node.has_flag("OMIT_DEPTH_OUTPUT_AT_EACH_BASE"));
        assert!(!node.has_flag("INPUT"));
    }

    #[test]
    fn test_empty_site_is_dropped() {
        let node = JobNodeBuilder::new(PipelineTool::SamtoolsFlagstat, "/work")
            .site("")
            .build();
        assert!(node.site_name.is_none());

        let node = JobNodeBuilder::new(PipelineTool::SamtoolsFlagstat, "/work")
            .site("Kure")
            .build();
        assert_eq!(node.site_name.as_deref(), Some("Kure"));
    }
}
