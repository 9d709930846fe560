//! Depth-of-coverage report parsing.
//!
//! Two files per sample. The sample summary has a `Total` row whose second
//! and third columns are the total coverage and the mean:
//!
//! ```text
//! sample_id   total   mean    granular_third_quartile ...
//! S1          6535241443  82.92   ...
//! Total       6535241443  82.92   ...
//! ```
//!
//! The interval summary has a header row and then one row per interval;
//! the second column is that interval's coverage count, summed over all
//! rows.

use tracing::warn;

pub const ATTR_TOTAL_COVERAGE: &str = "GATKDepthOfCoverage.totalCoverage";
pub const ATTR_MEAN: &str = "GATKDepthOfCoverage.mean";
pub const ATTR_TOTAL_COVERAGE_COUNT: &str = "GATKDepthOfCoverage.totalCoverageCount";
pub const ATTR_NUMBER_ON_TARGET: &str = "numberOnTarget";

/// Extracts `(totalCoverage, mean)` from the `Total` row of a sample
/// summary. Values are kept as the verbatim report tokens.
pub fn parse_sample_summary(text: &str) -> Option<(String, String)> {
    for line in text.lines() {
        if !line.contains("Total") {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            warn!(line, "malformed Total row in sample summary");
            return None;
        }
        return Some((tokens[1].to_string(), tokens[2].to_string()));
    }
    None
}

/// Sums the coverage-count column of an interval summary, skipping the
/// header row. Malformed rows are logged and excluded from the sum.
pub fn parse_interval_summary(text: &str) -> u64 {
    let mut total: u64 = 0;
    for line in text.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let count = line
            .split_whitespace()
            .nth(1)
            .and_then(|token| token.trim().parse::<u64>().ok());
        match count {
            Some(count) => total += count,
            None => warn!(line, "malformed interval row, excluded from sum"),
        }
    }
    total
}
