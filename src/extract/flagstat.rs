//! Flagstat report parsing.
//!
//! Flagstat reports are line-oriented and order-independent. Three lines
//! carry the metrics we keep:
//!
//! ```text
//! 12345 + 0 in total (QC-passed reads + QC-failed reads)
//! 12100 + 0 mapped (98.01%:-nan%)
//! 11800 + 0 properly paired (95.58%:-nan%)
//! ```

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

pub const ATTR_TOTAL_PASSED_READS: &str = "SAMToolsFlagstat.totalPassedReads";
pub const ATTR_ALIGNED: &str = "SAMToolsFlagstat.aligned";
pub const ATTR_PAIRED: &str = "SAMToolsFlagstat.paired";

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Full-line match; the capture is everything inside the last
    // parenthesized group, e.g. "98.01%:-nan%".
    PATTERN.get_or_init(|| Regex::new(r"^.+\((.+)\)$").unwrap())
}

/// Pulls the percentage out of a line like `... mapped (98.01%:-nan%)`,
/// truncated at the first `%`. Returns `None` when the line does not match
/// or the value is empty.
fn extract_percentage(line: &str) -> Option<String> {
    let captures = percent_pattern().captures(line.trim())?;
    let raw = captures.get(1)?.as_str();
    let value = &raw[..raw.find('%')?];
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses a flagstat report into `(attribute name, value)` pairs.
///
/// Unparsable lines are logged and skipped; the remaining attributes are
/// still produced.
pub fn parse_flagstat(text: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    for line in text.lines() {
        if line.contains("in total") {
            match line.split_whitespace().next() {
                Some(token) => {
                    attributes.push((ATTR_TOTAL_PASSED_READS.to_string(), token.to_string()))
                }
                None => warn!(line, "could not parse total read count"),
            }
        }
        if line.contains("mapped (") {
            match extract_percentage(line) {
                Some(value) => attributes.push((ATTR_ALIGNED.to_string(), value)),
                None => warn!(line, "could not parse aligned percentage"),
            }
        }
        if line.contains("properly paired (") {
            match extract_percentage(line) {
                Some(value) => attributes.push((ATTR_PAIRED.to_string(), value)),
                None => warn!(line, "could not parse paired percentage"),
            }
        }
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
12345 + 0 in total (QC-passed reads + QC-failed reads)
0 + 0 duplicates
12100 + 0 mapped (98.01%:-nan%)
12345 + 0 paired in sequencing
11800 + 0 properly paired (95.58%:-nan%)
";

    fn value_of<'a>(attributes: &'a [(String, String)], name: &str) -> Option<&'a str> {
        attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_parses_all_three_metrics() {
        let attributes = parse_flagstat(REPORT);
        assert_eq!(value_of(&attributes, ATTR_TOTAL_PASSED_READS), Some("12345"));
        assert_eq!(value_of(&attributes, ATTR_ALIGNED), Some("98.01"));
        assert_eq!(value_of(&attributes, ATTR_PAIRED), Some("95.58"));
    }

    #[test]
    fn test_total_is_leading_token() {
        let attributes = parse_flagstat("12345 + 0 in total (QC-passed reads + QC-failed reads)\n");
        assert_eq!(attributes, vec![(
            ATTR_TOTAL_PASSED_READS.to_string(),
            "12345".to_string()
        )]);
    }

    #[test]
    fn test_unparsable_percentage_is_skipped() {
        // Missing closing paren and missing percent sign.
        let attributes = parse_flagstat("5 + 0 mapped (98.01\n7 + 0 properly paired (nan)\n");
        assert!(attributes.is_empty());
    }

    #[test]
    fn test_empty_report() {
        assert!(parse_flagstat("").is_empty());
    }
}
