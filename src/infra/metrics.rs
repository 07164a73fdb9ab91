// ============================================================
// Layer 6 — Label Distribution
// ============================================================
// Per-axis label counts of the final corpus, in two forms:
//
//   CSV (optional output file, one row per axis/label):
//     axis,label,count
//     region,Europe,412
//     answer-type,"Documents, Laws & Treaties",57
//
//   Text summary printed at the end of a run:
//     region
//       Europe                               412  (38.1%)
//       ...
//
// Rows come out in axis order, then label order, so both forms
// are stable for a given corpus.
//
// Reference: Rust Book §8 (Strings), RFC 4180 (CSV quoting)

use std::fmt::Write as _;

use crate::domain::report::LabelCounts;
use crate::domain::taxonomy::Axis;

/// One row of the distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRow {
    pub axis:  Axis,
    pub label: String,
    pub count: usize,
}

pub fn rows(counts: &LabelCounts) -> Vec<DistributionRow> {
    Axis::ALL
        .into_iter()
        .flat_map(|axis| {
            counts.get(axis).iter().map(move |(label, count)| DistributionRow {
                axis,
                label: label.clone(),
                count: *count,
            })
        })
        .collect()
}

/// Quote a CSV field when it contains a separator, quote or newline
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(counts: &LabelCounts) -> String {
    let mut out = String::from("axis,label,count\n");
    for row in rows(counts) {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{},{},{}", row.axis, csv_field(&row.label), row.count);
    }
    out
}

/// Human-readable distribution, largest label first within each axis
pub fn render_summary(counts: &LabelCounts) -> String {
    let mut out = String::new();
    for axis in Axis::ALL {
        let labels = counts.get(axis);
        let total: usize = labels.values().sum();

        let mut sorted: Vec<(&String, &usize)> = labels.iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let _ = writeln!(out, "{axis}");
        for (label, count) in sorted {
            let share = if total == 0 { 0.0 } else { *count as f64 * 100.0 / total as f64 };
            let _ = writeln!(out, "  {label:<44} {count:>6}  ({share:.1}%)");
        }
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn counts() -> LabelCounts {
        let mut c = LabelCounts::default();
        c.region.insert("Europe".into(), 3);
        c.region.insert("Asia".into(), 1);
        c.answer_type.insert("Documents, Laws & Treaties".into(), 2);
        c
    }

    #[test]
    fn test_csv_quotes_labels_with_commas() {
        let csv = render_csv(&counts());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "axis,label,count");
        assert_eq!(lines[1], "region,Asia,1");
        assert_eq!(lines[2], "region,Europe,3");
        assert_eq!(lines[3], "answer-type,\"Documents, Laws & Treaties\",2");
    }

    #[test]
    fn test_summary_lists_largest_first() {
        let summary = render_summary(&counts());
        let europe  = summary.find("Europe").unwrap();
        let asia    = summary.find("Asia").unwrap();
        assert!(europe < asia);
        assert!(summary.contains("(75.0%)"));
    }
}
