// ============================================================
// Layer 3 — Run Report
// ============================================================
// The run report is the single place a human looks after a run.
// Anything the pipeline did to a record (demoted label, review flag,
// retired duplicate or rejected input) has an entry here.
//
// All maps are BTreeMaps so the serialised report is byte-for-byte
// reproducible for the same corpus and rule set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::duplicate::{DuplicateAudit, NearMiss};
use crate::domain::record::{Flag, QuestionRecord};
use crate::domain::taxonomy::Axis;

// ─── Stage ────────────────────────────────────────────────────────────────────
/// Pipeline stages, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Classify,
    ResolveConflicts,
    Dedupe,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Classify, Stage::ResolveConflicts, Stage::Dedupe];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Classify         => "classify",
            Stage::ResolveConflicts => "resolve-conflicts",
            Stage::Dedupe           => "dedupe",
        };
        f.write_str(s)
    }
}

// ─── Per-record audit entries ─────────────────────────────────────────────────

/// An input entry the loader refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub position: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id:       Option<String>,
    pub reason:   String,
}

/// What the resolver did about one matched constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ResolutionAction {
    Demoted { axis: Axis, from: String, to: String },
    Flagged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionNote {
    pub constraint: String,
    /// 1 = ordered single pass, 2 = re-validation pass
    pub pass:       u8,
    #[serde(flatten)]
    pub action:     ResolutionAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResolution {
    pub id:    String,
    pub notes: Vec<ResolutionNote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedRecord {
    pub id:    String,
    pub flags: Vec<Flag>,
    /// Set when the record was retired as a duplicate; the canonical id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retired_into: Option<String>,
}

// ─── Label counts ─────────────────────────────────────────────────────────────
/// Per-axis label histogram of a corpus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCounts {
    pub region:      BTreeMap<String, usize>,
    pub era:         BTreeMap<String, usize>,
    pub answer_type: BTreeMap<String, usize>,
}

impl LabelCounts {
    pub fn from_records(records: &[QuestionRecord]) -> Self {
        let mut counts = Self::default();
        for r in records {
            for axis in Axis::ALL {
                *counts.get_mut(axis).entry(r.label(axis).to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn get(&self, axis: Axis) -> &BTreeMap<String, usize> {
        match axis {
            Axis::Region     => &self.region,
            Axis::Era        => &self.era,
            Axis::AnswerType => &self.answer_type,
        }
    }

    fn get_mut(&mut self, axis: Axis) -> &mut BTreeMap<String, usize> {
        match axis {
            Axis::Region     => &mut self.region,
            Axis::Era        => &mut self.era,
            Axis::AnswerType => &mut self.answer_type,
        }
    }
}

// ─── RunReport ────────────────────────────────────────────────────────────────

/// Outcome class of a completed run. Fatal runs produce no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Success,
    /// Completed, but some records were rejected or need a human
    SuccessWithFlags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub rule_set_version: String,
    pub stages:           Vec<Stage>,
    /// Effective pipeline configuration
    pub config:           serde_json::Value,

    pub input_records:    usize,
    pub rejected:         Vec<Rejection>,

    pub label_counts:     LabelCounts,
    pub flag_counts:      BTreeMap<Flag, usize>,

    pub conflicts_resolved: usize,
    pub conflicts_flagged:  usize,
    pub resolutions:        Vec<RecordResolution>,

    pub duplicate_groups: usize,
    pub retired:          Vec<String>,
    pub near_misses:      Vec<NearMiss>,

    pub output_records:     usize,
    pub flagged_for_review: Vec<FlaggedRecord>,

    /// Records still matching a constraint without a review flag.
    /// Always empty unless the resolver is broken.
    pub invariant_violations: Vec<String>,

    pub status: RunStatus,
}

impl RunReport {
    /// Count flags and collect review candidates from the final corpus
    pub fn flag_summary(records: &[QuestionRecord]) -> (BTreeMap<Flag, usize>, Vec<FlaggedRecord>) {
        let mut counts  = BTreeMap::new();
        let mut flagged = Vec::new();

        for r in records {
            for f in &r.flags {
                *counts.entry(*f).or_insert(0) += 1;
            }
            if r.needs_attention() {
                flagged.push(FlaggedRecord {
                    id:           r.id.clone(),
                    flags:        r.flags.iter().copied().collect(),
                    retired_into: None,
                });
            }
        }
        (counts, flagged)
    }

    /// Retired duplicates whose flags still ask for a human. The survivor
    /// may be clean, so these are listed with the canonical that replaced them.
    pub fn retired_for_review(audit: &DuplicateAudit) -> Vec<FlaggedRecord> {
        let canonical_of: BTreeMap<&str, &str> = audit
            .groups
            .iter()
            .flat_map(|g| g.retired.iter().map(move |id| (id.as_str(), g.canonical.as_str())))
            .collect();

        audit
            .retired
            .iter()
            .filter(|r| r.needs_attention())
            .map(|r| FlaggedRecord {
                id:           r.id.clone(),
                flags:        r.flags.iter().copied().collect(),
                retired_into: canonical_of.get(r.id.as_str()).map(|c| c.to_string()),
            })
            .collect()
    }

    pub fn needs_attention(&self) -> bool {
        !self.rejected.is_empty()
            || !self.flagged_for_review.is_empty()
            || !self.invariant_violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{Difficulty, Provenance, Span};
    use crate::domain::taxonomy::LabelSet;

    fn record(id: &str, region: &str) -> QuestionRecord {
        QuestionRecord::new(id, vec![Span::plain("text")], Difficulty::Finals, Provenance::new("d", 0))
            .with_labels(&LabelSet::new(region, "Unclassified", "Unclassified"))
    }

    #[test]
    fn test_label_counts_per_axis() {
        let records = vec![record("a", "Europe"), record("b", "Europe"), record("c", "Asia")];
        let counts  = LabelCounts::from_records(&records);

        assert_eq!(counts.region["Europe"], 2);
        assert_eq!(counts.region["Asia"], 1);
        assert_eq!(counts.era["Unclassified"], 3);
    }

    #[test]
    fn test_flag_summary_lists_only_review_flags() {
        let mut a = record("a", "Europe");
        a.flags.insert(Flag::LowConfidence);
        let mut b = record("b", "Europe");
        b.flags.insert(Flag::NeedsReview);

        let (counts, flagged) = RunReport::flag_summary(&[a, b]);
        assert_eq!(counts[&Flag::LowConfidence], 1);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, "b");
    }

    #[test]
    fn test_retired_records_needing_review_point_at_their_canonical() {
        use crate::domain::duplicate::{DuplicateGroup, MatchKind};

        let mut gone = record("gone", "Europe");
        gone.flags.insert(Flag::NeedsReview);
        let quiet = record("quiet", "Europe");

        let audit = DuplicateAudit {
            groups: vec![DuplicateGroup {
                canonical:   "keep".into(),
                members:     vec!["keep".into(), "gone".into(), "quiet".into()],
                retired:     vec!["gone".into(), "quiet".into()],
                kind:        MatchKind::Exact,
                fingerprint: "f".into(),
                similarity:  1.0,
            }],
            retired:     vec![gone, quiet],
            near_misses: vec![],
        };

        let flagged = RunReport::retired_for_review(&audit);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, "gone");
        assert_eq!(flagged[0].retired_into.as_deref(), Some("keep"));
        assert_eq!(flagged[0].flags, vec![Flag::NeedsReview]);
    }

    #[test]
    fn test_resolution_note_serialises_flat() {
        let note = ResolutionNote {
            constraint: "us-ancient".into(),
            pass:       1,
            action:     ResolutionAction::Demoted {
                axis: Axis::Era,
                from: "Ancient World (pre-500 CE)".into(),
                to:   "Unclassified".into(),
            },
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["action"], "demoted");
        assert_eq!(json["axis"], "era");
        assert_eq!(json["constraint"], "us-ancient");
    }
}
