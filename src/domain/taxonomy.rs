// ============================================================
// Layer 3 — Taxonomy Axes and Label Sets
// ============================================================
// A question is classified along three independent axes:
//
//   Region      — where the question is set
//   Era         — when it is set
//   AnswerType  — what kind of thing the answer is
//
// The label catalogue for each axis lives in the rule data,
// not in code. The only label the code knows about is the
// "Unclassified" sentinel, which every axis accepts.
//
// Reference: Rust Book §6 (Enums and Pattern Matching)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal label for an axis that no rule matched.
/// Not an error, just a quality signal surfaced in the report.
pub const UNCLASSIFIED: &str = "Unclassified";

/// One of the three classification taxonomies.
///
/// The derived `Ord` (Region < Era < AnswerType) is the order
/// used whenever axes have to be visited deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Axis {
    Region,
    Era,
    AnswerType,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Region, Axis::Era, Axis::AnswerType];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Region     => "region",
            Axis::Era        => "era",
            Axis::AnswerType => "answer-type",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three labels currently assigned to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSet {
    pub region:      String,
    pub era:         String,
    pub answer_type: String,
}

impl LabelSet {
    pub fn new(
        region:      impl Into<String>,
        era:         impl Into<String>,
        answer_type: impl Into<String>,
    ) -> Self {
        Self {
            region:      region.into(),
            era:         era.into(),
            answer_type: answer_type.into(),
        }
    }

    /// All three axes unclassified
    pub fn unclassified() -> Self {
        Self::new(UNCLASSIFIED, UNCLASSIFIED, UNCLASSIFIED)
    }

    pub fn get(&self, axis: Axis) -> &str {
        match axis {
            Axis::Region     => &self.region,
            Axis::Era        => &self.era,
            Axis::AnswerType => &self.answer_type,
        }
    }

    pub fn set(&mut self, axis: Axis, label: impl Into<String>) {
        let label = label.into();
        match axis {
            Axis::Region     => self.region = label,
            Axis::Era        => self.era = label,
            Axis::AnswerType => self.answer_type = label,
        }
    }

    pub fn is_unclassified(&self, axis: Axis) -> bool {
        self.get(axis) == UNCLASSIFIED
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::unclassified()
    }
}
