// ============================================================
// Layer 3 — QuestionRecord Domain Type
// ============================================================
// One trivia question as it flows through the pipeline.
//
// The extraction step (outside this crate) produces the
// identity, the formatted text spans, the difficulty and the
// provenance. This crate only ever touches the classification
// fields: the three labels, their confidences and the review
// flags.
//
// Example record (JSON):
//   {
//     "id": "prelim-0042",
//     "text": [ { "text": "This city fell in " },
//               { "text": "1453", "bold": true } ],
//     "difficulty": "preliminary",
//     "region": "Middle East & North Africa",
//     "era": "Medieval Era (500-1450)",
//     "answer_type": "Unclassified",
//     "confidence": { "region": 0.33, "era": 0.67, "answer_type": 0.0 },
//     "flags": [ "unclassified" ],
//     "provenance": { "document": "2019-prelims.pdf", "offset": 41 }
//   }
//
// Reference: Rust Book §5 (Structs), §8 (Collections)

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::domain::taxonomy::{Axis, LabelSet, UNCLASSIFIED};

// ─── Span ─────────────────────────────────────────────────────────────────────
/// A run of question text with uniform formatting.
/// Emphasis matters: answer keywords are usually bold or underlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub bold: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub italic: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub underline: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Span {
    /// An unformatted span
    pub fn plain(text: impl Into<String>) -> Self {
        Self { text: text.into(), bold: false, italic: false, underline: false }
    }

    /// A bold span
    pub fn bold(text: impl Into<String>) -> Self {
        Self { bold: true, ..Self::plain(text) }
    }

    /// True when any emphasis is applied to this span
    pub fn is_emphasized(&self) -> bool {
        self.bold || self.italic || self.underline
    }
}

/// Concatenate span texts. Runs are pieces of the same sentence,
/// so they are joined with no separator.
pub fn join_spans(spans: &[Span]) -> String {
    spans.iter().map(|s| s.text.as_str()).collect()
}

// ─── Difficulty ───────────────────────────────────────────────────────────────
/// Competition round the question was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Preliminary,
    Quarterfinals,
    Semifinals,
    Finals,
}

impl Difficulty {
    pub const ALL: [Difficulty; 4] = [
        Difficulty::Preliminary,
        Difficulty::Quarterfinals,
        Difficulty::Semifinals,
        Difficulty::Finals,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Preliminary   => "preliminary",
            Difficulty::Quarterfinals => "quarterfinals",
            Difficulty::Semifinals    => "semifinals",
            Difficulty::Finals        => "finals",
        }
    }

    /// Case-insensitive lookup used by the corpus loader
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase();
        Self::ALL.into_iter().find(|d| d.as_str() == value)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Flag ─────────────────────────────────────────────────────────────────────
/// Review markers attached by the pipeline stages.
/// Stored in a BTreeSet so output order never depends on insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// A conflicting label was demoted to a fallback
    ConflictResolved,
    /// A conflict remains and a human has to decide
    NeedsReview,
    /// A classified axis scored below the confidence threshold
    LowConfidence,
    /// At least one axis ended up Unclassified
    Unclassified,
    /// Similar to another record, but below the merge threshold
    PossibleDuplicate,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::ConflictResolved  => "conflict-resolved",
            Flag::NeedsReview       => "needs-review",
            Flag::LowConfidence     => "low-confidence",
            Flag::Unclassified      => "unclassified",
            Flag::PossibleDuplicate => "possible-duplicate",
        }
    }

    /// Flags that mean a human should look at the record
    pub fn wants_review(&self) -> bool {
        matches!(self, Flag::NeedsReview | Flag::PossibleDuplicate)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Provenance ───────────────────────────────────────────────────────────────
/// Where the extractor found the question. Never modified here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub document: String,
    pub offset:   u64,
}

impl Provenance {
    pub fn new(document: impl Into<String>, offset: u64) -> Self {
        Self { document: document.into(), offset }
    }
}

// ─── AxisConfidence ───────────────────────────────────────────────────────────
/// Normalised score of the winning rule set per axis, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisConfidence {
    #[serde(default)]
    pub region: f64,
    #[serde(default)]
    pub era: f64,
    #[serde(default, alias = "answerType")]
    pub answer_type: f64,
}

impl AxisConfidence {
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Region     => self.region,
            Axis::Era        => self.era,
            Axis::AnswerType => self.answer_type,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::Region     => self.region = value,
            Axis::Era        => self.era = value,
            Axis::AnswerType => self.answer_type = value,
        }
    }

    /// Sum over all axes, used to pick the canonical record
    pub fn total(&self) -> f64 {
        self.region + self.era + self.answer_type
    }
}

// ─── QuestionRecord ───────────────────────────────────────────────────────────
fn unclassified() -> String {
    UNCLASSIFIED.to_string()
}

/// A single question plus its classification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// Stable identifier assigned at extraction time
    pub id: String,

    /// Question text as ordered formatted spans
    pub text: Vec<Span>,

    /// Answer line, classified together with the question
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answer: Vec<Span>,

    pub difficulty: Difficulty,

    #[serde(default = "unclassified")]
    pub region: String,

    #[serde(default = "unclassified")]
    pub era: String,

    #[serde(default = "unclassified", alias = "answerType")]
    pub answer_type: String,

    #[serde(default)]
    pub confidence: AxisConfidence,

    #[serde(default)]
    pub flags: BTreeSet<Flag>,

    provenance: Provenance,
}

impl QuestionRecord {
    /// Create an unclassified record
    pub fn new(
        id:         impl Into<String>,
        text:       Vec<Span>,
        difficulty: Difficulty,
        provenance: Provenance,
    ) -> Self {
        Self {
            id:          id.into(),
            text,
            answer:      Vec::new(),
            difficulty,
            region:      unclassified(),
            era:         unclassified(),
            answer_type: unclassified(),
            confidence:  AxisConfidence::default(),
            flags:       BTreeSet::new(),
            provenance,
        }
    }

    /// Builder-style setter for the answer line
    pub fn with_answer(mut self, answer: Vec<Span>) -> Self {
        self.answer = answer;
        self
    }

    /// Builder-style setter for pre-existing labels
    pub fn with_labels(mut self, labels: &LabelSet) -> Self {
        self.set_labels(labels);
        self
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Question text with formatting stripped
    pub fn plain_text(&self) -> String {
        join_spans(&self.text)
    }

    pub fn labels(&self) -> LabelSet {
        LabelSet::new(&self.region, &self.era, &self.answer_type)
    }

    pub fn set_labels(&mut self, labels: &LabelSet) {
        self.region      = labels.region.clone();
        self.era         = labels.era.clone();
        self.answer_type = labels.answer_type.clone();
    }

    pub fn label(&self, axis: Axis) -> &str {
        match axis {
            Axis::Region     => &self.region,
            Axis::Era        => &self.era,
            Axis::AnswerType => &self.answer_type,
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    /// True when any flag asks for a human look
    pub fn needs_attention(&self) -> bool {
        self.flags.iter().any(Flag::wants_review)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QuestionRecord {
        QuestionRecord::new(
            "q1",
            vec![Span::plain("This city fell in "), Span::bold("1453")],
            Difficulty::Preliminary,
            Provenance::new("prelims.pdf", 3),
        )
    }

    #[test]
    fn test_plain_text_joins_spans() {
        assert_eq!(sample().plain_text(), "This city fell in 1453");
    }

    #[test]
    fn test_new_record_is_unclassified() {
        let r = sample();
        assert_eq!(r.labels(), LabelSet::unclassified());
        assert!(r.flags.is_empty());
    }

    #[test]
    fn test_flags_serialise_in_stable_order() {
        let mut r = sample();
        r.flags.insert(Flag::PossibleDuplicate);
        r.flags.insert(Flag::ConflictResolved);

        let json  = serde_json::to_value(&r).unwrap();
        let flags = json["flags"].as_array().unwrap();
        assert_eq!(flags[0], "conflict-resolved");
        assert_eq!(flags[1], "possible-duplicate");
    }

    #[test]
    fn test_accepts_camel_case_answer_type() {
        let json = r#"{
            "id": "q9",
            "text": [{ "text": "Who wrote it?" }],
            "difficulty": "finals",
            "answerType": "People & Biography",
            "provenance": { "document": "finals.pdf", "offset": 0 }
        }"#;
        let r: QuestionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.answer_type, "People & Biography");
        assert_eq!(r.region, UNCLASSIFIED);
    }

    #[test]
    fn test_difficulty_parse_is_case_insensitive() {
        assert_eq!(Difficulty::parse(" Semifinals "), Some(Difficulty::Semifinals));
        assert_eq!(Difficulty::parse("bonus"), None);
    }
}
