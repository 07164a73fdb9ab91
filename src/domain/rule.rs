// ============================================================
// Layer 3 — Rules and Conflict Constraints
// ============================================================
// Classification knowledge is data, not code. These types are
// the in-memory form of the TOML rule files:
//
//   rules/ruleset.toml      — version + which files make up the set
//   rules/region.toml       — one file per axis: labels, weights,
//   rules/era.toml            keyword / phrase / regex / year-range
//   rules/answer_type.toml    patterns
//   rules/constraints.toml  — forbidden label combinations
//
// The files group patterns by label to stay readable; each entry
// of a group expands into one atomic `Rule`.
//
// Reference: Rust Book §6 (Enums), serde attribute docs

use serde::{Deserialize, Serialize};

use crate::domain::taxonomy::{Axis, LabelSet};

// ─── Rule ─────────────────────────────────────────────────────────────────────

/// How a pattern is tested against a record's features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pattern {
    /// A single word, case-insensitive
    Keyword(String),
    /// Consecutive words, case-insensitive
    Phrase(String),
    /// Case-insensitive regular expression over the cleaned text
    Regex(String),
    /// Any detected date expression overlapping the range (inclusive, BCE negative)
    Years { from: i32, to: i32 },
}

/// Where in the record a pattern has to occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchScope {
    /// Anywhere in question or answer text
    #[default]
    Any,
    /// Inside a bold, italic or underlined span
    Emphasis,
    /// Inside a capitalised multi-word name
    Entity,
}

/// One pattern contributing `weight` to `label` on `axis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub axis:    Axis,
    pub pattern: Pattern,
    pub label:   String,
    pub weight:  f64,
    #[serde(default)]
    pub scope:   MatchScope,
}

// ─── Rule files ───────────────────────────────────────────────────────────────

fn default_weight() -> f64 {
    1.0
}

/// An inclusive year range as written in rule files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSpan {
    pub from: i32,
    pub to:   i32,
}

/// A label's patterns as written in an axis file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub label: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default)]
    pub scope: MatchScope,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub phrases: Vec<String>,

    /// Regular expressions
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub years: Vec<YearSpan>,
}

impl RuleGroup {
    /// Expand the group into atomic rules, in file order:
    /// keywords, phrases, patterns, years.
    pub fn expand(&self, axis: Axis) -> Vec<Rule> {
        let make = |pattern: Pattern| Rule {
            axis,
            pattern,
            label:  self.label.clone(),
            weight: self.weight,
            scope:  self.scope,
        };

        self.keywords.iter().map(|k| make(Pattern::Keyword(k.clone())))
            .chain(self.phrases.iter().map(|p| make(Pattern::Phrase(p.clone()))))
            .chain(self.patterns.iter().map(|r| make(Pattern::Regex(r.clone()))))
            .chain(self.years.iter().map(|y| make(Pattern::Years { from: y.from, to: y.to })))
            .collect()
    }
}

/// A reign or era name the feature extractor recognises as a date expression,
/// e.g. `{ name = "Victorian", from = 1837, to = 1901 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraName {
    pub name: String,
    pub from: i32,
    pub to:   i32,
}

/// Contents of one axis file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisRules {
    pub axis: Axis,

    /// Score at which confidence saturates at 1.0
    pub ceiling: f64,

    /// Broad label used when a conflicting label on this axis is demoted
    pub fallback: String,

    /// Every legal label, highest tie-break priority first
    pub labels: Vec<String>,

    #[serde(default)]
    pub era_names: Vec<EraName>,

    #[serde(default)]
    pub rules: Vec<RuleGroup>,
}

impl AxisRules {
    pub fn expand(&self) -> Vec<Rule> {
        self.rules.iter().flat_map(|g| g.expand(self.axis)).collect()
    }
}

/// `ruleset.toml`: a version string plus the file names of the parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetManifest {
    pub version:     String,
    pub axes:        Vec<String>,
    pub constraints: String,
}

/// `constraints.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintFile {
    #[serde(default)]
    pub constraints: Vec<ConflictConstraint>,
}

/// A whole rule set after parsing, before compilation.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub version:     String,
    pub axes:        Vec<AxisRules>,
    pub constraints: Vec<ConflictConstraint>,
}

// ─── Conflict constraints ─────────────────────────────────────────────────────

/// What to do when a constraint matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// Replace one of the conflicting labels with a broader fallback
    Demote,
    /// Keep the labels and ask for manual review
    FlagOnly,
}

/// Which of the conflicting labels a `Demote` replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DemoteTarget {
    /// The constrained axis with the lowest confidence (ties: region, era, answer type)
    #[default]
    LowerConfidence,
    Region,
    Era,
    AnswerType,
}

impl DemoteTarget {
    pub fn axis(&self) -> Option<Axis> {
        match self {
            DemoteTarget::LowerConfidence => None,
            DemoteTarget::Region          => Some(Axis::Region),
            DemoteTarget::Era             => Some(Axis::Era),
            DemoteTarget::AnswerType      => Some(Axis::AnswerType),
        }
    }
}

/// A forbidden (partial) label tuple. Unset axes match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictConstraint {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub era: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "answerType")]
    pub answer_type: Option<String>,

    pub resolution: Resolution,

    #[serde(default)]
    pub demote: DemoteTarget,

    /// Replacement label; defaults to the demoted axis' fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,

    /// Lower runs first among equally specific constraints
    #[serde(default)]
    pub priority: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ConflictConstraint {
    pub fn label(&self, axis: Axis) -> Option<&str> {
        match axis {
            Axis::Region     => self.region.as_deref(),
            Axis::Era        => self.era.as_deref(),
            Axis::AnswerType => self.answer_type.as_deref(),
        }
    }

    /// Axes this constraint pins down, in axis order
    pub fn axes(&self) -> Vec<Axis> {
        Axis::ALL.into_iter().filter(|a| self.label(*a).is_some()).collect()
    }

    /// Number of pinned axes. More pinned axes = more specific.
    pub fn specificity(&self) -> usize {
        self.axes().len()
    }

    /// True when every pinned axis equals the record's label
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let axes = self.axes();
        !axes.is_empty()
            && axes.iter().all(|a| self.label(*a) == Some(labels.get(*a)))
    }
}
