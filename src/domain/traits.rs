// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The pipeline talks to the outside world through three seams:
//
//   RecordSource  — where question records come from
//   RuleSource    — where the versioned rule set comes from
//   CorpusSink    — where the finished corpus, report and audit go
//
// The application layer only sees these traits. The JSON loader,
// the on-disk rule directory, the builtin rules and the atomic
// file writer are just the implementations that ship today; tests
// swap in in-memory ones.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::duplicate::DuplicateAudit;
use crate::domain::error::{CorpusError, RuleLoadError};
use crate::domain::record::QuestionRecord;
use crate::domain::report::{Rejection, RunReport};
use crate::domain::rule::RuleSet;

// ─── RecordSource ─────────────────────────────────────────────────────────────

/// Records that loaded, plus the entries that were rejected on the way.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub records:   Vec<QuestionRecord>,
    /// Input position of each entry in `records`
    pub positions: Vec<usize>,
    pub rejected:  Vec<Rejection>,
    /// Number of entries seen, accepted or not
    pub seen:      usize,
}

/// Any component that can produce a corpus of question records.
///
/// Malformed individual entries end up in `rejected`; only a
/// corpus that is unusable as a whole is an `Err`.
pub trait RecordSource {
    fn load(&self) -> std::result::Result<LoadedCorpus, CorpusError>;
}

// ─── RuleSource ───────────────────────────────────────────────────────────────

/// Any component that can produce a parsed (not yet compiled) rule set.
///
/// Implementations:
///   - RuleDirectory → TOML files under a directory, re-read every run
///   - BuiltinRules  → the default rule files embedded in the binary
pub trait RuleSource {
    /// Human-readable origin, used in log lines
    fn describe(&self) -> String;

    fn load_rules(&self) -> std::result::Result<RuleSet, RuleLoadError>;
}

// ─── CorpusSink ───────────────────────────────────────────────────────────────

/// The complete result of a run, handed over in one piece.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub corpus: Vec<QuestionRecord>,
    pub report: RunReport,
    pub audit:  DuplicateAudit,
}

/// Any component that can persist a finished run.
///
/// `commit` is all-or-nothing from the caller's point of view:
/// it is only called once every stage has succeeded.
pub trait CorpusSink {
    fn commit(&self, artifacts: &RunArtifacts) -> Result<()>;
}
