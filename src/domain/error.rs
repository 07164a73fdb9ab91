// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Two propagation classes:
//
//   per-record   RecordError     — the record is rejected, logged
//                                  with its id, and the batch goes on
//   structural   RuleLoadError   — the whole run aborts and nothing
//                CorpusError       is written
//
// "Unclassified", unresolved conflicts and near-duplicates are not
// errors at all: they are states surfaced through flags and the
// run report.
//
// Reference: Rust Book §9 (Error Handling), thiserror docs

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::taxonomy::Axis;

/// Why a single input record was rejected (MalformedInput).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("entry {position} is not a record object: {reason}")]
    NotARecord { position: usize, reason: String },

    #[error("entry {position} has no id")]
    MissingId { position: usize },

    #[error("record '{id}' has no question text")]
    MissingText { id: String },

    #[error("record '{id}' has no difficulty")]
    MissingDifficulty { id: String },

    #[error("record '{id}' has unknown difficulty '{value}'")]
    UnknownDifficulty { id: String, value: String },

    #[error("record '{id}' repeats an id already seen at entry {first}")]
    DuplicateId { id: String, first: usize },

    #[error("record '{id}' has unknown {axis} label '{label}'")]
    UnknownLabel { id: String, axis: Axis, label: String },
}

impl RecordError {
    /// Id of the rejected record, when it had one
    pub fn record_id(&self) -> Option<&str> {
        match self {
            RecordError::NotARecord { .. } | RecordError::MissingId { .. } => None,
            RecordError::MissingText { id }
            | RecordError::MissingDifficulty { id }
            | RecordError::UnknownDifficulty { id, .. }
            | RecordError::DuplicateId { id, .. }
            | RecordError::UnknownLabel { id, .. } => Some(id),
        }
    }
}

/// The rule set cannot be used. Always fatal.
#[derive(Debug, Error)]
pub enum RuleLoadError {
    #[error("cannot read rule file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse rule file '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid regex '{pattern}' for label '{label}': {source}")]
    Regex {
        pattern: String,
        label:   String,
        #[source]
        source:  regex::Error,
    },

    #[error("invalid rule set: {0}")]
    Invalid(String),
}

impl RuleLoadError {
    /// Only I/O failures are worth retrying; a bad file stays bad
    pub fn is_transient(&self) -> bool {
        matches!(self, RuleLoadError::Io { .. })
    }
}

/// The corpus file as a whole is unusable. Always fatal.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("cannot read corpus '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corpus '{path}' is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corpus '{path}' must be an array of records or an object of rounds, found {found}")]
    Shape { path: PathBuf, found: String },
}
