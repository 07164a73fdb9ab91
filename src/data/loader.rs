// ============================================================
// Layer 4 — Corpus Loader
// ============================================================
// Loads question records from the extraction step's JSON file.
//
// Two layouts are accepted:
//
//   [ { "id": ..., "text": ..., "difficulty": ... }, ... ]
//
//   { "preliminary":   [ { "id": ..., "question": ... }, ... ],
//     "quarterfinals": [ ... ],
//     "semifinals":    [ ... ],
//     "finals":        [ ... ] }
//
// In the second layout a record inherits its round as difficulty.
// `text` (alias `question`) and `answer` may be span arrays or
// strings with inline <b>/<i>/<u> markup.
//
// A bad entry never stops the load: it is logged with its id and
// position, recorded as a Rejection, and the rest of the corpus
// goes on. Only a file that is unreadable or not one of the two
// layouts is fatal.
//
// Reference: serde_json docs (untyped Value, from_value)
//            Rust Book §9 (Error Handling)

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::preprocessor::Preprocessor;
use crate::domain::error::{CorpusError, RecordError};
use crate::domain::record::{join_spans, AxisConfidence, Difficulty, Flag, Provenance, QuestionRecord, Span};
use crate::domain::report::Rejection;
use crate::domain::traits::{LoadedCorpus, RecordSource};

/// Loads a corpus from a JSON file.
/// Implements the RecordSource trait from Layer 3.
pub struct JsonCorpusLoader {
    path:         PathBuf,
    preprocessor: Preprocessor,
}

impl JsonCorpusLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), preprocessor: Preprocessor::new() }
    }

    /// Parse corpus text. `document` is the provenance used for
    /// records that carry none of their own.
    pub fn parse(&self, text: &str, document: &str) -> Result<LoadedCorpus, CorpusError> {
        let root: Value = serde_json::from_str(text)
            .map_err(|source| CorpusError::Json { path: self.path.clone(), source })?;

        let entries = self.entries(root)?;

        let mut corpus = LoadedCorpus { seen: entries.len(), ..LoadedCorpus::default() };
        let mut first_seen: HashMap<String, usize> = HashMap::new();

        for (position, (round, value)) in entries.into_iter().enumerate() {
            let parsed = self
                .parse_entry(position, round, value, document)
                .and_then(|record| match first_seen.get(&record.id) {
                    Some(&first) => Err(RecordError::DuplicateId { id: record.id.clone(), first }),
                    None         => Ok(record),
                });

            match parsed {
                Ok(record) => {
                    first_seen.insert(record.id.clone(), position);
                    corpus.records.push(record);
                    corpus.positions.push(position);
                }
                // Log and keep going; one bad record must not sink the batch
                Err(e) => {
                    tracing::warn!(
                        position,
                        id = e.record_id().unwrap_or("-"),
                        "Rejected input record: {e}"
                    );
                    corpus.rejected.push(Rejection {
                        position,
                        id:     e.record_id().map(str::to_string),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Loaded {} records from '{}' ({} rejected)",
            corpus.records.len(),
            self.path.display(),
            corpus.rejected.len()
        );
        Ok(corpus)
    }

    /// Flatten either layout into (inherited round, raw entry) pairs in file order.
    fn entries(&self, root: Value) -> Result<Vec<(Option<Difficulty>, Value)>, CorpusError> {
        match root {
            Value::Array(items) => Ok(items.into_iter().map(|v| (None, v)).collect()),

            Value::Object(mut rounds) => {
                let mut out   = Vec::new();
                let mut found = false;

                // Fixed round order, whatever order the keys were written in
                for round in Difficulty::ALL {
                    let Some(value) = rounds.remove(round.as_str()) else { continue };
                    found = true;
                    match value {
                        Value::Array(items) => out.extend(items.into_iter().map(|v| (Some(round), v))),
                        other => {
                            return Err(CorpusError::Shape {
                                path:  self.path.clone(),
                                found: format!("'{}' holding {}", round, kind_of(&other)),
                            })
                        }
                    }
                }

                for key in rounds.keys() {
                    tracing::warn!("Ignoring unknown round '{}' in '{}'", key, self.path.display());
                }

                if !found {
                    return Err(CorpusError::Shape {
                        path:  self.path.clone(),
                        found: "an object without any round key".into(),
                    });
                }
                Ok(out)
            }

            other => Err(CorpusError::Shape { path: self.path.clone(), found: kind_of(&other).into() }),
        }
    }

    fn parse_entry(
        &self,
        position: usize,
        round:    Option<Difficulty>,
        value:    Value,
        document: &str,
    ) -> Result<QuestionRecord, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotARecord {
                position,
                reason: format!("expected an object, found {}", kind_of(&value)),
            });
        }

        let raw: RawRecord = serde_json::from_value(value)
            .map_err(|e| RecordError::NotARecord { position, reason: e.to_string() })?;

        // ── Identity ──────────────────────────────────────────────────────────
        let id = match raw.id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n))                         => n.to_string(),
            _ => return Err(RecordError::MissingId { position }),
        };

        // ── Content ───────────────────────────────────────────────────────────
        let text = match raw.text {
            Some(v) => self.spans_from(v).ok_or_else(|| RecordError::MissingText { id: id.clone() })?,
            None    => Vec::new(),
        };
        if join_spans(&text).trim().is_empty() {
            return Err(RecordError::MissingText { id });
        }
        let answer = raw.answer.and_then(|v| self.spans_from(v)).unwrap_or_default();

        let difficulty = match raw.difficulty {
            Some(value) => Difficulty::parse(&value)
                .ok_or_else(|| RecordError::UnknownDifficulty { id: id.clone(), value })?,
            None => round.ok_or_else(|| RecordError::MissingDifficulty { id: id.clone() })?,
        };

        let provenance = raw
            .provenance
            .unwrap_or_else(|| Provenance::new(document, position as u64));

        // ── Existing classification state ─────────────────────────────────────
        let mut record = QuestionRecord::new(id, text, difficulty, provenance).with_answer(answer);
        if let Some(region) = raw.region {
            record.region = region;
        }
        if let Some(era) = raw.era {
            record.era = era;
        }
        if let Some(answer_type) = raw.answer_type {
            record.answer_type = answer_type;
        }
        record.confidence = raw.confidence;
        record.flags      = raw.flags.into_iter().collect();

        Ok(record)
    }

    /// Span array, array of plain strings, or a markup string.
    /// `None` when the value is none of these.
    fn spans_from(&self, value: Value) -> Option<Vec<Span>> {
        match value {
            Value::String(s) => Some(self.preprocessor.parse_markup(&s)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Some(Span::plain(s)),
                    other            => serde_json::from_value::<Span>(other).ok(),
                })
                .collect(),
            _ => None,
        }
    }
}

/// Implement RecordSource so the application layer can load a corpus
/// without knowing about the file layout
impl RecordSource for JsonCorpusLoader {
    fn load(&self) -> Result<LoadedCorpus, CorpusError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|source| CorpusError::Io { path: self.path.clone(), source })?;

        self.parse(&text, &document_name(&self.path))
    }
}

/// Lenient view of one input entry; shape problems are reported per field.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<Value>,

    #[serde(default, alias = "question")]
    text: Option<Value>,

    #[serde(default)]
    answer: Option<Value>,

    #[serde(default)]
    difficulty: Option<String>,

    #[serde(default)]
    region: Option<String>,

    #[serde(default)]
    era: Option<String>,

    #[serde(default, alias = "answerType")]
    answer_type: Option<String>,

    #[serde(default)]
    confidence: AxisConfidence,

    #[serde(default)]
    flags: Vec<Flag>,

    #[serde(default)]
    provenance: Option<Provenance>,
}

/// Use the file name as the default provenance document
fn document_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null      => "null",
        Value::Bool(_)   => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_)  => "an array",
        Value::Object(_) => "an object",
    }
}
