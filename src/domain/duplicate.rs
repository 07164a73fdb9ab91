// ============================================================
// Layer 3 — Duplicate Groups
// ============================================================
// The deduplicator partitions the corpus into groups of records
// judged to be the same question. Every input record lands in
// exactly one group (singletons included), one member per group
// is the canonical survivor, and the others are retired. Their
// ids stay in the audit trail so nothing disappears silently.

use serde::{Deserialize, Serialize};

use crate::domain::record::QuestionRecord;

/// How the members of a group were matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    /// Single member, nothing to merge
    Unique,
    /// All members share one fingerprint
    Exact,
    /// At least one member joined through the similarity score
    Near,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Id of the surviving record
    pub canonical: String,

    /// All member ids in corpus order, canonical included
    pub members: Vec<String>,

    /// Members excluded from the output corpus
    pub retired: Vec<String>,

    pub kind: MatchKind,

    /// Canonical record's fingerprint
    pub fingerprint: String,

    /// Lowest similarity between the canonical and any member (1.0 for exact)
    pub similarity: f64,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_merge(&self) -> bool {
        self.members.len() > 1
    }
}

/// Two canonicals whose groups came close but were kept apart: a pair
/// just under the merge threshold, or one above it that would have put
/// a group member below the threshold with someone else in the group.
/// Both records stay in the corpus and get flagged `possible-duplicate`.
/// `similarity` is the highest pair score seen between the two groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearMiss {
    pub first:      String,
    pub second:     String,
    pub similarity: f64,
}

/// Everything the dedupe stage removed, written next to the corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DuplicateAudit {
    pub groups:      Vec<DuplicateGroup>,
    /// Full retired records, so a merge can always be undone by hand
    pub retired:     Vec<QuestionRecord>,
    pub near_misses: Vec<NearMiss>,
}

impl DuplicateAudit {
    /// Groups that actually merged something
    pub fn merges(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.iter().filter(|g| g.is_merge())
    }
}
