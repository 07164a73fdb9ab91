// ============================================================
// Layer 2 — DedupeUseCase
// ============================================================
// The synchronisation barrier of the pipeline: runs only after
// every per-record stage has finished, on the whole corpus.
//
// The Deduplicator owns its fingerprint index for exactly one
// call; nothing is carried over between runs.

use crate::domain::record::QuestionRecord;
use crate::engine::deduplicator::{DedupeConfig, DedupeOutcome, Deduplicator};

pub struct DedupeUseCase {
    deduplicator: Deduplicator,
}

impl DedupeUseCase {
    pub fn new(config: DedupeConfig) -> Self {
        Self { deduplicator: Deduplicator::new(config) }
    }

    pub fn execute(&self, records: Vec<QuestionRecord>) -> DedupeOutcome {
        let input   = records.len();
        tracing::info!("Deduplicating {} records", input);

        let outcome = self.deduplicator.dedupe(records);

        tracing::info!(
            merged_groups = outcome.audit.merges().count(),
            retired = outcome.audit.retired.len(),
            near_misses = outcome.audit.near_misses.len(),
            survivors = outcome.survivors.len(),
            "Deduplication complete"
        );
        debug_assert_eq!(outcome.survivors.len() + outcome.audit.retired.len(), input);
        outcome
    }
}
