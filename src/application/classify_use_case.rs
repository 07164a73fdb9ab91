// ============================================================
// Layer 2 — ClassifyUseCase
// ============================================================
// Runs the classify stage over a whole corpus:
//
//   Step 1: Extract the feature bag          (Layer 4 - data)
//   Step 2: Score region, era, answer type   (Layer 5 - engine)
//   Step 3: Recompute the quality flags
//
// Records are independent, so the corpus is processed with a
// rayon parallel iterator. Every worker reads the same
// Arc<RuleStore>; ordered collect keeps input order.
//
// Reclassifying replaces the labels wholesale, so any flag that
// described the old labels (conflict-resolved, needs-review) is
// dropped here. possible-duplicate belongs to the dedupe stage
// and is left alone.
//
// Reference: rayon docs (IntoParallelIterator)
//            Rust Book §16 (Arc)

use rayon::prelude::*;
use std::sync::Arc;

use crate::data::features::FeatureExtractor;
use crate::domain::record::{Flag, QuestionRecord};
use crate::domain::taxonomy::Axis;
use crate::engine::classifier::classify_all;
use crate::engine::rule_store::RuleStore;

/// Flags that only make sense for the labels they were computed from
const LABEL_FLAGS: [Flag; 4] = [Flag::ConflictResolved, Flag::NeedsReview, Flag::LowConfidence, Flag::Unclassified];

pub struct ClassifyUseCase {
    store:                    Arc<RuleStore>,
    extractor:                FeatureExtractor,
    low_confidence_threshold: f64,
}

impl ClassifyUseCase {
    pub fn new(store: Arc<RuleStore>, low_confidence_threshold: f64) -> Self {
        let extractor = FeatureExtractor::new(store.era_names());
        Self { store, extractor, low_confidence_threshold }
    }

    pub fn execute(&self, records: Vec<QuestionRecord>) -> Vec<QuestionRecord> {
        tracing::info!("Classifying {} records", records.len());

        let records: Vec<QuestionRecord> = records
            .into_par_iter()
            .map(|mut r| {
                self.classify_record(&mut r);
                r
            })
            .collect();

        let unclassified = records.iter().filter(|r| r.has_flag(Flag::Unclassified)).count();
        tracing::info!(unclassified, "Classification complete");
        records
    }

    /// Classify one record in place
    pub fn classify_record(&self, record: &mut QuestionRecord) {
        let features             = self.extractor.extract(record);
        let (labels, confidence) = classify_all(&features, &self.store);

        record.set_labels(&labels);
        record.confidence = confidence;

        for flag in LABEL_FLAGS {
            record.flags.remove(&flag);
        }
        for axis in Axis::ALL {
            if labels.is_unclassified(axis) {
                record.flags.insert(Flag::Unclassified);
            } else if confidence.get(axis) < self.low_confidence_threshold {
                record.flags.insert(Flag::LowConfidence);
            }
        }
        tracing::trace!(id = %record.id, region = %record.region, era = %record.era, answer_type = %record.answer_type, "classified record");
    }
}
