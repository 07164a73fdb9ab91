// ============================================================
// Layer 5 — Axis Classifier
// ============================================================
// One generic scoring engine serves all three axes; the axes
// differ only in the rule table they read.
//
// For every rule of the axis that matches the feature bag, the
// rule's weight is added to its label's running score. The
// winner is picked by, in order:
//
//   1. highest aggregate score
//   2. highest specificity among the label's matched rules
//      (a long phrase beats a short keyword)
//   3. earliest position in the axis `labels` list
//
// Step 3 is a total order, so there is never an arbitrary choice.
// Confidence = score / axis ceiling, capped at 1.0. No match at
// all means Unclassified with confidence 0.
//
// Classifiers are pure: same feature bag + same store snapshot
// always gives the same result.

use serde::Serialize;
use std::cmp::Ordering;

use crate::data::features::FeatureBag;
use crate::domain::record::AxisConfidence;
use crate::domain::taxonomy::{Axis, LabelSet, UNCLASSIFIED};
use crate::engine::rule_store::RuleStore;

/// Scores closer than this are treated as equal
const SCORE_EPSILON: f64 = 1e-9;

/// Confidences are rounded so serialised output stays readable and stable
const CONFIDENCE_DECIMALS: f64 = 10_000.0;

/// A label that had at least one matching rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub label:       String,
    pub score:       f64,
    pub specificity: usize,
    pub priority:    usize,
    /// Number of matched rules
    pub matched:     usize,
}

impl Candidate {
    /// Ordering where `Less` means "ranks higher"
    fn rank(&self, other: &Candidate) -> Ordering {
        if (self.score - other.score).abs() > SCORE_EPSILON {
            return other.score.total_cmp(&self.score);
        }
        other
            .specificity
            .cmp(&self.specificity)
            .then(self.priority.cmp(&other.priority))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub axis:       Axis,
    pub label:      String,
    pub confidence: f64,
    pub score:      f64,
    /// Every scoring label, best first
    pub candidates: Vec<Candidate>,
}

impl Classification {
    pub fn is_unclassified(&self) -> bool {
        self.label == UNCLASSIFIED
    }
}

/// Score one axis
pub fn classify(features: &FeatureBag, axis: Axis, store: &RuleStore) -> Classification {
    let table = store.axis(axis);
    let mut slots: Vec<Option<Candidate>> = vec![None; table.labels.len()];

    for rule in table.rules.iter().filter(|r| r.matches(features)) {
        let slot = slots[rule.label_index].get_or_insert_with(|| Candidate {
            label:       rule.label.clone(),
            score:       0.0,
            specificity: 0,
            priority:    rule.label_index,
            matched:     0,
        });
        slot.score      += rule.weight;
        slot.specificity = slot.specificity.max(rule.specificity);
        slot.matched    += 1;
    }

    let mut candidates: Vec<Candidate> = slots.into_iter().flatten().collect();
    candidates.sort_by(Candidate::rank);

    let (label, score) = match candidates.first() {
        Some(best) => (best.label.clone(), best.score),
        None       => (UNCLASSIFIED.to_string(), 0.0),
    };

    Classification {
        axis,
        label,
        confidence: round_confidence(score / table.ceiling),
        score,
        candidates,
    }
}

/// Score all three axes independently
pub fn classify_all(features: &FeatureBag, store: &RuleStore) -> (LabelSet, AxisConfidence) {
    let mut labels     = LabelSet::unclassified();
    let mut confidence = AxisConfidence::default();

    for axis in Axis::ALL {
        let c = classify(features, axis, store);
        tracing::trace!(%axis, label = %c.label, score = c.score, "classified");
        labels.set(axis, c.label);
        confidence.set(axis, c.confidence);
    }
    (labels, confidence)
}

fn round_confidence(value: f64) -> f64 {
    (value.min(1.0) * CONFIDENCE_DECIMALS).round() / CONFIDENCE_DECIMALS
}
