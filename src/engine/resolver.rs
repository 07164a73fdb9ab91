// ============================================================
// Layer 5 — Conflict Resolver
// ============================================================
// Checks a record's three labels against the constraint list
// and repairs or flags impossible combinations.
//
//   Pass 1  Walk the constraints once, in store order (most
//           pinned axes first, then priority, then name).
//           demote    → swap one label for a broader fallback,
//                       add `conflict-resolved`
//           flag-only → keep the labels, add `needs-review`
//
//   Pass 2  Re-check every constraint against the final labels.
//           A demotion late in pass 1 can create a match for a
//           constraint already passed; that record is flagged
//           `needs-review` instead of being resolved again.
//
// Two passes, no loop: termination does not depend on the
// constraint data. Afterwards no record without `needs-review`
// matches any constraint.
//
// Reference: Rust Book §8 (Collections), §18 (Patterns)

use std::collections::BTreeSet;

use crate::domain::record::{AxisConfidence, Flag, QuestionRecord};
use crate::domain::report::{RecordResolution, ResolutionAction, ResolutionNote};
use crate::domain::rule::{ConflictConstraint, Resolution};
use crate::domain::taxonomy::{Axis, LabelSet, UNCLASSIFIED};
use crate::engine::rule_store::RuleStore;

/// Labels, confidences and flags after resolution, plus what was done.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub labels:     LabelSet,
    pub confidence: AxisConfidence,
    pub flags:      BTreeSet<Flag>,
    pub notes:      Vec<ResolutionNote>,
}

impl Resolved {
    pub fn demotions(&self) -> usize {
        self.notes
            .iter()
            .filter(|n| matches!(n.action, ResolutionAction::Demoted { .. }))
            .count()
    }

    pub fn flagged(&self) -> usize {
        self.notes.len() - self.demotions()
    }
}

pub struct ConflictResolver<'a> {
    store: &'a RuleStore,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(store: &'a RuleStore) -> Self {
        Self { store }
    }

    /// Resolve one label triple. Pure: nothing outside the return value changes.
    pub fn resolve(&self, labels: LabelSet, confidence: AxisConfidence, flags: BTreeSet<Flag>) -> Resolved {
        let mut out = Resolved { labels, confidence, flags, notes: Vec::new() };

        // ── Pass 1: ordered single pass ───────────────────────────────────────
        for c in self.store.constraints() {
            if !c.matches(&out.labels) {
                continue;
            }
            match c.resolution {
                Resolution::Demote   => self.demote(c, &mut out),
                Resolution::FlagOnly => flag(c, 1, &mut out),
            }
        }

        // ── Pass 2: re-validate, never resolve twice ──────────────────────────
        if !out.flags.contains(&Flag::NeedsReview) {
            for c in self.store.constraints() {
                if c.matches(&out.labels) {
                    tracing::debug!(constraint = %c.name, "second-order conflict left for review");
                    flag(c, 2, &mut out);
                }
            }
        }

        out
    }

    /// Resolve a record in place. Returns the audit entry when anything matched.
    pub fn resolve_record(&self, record: &mut QuestionRecord) -> Option<RecordResolution> {
        let resolved = self.resolve(record.labels(), record.confidence, std::mem::take(&mut record.flags));

        record.set_labels(&resolved.labels);
        record.confidence = resolved.confidence;
        record.flags      = resolved.flags;

        if resolved.notes.is_empty() {
            return None;
        }
        Some(RecordResolution { id: record.id.clone(), notes: resolved.notes })
    }

    /// Ids of records that still match a constraint without being flagged.
    /// Empty after a correct resolution pass.
    pub fn violations(&self, records: &[QuestionRecord]) -> Vec<String> {
        records
            .iter()
            .filter(|r| !r.has_flag(Flag::NeedsReview))
            .filter(|r| {
                let labels = r.labels();
                self.store.constraints().iter().any(|c| c.matches(&labels))
            })
            .map(|r| r.id.clone())
            .collect()
    }

    fn demote(&self, c: &ConflictConstraint, out: &mut Resolved) {
        let axis = c
            .demote
            .axis()
            .unwrap_or_else(|| lowest_confidence(&c.axes(), &out.confidence));

        let from = out.labels.get(axis).to_string();
        let to   = c
            .fallback
            .clone()
            .unwrap_or_else(|| self.store.axis(axis).fallback.clone());

        // Demoting to the label already held would change nothing
        if from == to {
            flag(c, 1, out);
            return;
        }

        tracing::debug!(constraint = %c.name, %axis, %from, %to, "demoted");
        out.labels.set(axis, to.clone());
        out.confidence.set(axis, 0.0);
        out.flags.insert(Flag::ConflictResolved);
        if to == UNCLASSIFIED {
            out.flags.insert(Flag::Unclassified);
        }
        out.notes.push(ResolutionNote {
            constraint: c.name.clone(),
            pass:       1,
            action:     ResolutionAction::Demoted { axis, from, to },
        });
    }
}

fn flag(c: &ConflictConstraint, pass: u8, out: &mut Resolved) {
    out.flags.insert(Flag::NeedsReview);
    out.notes.push(ResolutionNote {
        constraint: c.name.clone(),
        pass,
        action:     ResolutionAction::Flagged,
    });
}

/// Pinned axis with the lowest confidence; ties go to the earlier axis.
fn lowest_confidence(axes: &[Axis], confidence: &AxisConfidence) -> Axis {
    let mut best = axes.first().copied().unwrap_or(Axis::Region);
    for axis in axes.iter().copied().skip(1) {
        if confidence.get(axis) < confidence.get(best) {
            best = axis;
        }
    }
    best
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{Difficulty, Provenance, Span};
    use crate::domain::rule::{AxisRules, DemoteTarget, RuleSet};
    use crate::domain::traits::RuleSource;
    use crate::infra::rule_loader::BuiltinRules;

    const US: &str      = "United States";
    const ANCIENT: &str = "Ancient World (pre-500 CE)";

    fn builtin() -> RuleStore {
        RuleStore::compile(BuiltinRules.load_rules().unwrap()).unwrap()
    }

    fn record(id: &str, labels: LabelSet) -> QuestionRecord {
        QuestionRecord::new(id, vec![Span::plain("text")], Difficulty::Semifinals, Provenance::new("d", 0))
            .with_labels(&labels)
    }

    fn toy_store(constraints: Vec<ConflictConstraint>) -> RuleStore {
        let table = |axis| AxisRules {
            axis,
            ceiling:   1.0,
            fallback:  UNCLASSIFIED.into(),
            labels:    vec!["A".into(), "B".into()],
            era_names: vec![],
            rules:     vec![],
        };
        RuleStore::compile(RuleSet {
            version: "toy".into(),
            axes:    vec![table(Axis::Region), table(Axis::Era), table(Axis::AnswerType)],
            constraints,
        })
        .unwrap()
    }

    fn constraint(name: &str, labels: [Option<&str>; 3], demote: DemoteTarget, fallback: Option<&str>) -> ConflictConstraint {
        ConflictConstraint {
            name:        name.into(),
            region:      labels[0].map(str::to_string),
            era:         labels[1].map(str::to_string),
            answer_type: labels[2].map(str::to_string),
            resolution:  Resolution::Demote,
            demote,
            fallback:    fallback.map(str::to_string),
            priority:    0,
            note:        None,
        }
    }

    #[test]
    fn test_us_ancient_is_demoted() {
        let store    = builtin();
        let resolver = ConflictResolver::new(&store);
        let mut r    = record("q1", LabelSet::new(US, ANCIENT, "People & Biography"));
        r.confidence = AxisConfidence { region: 0.8, era: 0.4, answer_type: 0.6 };

        let note = resolver.resolve_record(&mut r).unwrap();

        assert_eq!(r.region, US);
        assert_eq!(r.era, UNCLASSIFIED);
        assert_eq!(r.confidence.era, 0.0);
        assert!(r.has_flag(Flag::ConflictResolved));
        assert!(r.has_flag(Flag::Unclassified));
        assert_eq!(note.notes[0].constraint, "us-ancient");
        assert!(resolver.violations(&[r]).is_empty());
    }

    #[test]
    fn test_latam_medieval_moves_to_pre_columbian() {
        let store    = builtin();
        let resolver = ConflictResolver::new(&store);
        let mut r    = record("q2", LabelSet::new("Latin America & Caribbean", "Medieval Era (500-1450)", UNCLASSIFIED));

        resolver.resolve_record(&mut r).unwrap();

        assert_eq!(r.region, "Americas (Pre-Columbian)");
        assert_eq!(r.era, "Medieval Era (500-1450)");
        assert!(!r.has_flag(Flag::NeedsReview));
    }

    #[test]
    fn test_flag_only_keeps_labels() {
        let store    = builtin();
        let resolver = ConflictResolver::new(&store);
        let labels   = LabelSet::new("Americas (Pre-Columbian)", "Contemporary Era (1945-present)", UNCLASSIFIED);
        let mut r    = record("q3", labels.clone());

        let note = resolver.resolve_record(&mut r).unwrap();

        assert_eq!(r.labels(), labels);
        assert!(r.has_flag(Flag::NeedsReview));
        assert!(!r.has_flag(Flag::ConflictResolved));
        assert_eq!(note.notes[0].action, ResolutionAction::Flagged);
        assert!(resolver.violations(&[r]).is_empty());
    }

    #[test]
    fn test_clean_record_is_untouched() {
        let store    = builtin();
        let resolver = ConflictResolver::new(&store);
        let mut r    = record("q4", LabelSet::new("Europe", "Medieval Era (500-1450)", UNCLASSIFIED));
        let before   = r.clone();

        assert!(resolver.resolve_record(&mut r).is_none());
        assert_eq!(r, before);
    }

    #[test]
    fn test_region_answer_type_pair_is_demoted_without_touching_era() {
        let store = toy_store(vec![constraint("a-b", [Some("A"), None, Some("B")], DemoteTarget::LowerConfidence, None)]);
        let resolver = ConflictResolver::new(&store);

        // Era has the lowest confidence but is not part of the conflict
        let out = resolver.resolve(
            LabelSet::new("A", "B", "B"),
            AxisConfidence { region: 0.9, era: 0.1, answer_type: 0.4 },
            BTreeSet::new(),
        );
        assert_eq!(out.labels, LabelSet::new("A", "B", UNCLASSIFIED));
        assert_eq!(out.confidence.era, 0.1);
        assert_eq!(out.confidence.answer_type, 0.0);
        assert!(out.flags.contains(&Flag::ConflictResolved));
        assert!(!store.constraints().iter().any(|c| c.matches(&out.labels)));

        let mut r = record("q", LabelSet::new("A", "B", "B"));
        r.confidence = AxisConfidence { region: 0.9, era: 0.1, answer_type: 0.4 };
        resolver.resolve_record(&mut r).unwrap();
        assert!(resolver.violations(&[r]).is_empty());
    }

    #[test]
    fn test_region_answer_type_pair_flag_only() {
        let mut c = constraint("a-b", [Some("A"), None, Some("B")], DemoteTarget::LowerConfidence, None);
        c.resolution = Resolution::FlagOnly;
        let store    = toy_store(vec![c]);
        let resolver = ConflictResolver::new(&store);

        let out = resolver.resolve(LabelSet::new("A", "A", "B"), AxisConfidence::default(), BTreeSet::new());
        assert_eq!(out.labels, LabelSet::new("A", "A", "B"));
        assert!(out.flags.contains(&Flag::NeedsReview));
        assert_eq!(out.notes.len(), 1);
        assert_eq!(out.notes[0].action, ResolutionAction::Flagged);

        // Same era-free pair, different era: still a conflict
        let mut r = record("q", LabelSet::new("A", "B", "B"));
        assert!(resolver.resolve_record(&mut r).is_some());
        assert!(r.has_flag(Flag::NeedsReview));
        assert!(resolver.violations(&[r]).is_empty());
    }

    #[test]
    fn test_lower_confidence_axis_is_demoted() {
        let store = toy_store(vec![constraint("ab", [Some("A"), Some("B"), None], DemoteTarget::LowerConfidence, None)]);
        let resolver = ConflictResolver::new(&store);

        let out = resolver.resolve(
            LabelSet::new("A", "B", "A"),
            AxisConfidence { region: 0.9, era: 0.3, answer_type: 0.5 },
            BTreeSet::new(),
        );
        assert_eq!(out.labels, LabelSet::new("A", UNCLASSIFIED, "A"));

        // Equal confidence: the earlier axis gives way
        let out = resolver.resolve(
            LabelSet::new("A", "B", "A"),
            AxisConfidence { region: 0.5, era: 0.5, answer_type: 0.5 },
            BTreeSet::new(),
        );
        assert_eq!(out.labels, LabelSet::new(UNCLASSIFIED, "B", "A"));
        assert_eq!(out.demotions(), 1);
    }

    #[test]
    fn test_second_order_conflict_is_flagged_not_looped() {
        // "wide" is checked first (three pinned axes) and does not match yet;
        // "narrow" then demotes region A → B, which creates the "wide" match.
        let wide   = constraint("wide", [Some("B"), Some("A"), Some("A")], DemoteTarget::Region, Some("A"));
        let narrow = constraint("narrow", [Some("A"), Some("A"), None], DemoteTarget::Region, Some("B"));
        let store  = toy_store(vec![narrow, wide]);
        let resolver = ConflictResolver::new(&store);

        let out = resolver.resolve(LabelSet::new("A", "A", "A"), AxisConfidence::default(), BTreeSet::new());

        assert_eq!(out.labels, LabelSet::new("B", "A", "A"));
        assert!(out.flags.contains(&Flag::ConflictResolved));
        assert!(out.flags.contains(&Flag::NeedsReview));
        assert_eq!(out.notes.len(), 2);
        assert_eq!(out.notes[1].constraint, "wide");
        assert_eq!(out.notes[1].pass, 2);
        assert_eq!(out.flagged(), 1);
    }

    #[test]
    fn test_demote_to_same_label_flags_instead() {
        let c = constraint("self", [Some("A"), Some("A"), None], DemoteTarget::Era, Some("A"));
        let store    = toy_store(vec![c]);
        let resolver = ConflictResolver::new(&store);

        let out = resolver.resolve(LabelSet::new("A", "A", "B"), AxisConfidence::default(), BTreeSet::new());
        assert_eq!(out.labels, LabelSet::new("A", "A", "B"));
        assert!(out.flags.contains(&Flag::NeedsReview));
        assert_eq!(out.demotions(), 0);
    }

    #[test]
    fn test_resolution_is_stable_on_rerun() {
        let store    = builtin();
        let resolver = ConflictResolver::new(&store);
        let mut r    = record("q5", LabelSet::new(US, "Medieval Era (500-1450)", UNCLASSIFIED));

        resolver.resolve_record(&mut r);
        let once = r.clone();
        assert!(resolver.resolve_record(&mut r).is_none());
        assert_eq!(r, once);
    }
}
