// ============================================================
// Layer 5 — Rule Store
// ============================================================
// A compiled, read-only snapshot of one rule set version.
//
// Compilation does all the work that should happen exactly once:
//   - keywords and phrases are tokenised the same way record
//     text is, so matching is a token-sequence comparison
//   - regexes are compiled case-insensitively
//   - every label, fallback and constraint is checked against
//     the axis label catalogue
//   - constraints are sorted into their evaluation order
//
// After `compile` succeeds nothing here changes for the rest of
// the run. The store is shared across worker threads behind an
// Arc and never locked.
//
// Reference: regex crate docs (RegexBuilder)
//            Rust Book §16 (Shared-State Concurrency)

use regex::{Regex, RegexBuilder};
use std::collections::BTreeSet;

use crate::data::features::{tokenize, FeatureBag};
use crate::domain::error::RuleLoadError;
use crate::domain::rule::{
    AxisRules, ConflictConstraint, DemoteTarget, EraName, MatchScope, Pattern, Resolution, Rule, RuleSet,
};
use crate::domain::taxonomy::{Axis, UNCLASSIFIED};

/// Tie-break specificity of a year-range rule
const YEARS_SPECIFICITY: usize = 4;

// ─── CompiledRule ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Matcher {
    Tokens(Vec<String>),
    Regex(Regex),
    Years { from: i32, to: i32 },
}

/// One rule ready to test against a feature bag.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub label:       String,
    /// Position of `label` in the axis priority list
    pub label_index: usize,
    pub weight:      f64,
    pub scope:       MatchScope,
    /// Longer patterns are more specific and win score ties
    pub specificity: usize,
    pub source:      Pattern,
    matcher:         Matcher,
}

impl CompiledRule {
    fn compile(rule: &Rule, label_index: usize) -> Result<Self, RuleLoadError> {
        let invalid = |msg: String| RuleLoadError::Invalid(format!("{} rule for '{}': {}", rule.axis, rule.label, msg));

        if !rule.weight.is_finite() || rule.weight <= 0.0 {
            return Err(invalid(format!("weight must be positive, got {}", rule.weight)));
        }

        let (matcher, specificity) = match &rule.pattern {
            Pattern::Keyword(word) => {
                let tokens = tokenize(word);
                if tokens.len() != 1 {
                    return Err(invalid(format!("keyword '{word}' must be a single word (use phrases)")));
                }
                (Matcher::Tokens(tokens), word.trim().chars().count())
            }
            Pattern::Phrase(phrase) => {
                let tokens = tokenize(phrase);
                if tokens.is_empty() {
                    return Err(invalid(format!("phrase '{phrase}' has no words")));
                }
                (Matcher::Tokens(tokens), phrase.trim().chars().count())
            }
            Pattern::Regex(pattern) => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| RuleLoadError::Regex {
                        pattern: pattern.clone(),
                        label:   rule.label.clone(),
                        source,
                    })?;
                let literal = pattern.chars().filter(|c| c.is_alphanumeric()).count();
                (Matcher::Regex(regex), literal)
            }
            Pattern::Years { from, to } => {
                if from > to {
                    return Err(invalid(format!("year range {from}..{to} is reversed")));
                }
                if rule.scope == MatchScope::Entity {
                    return Err(invalid("year ranges cannot use entity scope".into()));
                }
                (Matcher::Years { from: *from, to: *to }, YEARS_SPECIFICITY)
            }
        };

        Ok(Self {
            label: rule.label.clone(),
            label_index,
            weight: rule.weight,
            scope: rule.scope,
            specificity,
            source: rule.pattern.clone(),
            matcher,
        })
    }

    /// Test this rule against a feature bag. A rule either matches or not;
    /// repeated occurrences do not add up.
    pub fn matches(&self, bag: &FeatureBag) -> bool {
        match (&self.matcher, self.scope) {
            (Matcher::Tokens(t), MatchScope::Any)      => bag.contains_sequence(t),
            (Matcher::Tokens(t), MatchScope::Emphasis) => bag.emphasis_contains(t),
            (Matcher::Tokens(t), MatchScope::Entity)   => bag.entity_contains(t),

            (Matcher::Regex(re), MatchScope::Any)      => re.is_match(&bag.text),
            (Matcher::Regex(re), MatchScope::Emphasis) => bag.emphasized.iter().any(|r| re.is_match(&r.text)),
            (Matcher::Regex(re), MatchScope::Entity)   => bag.proper_nouns.iter().any(|r| re.is_match(&r.text)),

            (Matcher::Years { from, to }, MatchScope::Any)      => bag.any_date_overlaps(*from, *to),
            (Matcher::Years { from, to }, MatchScope::Emphasis) => bag.emphasized_date_overlaps(*from, *to),
            (Matcher::Years { .. }, MatchScope::Entity)         => false,
        }
    }
}

// ─── AxisTable ────────────────────────────────────────────────────────────────

/// All compiled rules of one axis plus its label catalogue.
#[derive(Debug, Clone)]
pub struct AxisTable {
    pub axis:     Axis,
    pub ceiling:  f64,
    pub fallback: String,
    /// Legal labels, highest tie-break priority first
    pub labels:   Vec<String>,
    pub rules:    Vec<CompiledRule>,
}

impl AxisTable {
    fn compile(raw: &AxisRules) -> Result<Self, RuleLoadError> {
        let axis = raw.axis;

        // ── Step 1: Label catalogue ───────────────────────────────────────────
        if raw.labels.is_empty() {
            return Err(RuleLoadError::Invalid(format!("{axis} declares no labels")));
        }
        let mut seen = BTreeSet::new();
        for label in &raw.labels {
            if label.trim().is_empty() || label == UNCLASSIFIED {
                return Err(RuleLoadError::Invalid(format!("{axis} label '{label}' is reserved or empty")));
            }
            if !seen.insert(label.as_str()) {
                return Err(RuleLoadError::Invalid(format!("{axis} label '{label}' is declared twice")));
            }
        }

        if !raw.ceiling.is_finite() || raw.ceiling <= 0.0 {
            return Err(RuleLoadError::Invalid(format!("{axis} ceiling must be positive, got {}", raw.ceiling)));
        }
        if raw.fallback != UNCLASSIFIED && !seen.contains(raw.fallback.as_str()) {
            return Err(RuleLoadError::Invalid(format!("{axis} fallback '{}' is not a label", raw.fallback)));
        }

        // ── Step 2: Rules ─────────────────────────────────────────────────────
        let mut rules = Vec::new();
        for rule in raw.expand() {
            let index = raw
                .labels
                .iter()
                .position(|l| *l == rule.label)
                .ok_or_else(|| RuleLoadError::Invalid(format!("{axis} rule uses unknown label '{}'", rule.label)))?;
            rules.push(CompiledRule::compile(&rule, index)?);
        }

        Ok(Self {
            axis,
            ceiling:  raw.ceiling,
            fallback: raw.fallback.clone(),
            labels:   raw.labels.clone(),
            rules,
        })
    }

    /// Tie-break rank of a label (lower wins)
    pub fn priority(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// True for catalogue labels and the Unclassified sentinel
    pub fn is_legal(&self, label: &str) -> bool {
        label == UNCLASSIFIED || self.priority(label).is_some()
    }
}

// ─── RuleStore ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RuleStore {
    version:     String,
    /// Indexed in `Axis::ALL` order
    axes:        Vec<AxisTable>,
    /// Sorted: most pinned axes first, then priority, then name
    constraints: Vec<ConflictConstraint>,
    era_names:   Vec<EraName>,
}

impl RuleStore {
    /// Validate and compile a parsed rule set. Any problem is fatal.
    pub fn compile(set: RuleSet) -> Result<Self, RuleLoadError> {
        if set.version.trim().is_empty() {
            return Err(RuleLoadError::Invalid("rule set has no version".into()));
        }

        // ── Step 1: Exactly one table per axis ────────────────────────────────
        let mut axes = Vec::with_capacity(Axis::ALL.len());
        for axis in Axis::ALL {
            let mut matching = set.axes.iter().filter(|a| a.axis == axis);
            let raw = matching
                .next()
                .ok_or_else(|| RuleLoadError::Invalid(format!("no rule file for axis {axis}")))?;
            if matching.next().is_some() {
                return Err(RuleLoadError::Invalid(format!("axis {axis} is defined twice")));
            }
            axes.push(AxisTable::compile(raw)?);
        }

        let era_names: Vec<EraName> = set.axes.iter().flat_map(|a| a.era_names.iter().cloned()).collect();
        if let Some(bad) = era_names.iter().find(|e| e.from > e.to || tokenize(&e.name).is_empty()) {
            return Err(RuleLoadError::Invalid(format!("era name '{}' is empty or has a reversed range", bad.name)));
        }

        let mut store = Self { version: set.version, axes, constraints: Vec::new(), era_names };

        // ── Step 2: Constraints ───────────────────────────────────────────────
        let mut names = BTreeSet::new();
        for c in &set.constraints {
            store.check_constraint(c)?;
            if !names.insert(c.name.clone()) {
                return Err(RuleLoadError::Invalid(format!("constraint '{}' is declared twice", c.name)));
            }
        }

        let mut constraints = set.constraints;
        constraints.sort_by(|a, b| {
            b.specificity()
                .cmp(&a.specificity())
                .then(a.priority.cmp(&b.priority))
                .then_with(|| a.name.cmp(&b.name))
        });
        store.constraints = constraints;

        tracing::debug!(
            version = %store.version,
            rules = store.rule_count(),
            constraints = store.constraints.len(),
            "Compiled rule set"
        );
        Ok(store)
    }

    fn check_constraint(&self, c: &ConflictConstraint) -> Result<(), RuleLoadError> {
        let invalid = |msg: String| RuleLoadError::Invalid(format!("constraint '{}': {}", c.name, msg));

        if c.name.trim().is_empty() {
            return Err(RuleLoadError::Invalid("constraint without a name".into()));
        }
        let pinned = c.axes();
        if pinned.len() < 2 {
            return Err(invalid("must pin labels on at least two axes".into()));
        }
        for axis in &pinned {
            let label = c.label(*axis).unwrap_or_default();
            if label == UNCLASSIFIED || self.axis(*axis).priority(label).is_none() {
                return Err(invalid(format!("'{label}' is not a {axis} label")));
            }
        }

        if c.resolution == Resolution::Demote {
            let targets: Vec<Axis> = match c.demote.axis() {
                Some(axis) if pinned.contains(&axis) => vec![axis],
                Some(axis) => return Err(invalid(format!("demotes {axis}, which it does not pin"))),
                None => pinned.clone(),
            };
            if let Some(fallback) = &c.fallback {
                if let Some(axis) = targets.iter().find(|a| !self.axis(**a).is_legal(fallback)) {
                    return Err(invalid(format!("fallback '{fallback}' is not a {axis} label")));
                }
            }
        } else if c.demote != DemoteTarget::LowerConfidence || c.fallback.is_some() {
            return Err(invalid("flag-only constraints take no demote target or fallback".into()));
        }
        Ok(())
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn axis(&self, axis: Axis) -> &AxisTable {
        // Compilation guarantees one table per axis, in Axis::ALL order
        &self.axes[axis as usize]
    }

    pub fn constraints(&self) -> &[ConflictConstraint] {
        &self.constraints
    }

    pub fn era_names(&self) -> &[EraName] {
        &self.era_names
    }

    pub fn is_legal(&self, axis: Axis, label: &str) -> bool {
        self.axis(axis).is_legal(label)
    }

    pub fn rule_count(&self) -> usize {
        self.axes.iter().map(|a| a.rules.len()).sum()
    }
}
