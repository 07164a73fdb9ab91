// ============================================================
// Layer 5 — Classification Engine
// ============================================================
// All the logic that turns feature bags and labels into
// decisions. Nothing in this layer does I/O; every function
// reads an immutable RuleStore snapshot and the records it is
// handed.
//
//   rule_store.rs    — The compiled, validated rule set
//                      Keywords tokenised, regexes compiled,
//                      labels checked, constraints ordered.
//
//   classifier.rs    — One generic scoring engine for all
//                      three axes: sum of matched rule weights,
//                      deterministic tie-break, confidence.
//
//   resolver.rs      — Constraint checking with an ordered
//                      demote / flag-only policy, two passes
//                      at most.
//
//   deduplicator.rs  — Fingerprints, prefix-filtered similarity,
//                      complete-linkage grouping, canonical
//                      selection over the whole corpus.
//
// Reference: Rust Book §10 (Generic Types, Traits, Lifetimes)
//            Rust Book §16 (Fearless Concurrency)

/// Compiled rule tables and constraint order
pub mod rule_store;

/// Per-axis scoring
pub mod classifier;

/// Conflict constraint resolution
pub mod resolver;

/// Exact and near-duplicate grouping
pub mod deduplicator;
