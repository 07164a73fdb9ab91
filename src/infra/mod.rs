// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the filesystem outside of reading the
// input corpus:
//
//   rule_loader.rs   — Rule set loading
//                      Reads the versioned TOML rule files from
//                      a directory or from the copy embedded in
//                      the binary. Retries transient I/O errors,
//                      nothing else.
//
//   corpus_store.rs  — Run output persistence
//                      Writes corpus, run report and duplicate
//                      audit through temporary files and renames
//                      them into place only when all are ready.
//
//   metrics.rs       — Label distribution
//                      Per-axis label counts as CSV and as the
//                      summary printed after a run.
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Rule directory / builtin rule set loading with retries
pub mod rule_loader;

/// Atomic writer for corpus, report and audit
pub mod corpus_store;

/// Label distribution CSV and summary
pub mod metrics;
