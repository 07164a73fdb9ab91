// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the extraction step's JSON file and the
// feature bags the engine scores.
//
//   questions.json
//       │
//       ▼
//   JsonCorpusLoader  → records + rejections (bad entries isolated)
//       │
//       ▼
//   Preprocessor      → markup → spans, cleaned text,
//       │               fingerprint normal form
//       ▼
//   FeatureExtractor  → tokens, dates, names, emphasis
//
// Each module is responsible for exactly one step.
//
// Reference: Rust Book §13 (Iterators and Closures)

/// Loads question records from JSON, rejecting bad entries one by one
pub mod loader;

/// Cleans text, parses inline markup, normalises for fingerprints
pub mod preprocessor;

/// Builds the per-record feature bag used by the classifiers
pub mod features;
