// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define what the
// pipeline works on: question records, the three taxonomy axes,
// rules and conflict constraints, duplicate groups and the run
// report.
//
// Rules for this layer:
//   - NO file I/O
//   - NO pattern matching logic (that is the engine's job)
//   - Only data, small invariant-keeping helpers and traits
//
// Think of this layer as the "dictionary" of the system:
// it defines what things ARE, not how they are computed.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Axes, label sets and the Unclassified sentinel
pub mod taxonomy;

// QuestionRecord and its parts (spans, difficulty, flags, provenance)
pub mod record;

// Rules, rule files and conflict constraints
pub mod rule;

// Duplicate groups and the dedupe audit trail
pub mod duplicate;

// Run report and per-record audit entries
pub mod report;

// Typed errors for records, rule sets and corpora
pub mod error;

// Core abstractions (traits) that other layers implement
pub mod traits;
