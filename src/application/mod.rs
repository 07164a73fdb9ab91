// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer sequences the other layers into the operations a
// user can ask for. It decides what runs and in which order,
// never how a record is scored or compared.
//
// Rules for this layer:
//   - No scoring, matching or similarity code here (Layer 5)
//   - No printing here (that's Layer 1)
//   - No direct file format handling (Layers 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The classify stage over a corpus
pub mod classify_use_case;

// The conflict-resolution stage
pub mod resolve_use_case;

// The corpus-wide dedupe stage
pub mod dedupe_use_case;

// Configuration plus the full load → stages → report → commit run
pub mod pipeline_use_case;
