// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the subcommands and their flags:
//
//   run                all three stages in one invocation
//   classify           corpus + rule set → classified corpus
//   resolve-conflicts  classified corpus → resolved corpus + flags
//   dedupe             resolved corpus   → final corpus + audit
//   validate-rules     load and compile a rule set, write nothing
//
// The four corpus commands share one argument struct; they only
// differ in which stages they select.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::pipeline_use_case::PipelineConfig;
use crate::domain::report::Stage;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify, resolve conflicts and deduplicate in one pass
    Run(RunArgs),

    /// Assign region, era and answer type to every record
    Classify(RunArgs),

    /// Demote or flag impossible label combinations
    ResolveConflicts(RunArgs),

    /// Merge exact and near-duplicate questions
    Dedupe(RunArgs),

    /// Check that a rule set loads and compiles
    ValidateRules(RulesArgs),
}

/// Arguments shared by every corpus command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Question corpus (JSON array or object of rounds)
    #[arg(long, default_value = "data/questions.json")]
    pub input: PathBuf,

    /// Where the resulting corpus is written
    #[arg(long, default_value = "data/questions.classified.json")]
    pub output: PathBuf,

    /// Run report path [default: <output stem>.report.json]
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Duplicate audit path [default: <output stem>.duplicates.json]
    #[arg(long)]
    pub audit: Option<PathBuf>,

    /// Also write the label distribution as CSV
    #[arg(long)]
    pub distribution_csv: Option<PathBuf>,

    /// Rule directory containing ruleset.toml; builtin rules when omitted
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Pairs at or above this similarity are merged
    #[arg(long, default_value_t = 0.85)]
    pub similarity_threshold: f64,

    /// Pairs this far below the threshold are flagged possible-duplicate
    #[arg(long, default_value_t = 0.05)]
    pub ambiguity_margin: f64,

    /// Classified axes below this confidence get low-confidence
    #[arg(long, default_value_t = 0.34)]
    pub low_confidence_threshold: f64,

    /// Attempts at reading the rule set before giving up
    #[arg(long, default_value_t = 3)]
    pub rule_load_attempts: u32,

    /// Pause before the first retry, doubled after each failure
    #[arg(long, default_value_t = 200)]
    pub rule_load_backoff_ms: u64,

    /// Run everything and print the summary, but write no files
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Build the application config for the given stages.
    /// This is the boundary between Layer 1 and Layer 2;
    /// the application layer never sees clap types.
    pub fn into_config(self, stages: &[Stage]) -> PipelineConfig {
        PipelineConfig {
            input:                    self.input,
            output:                   self.output,
            report:                   self.report,
            audit:                    self.audit,
            distribution_csv:         self.distribution_csv,
            rules_dir:                self.rules,
            stages:                   stages.to_vec(),
            similarity_threshold:     self.similarity_threshold,
            ambiguity_margin:         self.ambiguity_margin,
            low_confidence_threshold: self.low_confidence_threshold,
            rule_load_attempts:       self.rule_load_attempts,
            rule_load_backoff_ms:     self.rule_load_backoff_ms,
            dry_run:                  self.dry_run,
        }
    }
}

/// `run` selects every stage
impl From<RunArgs> for PipelineConfig {
    fn from(a: RunArgs) -> Self {
        a.into_config(&Stage::ALL)
    }
}

/// Arguments for `validate-rules`
#[derive(Args, Debug, Clone)]
pub struct RulesArgs {
    /// Rule directory containing ruleset.toml; builtin rules when omitted
    #[arg(long)]
    pub rules: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    pub rule_load_attempts: u32,

    /// Pause between rule load attempts, in milliseconds
    #[arg(long, default_value_t = 200)]
    pub rule_load_backoff_ms: u64,
}
