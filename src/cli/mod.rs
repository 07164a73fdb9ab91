// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All work is delegated to Layer 2 (application); this layer
// only routes, prints the summary and picks the exit status.
//
// Exit codes (see main.rs):
//   0  success
//   3  success, but records were rejected or need review
//   1  fatal: unreadable corpus or rule set, nothing written
//   2  usage error (clap)
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, RulesArgs};
use std::time::Duration;

use crate::application::pipeline_use_case::{PipelineConfig, PipelineUseCase};
use crate::domain::report::{RunStatus, Stage};
use crate::domain::taxonomy::Axis;
use crate::domain::traits::{RuleSource, RunArtifacts};
use crate::infra::metrics;
use crate::infra::rule_loader::{load_store, BuiltinRules, RuleDirectory};

#[derive(Parser, Debug)]
#[command(
    name = "question-taxonomy",
    version,
    about = "Classify quiz questions by region, era and answer type, resolve impossible label combinations and merge duplicates."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<RunStatus> {
        match self.command {
            Commands::Run(args)              => run_pipeline(args.into()),
            Commands::Classify(args)         => run_pipeline(args.into_config(&[Stage::Classify])),
            Commands::ResolveConflicts(args) => run_pipeline(args.into_config(&[Stage::ResolveConflicts])),
            Commands::Dedupe(args)           => run_pipeline(args.into_config(&[Stage::Dedupe])),
            Commands::ValidateRules(args)    => validate_rules(args),
        }
    }
}

fn run_pipeline(config: PipelineConfig) -> Result<RunStatus> {
    tracing::info!("Reading corpus from '{}'", config.input.display());

    let use_case  = PipelineUseCase::new(config);
    let artifacts = use_case.execute()?;

    print_summary(&artifacts, use_case.config());
    Ok(artifacts.report.status)
}

fn print_summary(artifacts: &RunArtifacts, config: &PipelineConfig) {
    let report = &artifacts.report;

    println!("Rule set {}", report.rule_set_version);
    println!(
        "Records: {} in, {} rejected, {} out",
        report.input_records,
        report.rejected.len(),
        report.output_records
    );
    if config.runs(Stage::ResolveConflicts) {
        println!(
            "Conflicts: {} resolved, {} flagged for review",
            report.conflicts_resolved, report.conflicts_flagged
        );
    }
    if config.runs(Stage::Dedupe) {
        println!(
            "Duplicates: {} groups merged, {} records retired, {} near misses",
            report.duplicate_groups,
            report.retired.len(),
            report.near_misses.len()
        );
    }

    println!();
    print!("{}", metrics::render_summary(&report.label_counts));

    if !report.flagged_for_review.is_empty() {
        println!("\nNeeds review:");
        for f in &report.flagged_for_review {
            let flags: Vec<String> = f.flags.iter().map(ToString::to_string).collect();
            match &f.retired_into {
                Some(canonical) => println!("  {:<24} {} (retired into {canonical})", f.id, flags.join(", ")),
                None            => println!("  {:<24} {}", f.id, flags.join(", ")),
            }
        }
    }
    for r in &report.rejected {
        println!("Rejected entry {}: {}", r.position, r.reason);
    }

    if config.dry_run {
        println!("\nDry run: nothing written.");
    } else {
        println!("\nCorpus written to '{}'", config.output.display());
    }
}

fn validate_rules(args: RulesArgs) -> Result<RunStatus> {
    let source: Box<dyn RuleSource> = match args.rules {
        Some(dir) => Box::new(RuleDirectory::new(dir)),
        None      => Box::new(BuiltinRules),
    };
    let store = load_store(source.as_ref(), args.rule_load_attempts, Duration::from_millis(args.rule_load_backoff_ms))?;

    println!("{} is valid (version {})", source.describe(), store.version());
    for axis in Axis::ALL {
        let table = store.axis(axis);
        println!(
            "  {:<12} {:>3} labels {:>5} rules  fallback '{}'",
            axis.to_string(),
            table.labels.len(),
            table.rules.len(),
            table.fallback
        );
    }
    println!("  {:<12} {:>3} era names", "", store.era_names().len());
    println!("  constraints  {:>3}", store.constraints().len());
    Ok(RunStatus::Success)
}
