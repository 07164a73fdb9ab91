// ============================================================
// Layer 2 — PipelineUseCase
// ============================================================
// Orchestrates a complete run in order:
//
//   Step 1: Load and compile the rule set   (Layer 6 - infra)
//   Step 2: Load the corpus                 (Layer 4 - data)
//   Step 3: Classify                        (Layer 2 - ClassifyUseCase)
//   Step 4: Resolve conflicts               (Layer 2 - ResolveUseCase)
//   Step 5: Deduplicate                     (Layer 2 - DedupeUseCase)
//   Step 6: Build the run report
//   Step 7: Commit all outputs atomically   (Layer 6 - infra)
//
// Any subset of steps 3–5 can run; they always run in this
// order. Every input is loaded before step 3 and nothing is
// written before step 7, so a fatal error anywhere leaves the
// previous outputs exactly as they were.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Rust Book §16 (Arc)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::application::classify_use_case::ClassifyUseCase;
use crate::application::dedupe_use_case::DedupeUseCase;
use crate::application::resolve_use_case::{ResolveOutcome, ResolveUseCase};
use crate::data::loader::JsonCorpusLoader;
use crate::domain::duplicate::DuplicateAudit;
use crate::domain::error::RecordError;
use crate::domain::record::QuestionRecord;
use crate::domain::report::{LabelCounts, Rejection, RunReport, RunStatus, Stage};
use crate::domain::taxonomy::Axis;
use crate::domain::traits::{CorpusSink, LoadedCorpus, RecordSource, RuleSource, RunArtifacts};
use crate::engine::deduplicator::DedupeConfig;
use crate::engine::rule_store::RuleStore;
use crate::infra::corpus_store::{sibling, AtomicCorpusWriter, OutputPaths};
use crate::infra::rule_loader::{load_store, BuiltinRules, RuleDirectory};

// ─── Pipeline Configuration ───────────────────────────────────────────────────
// Every tunable of a run. Serialisable so the effective values
// can be embedded in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input:                    PathBuf,
    pub output:                   PathBuf,
    /// Defaults to `<output stem>.report.json`
    pub report:                   Option<PathBuf>,
    /// Defaults to `<output stem>.duplicates.json`
    pub audit:                    Option<PathBuf>,
    pub distribution_csv:         Option<PathBuf>,
    /// Rule directory; the builtin rule set when absent
    pub rules_dir:                Option<PathBuf>,
    pub stages:                   Vec<Stage>,
    pub similarity_threshold:     f64,
    pub ambiguity_margin:         f64,
    pub low_confidence_threshold: f64,
    pub rule_load_attempts:       u32,
    pub rule_load_backoff_ms:     u64,
    pub dry_run:                  bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let dedupe = DedupeConfig::default();
        Self {
            input:                    PathBuf::from("data/questions.json"),
            output:                   PathBuf::from("data/questions.classified.json"),
            report:                   None,
            audit:                    None,
            distribution_csv:         None,
            rules_dir:                None,
            stages:                   Stage::ALL.to_vec(),
            similarity_threshold:     dedupe.similarity_threshold,
            ambiguity_margin:         dedupe.ambiguity_margin,
            low_confidence_threshold: 0.34,
            rule_load_attempts:       3,
            rule_load_backoff_ms:     200,
            dry_run:                  false,
        }
    }
}

impl PipelineConfig {
    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            bail!("no pipeline stage selected");
        }
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            bail!("similarity threshold must be in (0, 1], got {}", self.similarity_threshold);
        }
        if !(self.ambiguity_margin >= 0.0 && self.ambiguity_margin < self.similarity_threshold) {
            bail!(
                "ambiguity margin must be in [0, {}), got {}",
                self.similarity_threshold,
                self.ambiguity_margin
            );
        }
        if !(0.0..=1.0).contains(&self.low_confidence_threshold) {
            bail!("low-confidence threshold must be in [0, 1], got {}", self.low_confidence_threshold);
        }
        Ok(())
    }

    /// Selected stages in execution order, each once
    pub fn stages(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.stages.contains(s)).collect()
    }

    pub fn runs(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn dedupe_config(&self) -> DedupeConfig {
        DedupeConfig {
            similarity_threshold: self.similarity_threshold,
            ambiguity_margin:     self.ambiguity_margin,
        }
    }

    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths {
            corpus:           self.output.clone(),
            report:           self.report.clone().unwrap_or_else(|| sibling(&self.output, "report.json")),
            audit:            self.audit.clone().unwrap_or_else(|| sibling(&self.output, "duplicates.json")),
            distribution_csv: self.distribution_csv.clone(),
        }
    }

    pub fn rule_source(&self) -> Box<dyn RuleSource> {
        match &self.rules_dir {
            Some(dir) => Box::new(RuleDirectory::new(dir.clone())),
            None      => Box::new(BuiltinRules),
        }
    }

    pub fn rule_backoff(&self) -> Duration {
        Duration::from_millis(self.rule_load_backoff_ms)
    }
}

// ─── PipelineUseCase ──────────────────────────────────────────────────────────
pub struct PipelineUseCase {
    config: PipelineConfig,
}

impl PipelineUseCase {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the configured corpus and rule set, run, and write the outputs
    /// unless this is a dry run.
    pub fn execute(&self) -> Result<RunArtifacts> {
        let source    = JsonCorpusLoader::new(&self.config.input);
        let rules     = self.config.rule_source();
        let artifacts = self.run(&source, rules.as_ref())?;

        if self.config.dry_run {
            tracing::info!("Dry run: no files written");
        } else {
            AtomicCorpusWriter::new(self.config.output_paths())
                .commit(&artifacts)
                .context("Cannot write run outputs")?;
        }
        Ok(artifacts)
    }

    /// Run the selected stages entirely in memory.
    pub fn run(&self, source: &dyn RecordSource, rules: &dyn RuleSource) -> Result<RunArtifacts> {
        let cfg = &self.config;
        cfg.validate().context("Invalid pipeline configuration")?;

        // ── Step 1: Rule set ──────────────────────────────────────────────────
        let store = load_store(rules, cfg.rule_load_attempts, cfg.rule_backoff())
            .with_context(|| format!("Cannot load rule set from {}", rules.describe()))?;
        let store = Arc::new(store);

        // ── Step 2: Corpus ────────────────────────────────────────────────────
        let loaded = source.load().context("Cannot load corpus")?;
        let seen   = loaded.seen;
        let (mut records, mut rejected) = if cfg.runs(Stage::Classify) {
            (loaded.records, loaded.rejected)
        } else {
            // Labels come from the input, so they have to be legal ones
            reject_unknown_labels(loaded, &store)
        };

        // ── Step 3: Classify ──────────────────────────────────────────────────
        if cfg.runs(Stage::Classify) {
            records = ClassifyUseCase::new(Arc::clone(&store), cfg.low_confidence_threshold).execute(records);
        }

        // ── Step 4: Resolve conflicts ─────────────────────────────────────────
        let mut resolution = ResolveOutcome::default();
        if cfg.runs(Stage::ResolveConflicts) {
            resolution = ResolveUseCase::new(Arc::clone(&store)).execute(records);
            records    = std::mem::take(&mut resolution.records);
        }

        // ── Step 5: Deduplicate ───────────────────────────────────────────────
        let audit = if cfg.runs(Stage::Dedupe) {
            let outcome = DedupeUseCase::new(cfg.dedupe_config()).execute(records);
            records = outcome.survivors;
            outcome.audit
        } else {
            DuplicateAudit::default()
        };

        // ── Step 6: Report ────────────────────────────────────────────────────
        rejected.sort_by_key(|r| r.position);
        let (flag_counts, mut flagged_for_review) = RunReport::flag_summary(&records);
        flagged_for_review.extend(RunReport::retired_for_review(&audit));

        let mut report = RunReport {
            rule_set_version:     store.version().to_string(),
            stages:               cfg.stages(),
            config:               serde_json::to_value(cfg).context("Cannot serialise configuration")?,
            input_records:        seen,
            rejected,
            label_counts:         LabelCounts::from_records(&records),
            flag_counts,
            conflicts_resolved:   resolution.resolved,
            conflicts_flagged:    resolution.flagged,
            resolutions:          resolution.resolutions,
            duplicate_groups:     audit.merges().count(),
            retired:              audit.retired.iter().map(|r| r.id.clone()).collect(),
            near_misses:          audit.near_misses.clone(),
            output_records:       records.len(),
            flagged_for_review,
            invariant_violations: resolution.violations,
            status:               RunStatus::Success,
        };
        if report.needs_attention() {
            report.status = RunStatus::SuccessWithFlags;
        }

        tracing::info!(
            input = report.input_records,
            rejected = report.rejected.len(),
            output = report.output_records,
            review = report.flagged_for_review.len(),
            status = ?report.status,
            "Run complete"
        );

        Ok(RunArtifacts { corpus: records, report, audit })
    }
}

/// Split off records whose existing labels are not in the rule set's catalogue.
fn reject_unknown_labels(loaded: LoadedCorpus, store: &RuleStore) -> (Vec<QuestionRecord>, Vec<Rejection>) {
    let LoadedCorpus { records, positions, mut rejected, .. } = loaded;
    let mut kept = Vec::with_capacity(records.len());

    for (record, position) in records.into_iter().zip(positions) {
        let bad = Axis::ALL.into_iter().find(|a| !store.is_legal(*a, record.label(*a)));
        match bad {
            Some(axis) => {
                let e = RecordError::UnknownLabel {
                    id:    record.id.clone(),
                    axis,
                    label: record.label(axis).to_string(),
                };
                tracing::warn!(position, id = %record.id, "Rejected input record: {e}");
                rejected.push(Rejection { position, id: Some(record.id.clone()), reason: e.to_string() });
            }
            None => kept.push(record),
        }
    }
    (kept, rejected)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Flag;
    use crate::domain::taxonomy::UNCLASSIFIED;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    /// Corpus held in memory, parsed by the real loader
    struct InMemory(&'static str);

    impl RecordSource for InMemory {
        fn load(&self) -> std::result::Result<LoadedCorpus, crate::domain::error::CorpusError> {
            JsonCorpusLoader::new("memory.json").parse(self.0, "memory.json")
        }
    }

    const CORPUS: &str = r#"[
        { "id": "q1", "text": "Constantinople fell in 1453.", "difficulty": "preliminary" },
        { "id": "q2", "text": "CONSTANTINOPLE fell in 1453!", "difficulty": "finals" },
        { "id": "q3", "text": "Which pharaoh built the <b>Great Pyramid</b> at Giza?", "difficulty": "semifinals" },
        { "id": "q4", "text": "This treaty ended the war in 1919.", "answer": "Treaty of Versailles", "difficulty": "finals" },
        { "id": "q5", "text": "Which president signed the Emancipation Proclamation during the Civil War?", "difficulty": "quarterfinals" },
        { "text": "orphan without id", "difficulty": "finals" }
    ]"#;

    fn config(stages: Vec<Stage>) -> PipelineConfig {
        PipelineConfig { stages, rule_load_backoff_ms: 1, ..PipelineConfig::default() }
    }

    fn run(stages: Vec<Stage>, corpus: &'static str) -> RunArtifacts {
        PipelineUseCase::new(config(stages)).run(&InMemory(corpus), &BuiltinRules).unwrap()
    }

    #[test]
    fn test_full_pipeline_properties() {
        let out   = run(Stage::ALL.to_vec(), CORPUS);
        let store = RuleStore::compile(BuiltinRules.load_rules().unwrap()).unwrap();

        // Totality
        for r in &out.corpus {
            for axis in Axis::ALL {
                assert!(store.is_legal(axis, r.label(axis)), "{} has illegal {axis}", r.id);
            }
        }

        // Conflict invariant
        assert!(out.report.invariant_violations.is_empty());
        for r in out.corpus.iter().filter(|r| !r.has_flag(Flag::NeedsReview)) {
            assert!(!store.constraints().iter().any(|c| c.matches(&r.labels())));
        }

        // Duplicate coverage: the two Constantinople records merge
        let grouped: BTreeSet<&str> = out.audit.groups.iter().flat_map(|g| g.members.iter().map(String::as_str)).collect();
        assert_eq!(grouped, ["q1", "q2", "q3", "q4", "q5"].into_iter().collect());
        assert_eq!(out.report.retired, vec!["q2".to_string()]);
        assert_eq!(out.report.duplicate_groups, 1);
        assert_eq!(out.corpus.len(), 4);

        // Bookkeeping
        assert_eq!(out.report.input_records, 6);
        assert_eq!(out.report.rejected.len(), 1);
        assert_eq!(out.report.status, RunStatus::SuccessWithFlags);
        assert_eq!(out.corpus[0].answer_type, UNCLASSIFIED);
    }

    #[test]
    fn test_full_pipeline_is_byte_identical_across_runs() {
        let a = run(Stage::ALL.to_vec(), CORPUS);
        let b = run(Stage::ALL.to_vec(), CORPUS);
        assert_eq!(serde_json::to_string(&a.corpus).unwrap(), serde_json::to_string(&b.corpus).unwrap());
        assert_eq!(serde_json::to_string(&a.report).unwrap(), serde_json::to_string(&b.report).unwrap());
        assert_eq!(serde_json::to_string(&a.audit).unwrap(), serde_json::to_string(&b.audit).unwrap());
    }

    #[test]
    fn test_resolve_only_run_on_labelled_corpus() {
        let corpus = r#"[
            { "id": "a", "text": "Who crossed the Delaware?", "difficulty": "finals",
              "region": "United States", "era": "Ancient World (pre-500 CE)" },
            { "id": "b", "text": "Who founded Atlantis?", "difficulty": "finals",
              "region": "Atlantis" }
        ]"#;
        let out = run(vec![Stage::ResolveConflicts], corpus);

        assert_eq!(out.corpus.len(), 1);
        assert_eq!(out.corpus[0].era, UNCLASSIFIED);
        assert_eq!(out.report.conflicts_resolved, 1);
        assert_eq!(out.report.rejected[0].id.as_deref(), Some("b"));
        assert!(out.report.rejected[0].reason.contains("Atlantis"));
        assert_eq!(out.report.stages, vec![Stage::ResolveConflicts]);
        assert!(out.audit.groups.is_empty());
    }

    #[test]
    fn test_retired_duplicate_keeps_its_review_flag_in_the_report() {
        let corpus = r#"[
            { "id": "keep", "text": "Who built Machu Picchu?", "difficulty": "finals",
              "region": "Americas (Pre-Columbian)", "era": "Medieval Era (500-1450)",
              "confidence": { "region": 0.9, "era": 0.8 } },
            { "id": "dup", "text": "who built machu picchu", "difficulty": "finals",
              "region": "Americas (Pre-Columbian)", "era": "Contemporary Era (1945-present)" }
        ]"#;
        let out = run(vec![Stage::ResolveConflicts, Stage::Dedupe], corpus);

        assert_eq!(out.corpus.len(), 1);
        assert_eq!(out.corpus[0].id, "keep");
        assert!(!out.corpus[0].has_flag(Flag::NeedsReview));
        assert_eq!(out.report.retired, vec!["dup".to_string()]);

        let entry = out.report.flagged_for_review.iter().find(|f| f.id == "dup").unwrap();
        assert!(entry.flags.contains(&Flag::NeedsReview));
        assert_eq!(entry.retired_into.as_deref(), Some("keep"));
        assert_eq!(out.report.conflicts_flagged, 1);
        assert_eq!(out.report.status, RunStatus::SuccessWithFlags);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let cfg = PipelineConfig { similarity_threshold: 1.5, ..PipelineConfig::default() };
        assert!(cfg.validate().is_err());

        let cfg = PipelineConfig { stages: vec![], ..PipelineConfig::default() };
        assert!(cfg.validate().is_err());

        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_stages_run_in_fixed_order() {
        let cfg = config(vec![Stage::Dedupe, Stage::Classify, Stage::Dedupe]);
        assert_eq!(cfg.stages(), vec![Stage::Classify, Stage::Dedupe]);
    }

    #[test]
    fn test_execute_writes_outputs_and_dry_run_does_not() {
        let dir   = tempdir().unwrap();
        let input = dir.path().join("questions.json");
        std::fs::write(&input, CORPUS).unwrap();

        let mut cfg = config(Stage::ALL.to_vec());
        cfg.input   = input;
        cfg.output  = dir.path().join("dry.json");
        cfg.dry_run = true;
        PipelineUseCase::new(cfg.clone()).execute().unwrap();
        assert!(!cfg.output.exists());

        cfg.output  = dir.path().join("out.json");
        cfg.dry_run = false;
        PipelineUseCase::new(cfg.clone()).execute().unwrap();

        let corpus: Vec<QuestionRecord> =
            serde_json::from_str(&std::fs::read_to_string(&cfg.output).unwrap()).unwrap();
        assert_eq!(corpus.len(), 4);
        assert!(dir.path().join("out.report.json").exists());
        assert!(dir.path().join("out.duplicates.json").exists());
    }

    #[test]
    fn test_unreadable_rules_abort_before_anything_is_written() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("questions.json");
        std::fs::write(&input, CORPUS).unwrap();

        let cfg = PipelineConfig {
            input,
            output:             dir.path().join("out.json"),
            rules_dir:          Some(dir.path().join("missing-rules")),
            rule_load_attempts: 2,
            ..config(Stage::ALL.to_vec())
        };
        assert!(PipelineUseCase::new(cfg.clone()).execute().is_err());
        assert!(!cfg.output.exists());
    }
}
