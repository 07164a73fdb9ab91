// ============================================================
// Layer 6 — Rule Set Loader
// ============================================================
// Reads the versioned TOML rule files and hands the parsed
// RuleSet to the engine for compilation.
//
// Two sources share one layout:
//
//   rules/
//     ruleset.toml       ← version + file names below
//     region.toml
//     era.toml
//     answer_type.toml
//     constraints.toml
//
//   RuleDirectory  — reads the files from disk on every run, so
//                    rule edits take effect without a rebuild
//   BuiltinRules   — the same files embedded with include_str!,
//                    used when no --rules directory is given
//
// Loading is the only place in the pipeline that retries:
// transient I/O failures are retried with a growing pause, parse
// and validation failures are fatal straight away.
//
// Reference: toml crate docs, Rust Book §9 (Recoverable Errors)

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::RuleLoadError;
use crate::domain::rule::{AxisRules, ConstraintFile, RuleSet, RuleSetManifest};
use crate::domain::traits::RuleSource;
use crate::engine::rule_store::RuleStore;

/// Name of the manifest inside a rules directory
pub const MANIFEST: &str = "ruleset.toml";

/// Parse a TOML document, naming the file in the error
fn parse_toml<T: DeserializeOwned>(path: &Path, text: &str) -> Result<T, RuleLoadError> {
    toml::from_str(text).map_err(|e| RuleLoadError::Parse {
        path:    path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read the manifest, then every file it names, through `read`.
fn assemble<F>(read: F) -> Result<RuleSet, RuleLoadError>
where
    F: Fn(&str) -> Result<(PathBuf, String), RuleLoadError>,
{
    let (path, text) = read(MANIFEST)?;
    let manifest: RuleSetManifest = parse_toml(&path, &text)?;

    let mut axes = Vec::with_capacity(manifest.axes.len());
    for name in &manifest.axes {
        let (path, text) = read(name)?;
        let rules: AxisRules = parse_toml(&path, &text)?;
        tracing::debug!(file = %path.display(), axis = %rules.axis, groups = rules.rules.len(), "Read axis rules");
        axes.push(rules);
    }

    let (path, text) = read(&manifest.constraints)?;
    let constraints: ConstraintFile = parse_toml(&path, &text)?;

    Ok(RuleSet {
        version:     manifest.version,
        axes,
        constraints: constraints.constraints,
    })
}

// ─── RuleDirectory ────────────────────────────────────────────────────────────

/// Rule files under a directory on disk.
#[derive(Debug, Clone)]
pub struct RuleDirectory {
    dir: PathBuf,
}

impl RuleDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl RuleSource for RuleDirectory {
    fn describe(&self) -> String {
        format!("rules directory '{}'", self.dir.display())
    }

    fn load_rules(&self) -> Result<RuleSet, RuleLoadError> {
        assemble(|name| {
            let path = self.dir.join(name);
            std::fs::read_to_string(&path)
                .map(|text| (path.clone(), text))
                .map_err(|source| RuleLoadError::Io { path, source })
        })
    }
}

// ─── BuiltinRules ─────────────────────────────────────────────────────────────

/// The default rule files shipped inside the binary
const EMBEDDED: [(&str, &str); 5] = [
    (MANIFEST,           include_str!("../../rules/ruleset.toml")),
    ("region.toml",      include_str!("../../rules/region.toml")),
    ("era.toml",         include_str!("../../rules/era.toml")),
    ("answer_type.toml", include_str!("../../rules/answer_type.toml")),
    ("constraints.toml", include_str!("../../rules/constraints.toml")),
];

/// Rule set compiled into the binary from `rules/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinRules;

impl RuleSource for BuiltinRules {
    fn describe(&self) -> String {
        "builtin rules".to_string()
    }

    fn load_rules(&self) -> Result<RuleSet, RuleLoadError> {
        assemble(|name| {
            EMBEDDED
                .iter()
                .find(|(file, _)| *file == name)
                .map(|(file, text)| (PathBuf::from(format!("<builtin>/{file}")), text.to_string()))
                .ok_or_else(|| RuleLoadError::Invalid(format!("builtin rule set has no file '{name}'")))
        })
    }
}

// ─── Retry ────────────────────────────────────────────────────────────────────

/// Load a rule set, retrying transient failures.
///
/// The pause doubles after every failed attempt, starting at `backoff`.
pub fn load_with_retry(
    source:   &dyn RuleSource,
    attempts: u32,
    backoff:  Duration,
) -> Result<RuleSet, RuleLoadError> {
    let attempts  = attempts.max(1);
    let mut pause = backoff;
    let mut attempt = 1;

    loop {
        match source.load_rules() {
            Ok(set) => return Ok(set),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    source = %source.describe(),
                    attempt,
                    of = attempts,
                    error = %e,
                    "Rule set load failed, retrying"
                );
                std::thread::sleep(pause);
                pause   *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Load and compile in one step. Any failure here is fatal for the run.
pub fn load_store(
    source:   &dyn RuleSource,
    attempts: u32,
    backoff:  Duration,
) -> Result<RuleStore, RuleLoadError> {
    let set   = load_with_retry(source, attempts, backoff)?;
    let store = RuleStore::compile(set)?;
    tracing::info!(
        source = %source.describe(),
        version = %store.version(),
        rules = store.rule_count(),
        constraints = store.constraints().len(),
        "Loaded rule set"
    );
    Ok(store)
}
