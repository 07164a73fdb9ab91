// ============================================================
// Layer 6 — Corpus Store
// ============================================================
// Persists a finished run: the output corpus, the run report,
// the duplicate audit and optionally the label distribution CSV.
//
// A run either lands completely or not at all:
//
//   1. every file is rendered in memory first
//   2. each is written to a hidden temporary sibling
//        data/.questions.classified.json.tmp
//   3. only when all temporaries exist are they renamed over
//      the real names, sidecars first and the corpus last; each
//      previous file is set aside as .<name>.bak until the end
//
// A failure in steps 1–2 removes the temporaries and leaves any
// previous outputs untouched. A failed rename in step 3 moves the
// set-aside files back, so the corpus and its report always
// describe the same run. Rename within one directory is atomic on
// the platforms we run on; a crash in the middle of step 3 can
// still leave new sidecars next to the old corpus, with the old
// sidecars recoverable from their .bak files.
//
// File layout (defaults derived from the output path):
//   questions.classified.json             ← corpus
//   questions.classified.report.json      ← run report
//   questions.classified.duplicates.json  ← duplicate audit
//
// Reference: Rust Book §12 (I/O), std::fs::rename docs

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::traits::{CorpusSink, RunArtifacts};
use crate::infra::metrics;

/// Where each output file goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputPaths {
    pub corpus:           PathBuf,
    pub report:           PathBuf,
    pub audit:            PathBuf,
    pub distribution_csv: Option<PathBuf>,
}

impl OutputPaths {
    /// Report and audit next to the corpus: `<stem>.report.json`, `<stem>.duplicates.json`
    pub fn beside(corpus: impl Into<PathBuf>) -> Self {
        let corpus = corpus.into();
        Self {
            report:           sibling(&corpus, "report.json"),
            audit:            sibling(&corpus, "duplicates.json"),
            corpus,
            distribution_csv: None,
        }
    }
}

/// `dir/stem.<suffix>` for a path `dir/stem.ext`
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{stem}.{suffix}"))
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.bak"))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// Writes all run outputs with temp-file-and-rename.
pub struct AtomicCorpusWriter {
    paths: OutputPaths,
}

impl AtomicCorpusWriter {
    pub fn new(paths: OutputPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Render every output file, in write order. The corpus is last.
    fn render(&self, artifacts: &RunArtifacts) -> Result<Vec<(PathBuf, String)>> {
        let mut files = vec![
            (self.paths.report.clone(), to_json(&artifacts.report).context("Cannot serialise run report")?),
            (self.paths.audit.clone(),  to_json(&artifacts.audit).context("Cannot serialise duplicate audit")?),
        ];
        if let Some(csv) = &self.paths.distribution_csv {
            files.push((csv.clone(), metrics::render_csv(&artifacts.report.label_counts)));
        }
        files.push((self.paths.corpus.clone(), to_json(&artifacts.corpus).context("Cannot serialise corpus")?));
        Ok(files)
    }

    fn stage(files: &[(PathBuf, String)]) -> Result<Vec<PathBuf>> {
        let mut staged = Vec::with_capacity(files.len());
        for (path, text) in files {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = fs::create_dir_all(parent) {
                    discard(&staged);
                    return Err(e).with_context(|| format!("Cannot create directory '{}'", parent.display()));
                }
            }
            let tmp = temp_path(path);
            // Recorded before writing so a half-written file is cleaned up too
            staged.push(tmp.clone());
            if let Err(e) = fs::write(&tmp, text) {
                discard(&staged);
                return Err(e).with_context(|| format!("Cannot write '{}'", tmp.display()));
            }
        }
        Ok(staged)
    }

    /// Rename every temporary over its target. On failure the targets
    /// already replaced get their previous content back.
    fn install(files: &[(PathBuf, String)], staged: &[PathBuf]) -> Result<()> {
        let mut installed: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(files.len());
        for (tmp, (path, _)) in staged.iter().zip(files) {
            match install_one(tmp, path) {
                Ok(backup) => {
                    tracing::debug!(file = %path.display(), "Wrote output");
                    installed.push((path.as_path(), backup));
                }
                Err(e) => {
                    roll_back(&installed);
                    discard(staged);
                    return Err(e);
                }
            }
        }
        for backup in installed.iter().filter_map(|(_, b)| b.as_ref()) {
            let _ = fs::remove_file(backup);
        }
        Ok(())
    }
}

/// Set the current target aside (if any), then move the temporary in
fn install_one(tmp: &Path, path: &Path) -> Result<Option<PathBuf>> {
    let backup = if path.exists() {
        let backup = backup_path(path);
        fs::rename(path, &backup)
            .with_context(|| format!("Cannot set aside '{}'", path.display()))?;
        Some(backup)
    } else {
        None
    };
    if let Err(e) = fs::rename(tmp, path) {
        if let Some(backup) = &backup {
            let _ = fs::rename(backup, path);
        }
        return Err(e).with_context(|| format!("Cannot move '{}' into place", path.display()));
    }
    Ok(backup)
}

fn roll_back(installed: &[(&Path, Option<PathBuf>)]) {
    for (path, backup) in installed.iter().rev() {
        let restored = match backup {
            Some(backup) => fs::rename(backup, path),
            None => fs::remove_file(path),
        };
        if let Err(e) = restored {
            tracing::warn!(file = %path.display(), error = %e, "Could not restore previous output");
        }
    }
}

fn discard(temps: &[PathBuf]) {
    for tmp in temps {
        let _ = fs::remove_file(tmp);
    }
}

impl CorpusSink for AtomicCorpusWriter {
    fn commit(&self, artifacts: &RunArtifacts) -> Result<()> {
        let files  = self.render(artifacts)?;
        let staged = Self::stage(&files)?;
        Self::install(&files, &staged)?;

        tracing::info!(
            corpus = %self.paths.corpus.display(),
            report = %self.paths.report.display(),
            audit = %self.paths.audit.display(),
            "Outputs written"
        );
        Ok(())
    }
}
