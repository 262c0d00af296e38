//! The merge engine: fold pending artifacts one layer down.
//!
//! Two folds run back to back. `merge_profraw` combines the raw fragments of
//! this job into one per-job merged artifact, named from the fingerprint of
//! its input names. `merge_profdata` then combines every pending merged
//! artifact — this job's and any copied in from other CI jobs — into the
//! final aggregate consumed by all reports.
//!
//! Each fold is skipped when the output is already newer than every input
//! (mtime staleness check), and always ends by deleting its inputs so a
//! directory only ever holds not-yet-folded files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use tracing::{debug, info};

use crate::artifacts::{ArtifactDir, ArtifactKind};
use crate::config::Settings;
use crate::tools::{LLVM_TOOLS_HINT, ToolResolver};

/// Which layer `covctl merge` folds up to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MergeKind {
    /// Fold raw fragments into a per-job merged artifact only.
    Profraw,
    /// Full chain: fragments, then all merged artifacts into the aggregate.
    Profdata,
}

impl std::fmt::Display for MergeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Profraw => write!(f, "profraw"),
            Self::Profdata => write!(f, "profdata"),
        }
    }
}

/// Seam around the external merge tool, so tests can count invocations.
pub trait ProfileMerger {
    /// Merge the files listed in `manifest` (newline-delimited paths) into
    /// `output`.
    fn merge(&self, manifest: &Path, output: &Path) -> Result<()>;
}

/// The real merge tool: `llvm-profdata merge`.
#[derive(Debug)]
pub struct LlvmProfdata {
    bin: PathBuf,
}

impl LlvmProfdata {
    pub const fn new(bin: PathBuf) -> Self {
        Self { bin }
    }
}

impl ProfileMerger for LlvmProfdata {
    fn merge(&self, manifest: &Path, output: &Path) -> Result<()> {
        let status = Command::new(&self.bin)
            .arg("merge")
            .arg("-sparse")
            .arg("-f")
            .arg(manifest)
            .arg("-o")
            .arg(output)
            .status()
            .with_context(|| format!("failed to run {}", self.bin.display()))?;
        if !status.success() {
            bail!(
                "`llvm-profdata merge` failed with {status} (output: {})",
                output.display()
            );
        }
        Ok(())
    }
}

/// Fold every pending file in `dir` into `output`.
///
/// Returns `false` for an empty directory — no data yet, not an error, and
/// no tool is invoked. Otherwise the tool runs only when the output is
/// missing or strictly older than the newest input; either way the input
/// directory is cleaned afterwards, and `true` is returned.
pub fn fold(dir: &ArtifactDir, output: &Path, tool: &dyn ProfileMerger) -> Result<bool> {
    let files = dir.list()?;
    if files.is_empty() {
        debug!(dir = %dir.path().display(), "nothing to fold");
        return Ok(false);
    }

    let manifest = dir.write_manifest(&files)?;
    let newest = ArtifactDir::newest_mtime(&files)?;
    let output_mtime = fs::metadata(output).and_then(|m| m.modified()).ok();

    let stale = match (newest, output_mtime) {
        (_, None) => true,
        (Some(newest), Some(out)) => newest > out,
        (None, Some(_)) => false,
    };

    if stale {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tool.merge(&manifest, output)?;
        info!(
            inputs = files.len(),
            output = %output.display(),
            "merged profiling data"
        );
    } else {
        debug!(output = %output.display(), "output up to date, skipping merge");
    }

    dir.clean()?;
    Ok(true)
}

/// Fold raw fragments into `profdata/<prefix>-<fingerprint>.profdata`.
/// Returns `false` when no fragments were pending.
pub fn merge_profraw(settings: &Settings, tool: &dyn ProfileMerger) -> Result<bool> {
    let raw = ArtifactDir::new(settings.layout.profraw_dir(), ArtifactKind::Fragment);
    raw.ensure()?;

    let files = raw.list()?;
    if files.is_empty() {
        return Ok(false);
    }

    let name = format!(
        "{}-{}.{}",
        settings.prefix,
        ArtifactDir::fingerprint(&files),
        ArtifactKind::Merged.suffix()
    );
    let output = settings.layout.profdata_dir().join(name);
    fold(&raw, &output, tool)
}

/// Run the full chain: fragments first, then every pending merged artifact
/// into the final aggregate. Returns `true` when an aggregate exists
/// afterwards (freshly folded or left over from an earlier run).
pub fn merge_profdata(settings: &Settings, tool: &dyn ProfileMerger) -> Result<bool> {
    merge_profraw(settings, tool)?;

    let merged = ArtifactDir::new(settings.layout.profdata_dir(), ArtifactKind::Merged);
    merged.ensure()?;

    let folded = fold(&merged, &settings.layout.aggregate_path(), tool)?;
    Ok(folded || settings.layout.aggregate_path().exists())
}

/// `covctl merge` entry point.
pub fn run(kind: MergeKind, settings: &Settings) -> Result<()> {
    let resolver = ToolResolver::from_rustc();
    let bin = match &settings.tools.llvm_profdata {
        Some(path) => path.clone(),
        None => resolver.resolve("llvm-profdata", LLVM_TOOLS_HINT)?,
    };
    let tool = LlvmProfdata::new(bin);

    let had_data = match kind {
        MergeKind::Profraw => merge_profraw(settings, &tool)?,
        MergeKind::Profdata => merge_profdata(settings, &tool)?,
    };

    if had_data {
        match kind {
            MergeKind::Profraw => println!(
                "Merged fragments into {}",
                settings.layout.profdata_dir().display()
            ),
            MergeKind::Profdata => println!(
                "Coverage aggregate: {}",
                settings.layout.aggregate_path().display()
            ),
        }
    } else {
        println!(
            "No coverage data found at {}",
            settings.layout.profraw_dir().display()
        );
    }
    Ok(())
}
