//! On-disk artifact directories for profiling data.
//!
//! An [`ArtifactDir`] holds exactly one layer of the merge pipeline: either
//! raw per-process fragments (`.profraw`) written by instrumented binaries,
//! or merged artifacts (`.profdata`) produced by earlier folds. The directory
//! only ever holds pending, not-yet-folded files — a successful fold deletes
//! its inputs, which bounds disk growth across many CI jobs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

/// Name of the transient input-list manifest handed to the merge tool.
/// Excluded from [`ArtifactDir::list`] by the suffix filter.
pub const MANIFEST_NAME: &str = "files.lst";

/// Hex length of the name fingerprint embedded in merged-artifact names.
const FINGERPRINT_LEN: usize = 12;

/// Which layer of profiling data a directory holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Raw per-process fragments written by instrumented binaries.
    Fragment,
    /// Merged artifacts produced by a previous fold.
    Merged,
}

impl ArtifactKind {
    /// File suffix recognized for this layer.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Fragment => "profraw",
            Self::Merged => "profdata",
        }
    }
}

/// One directory of pending profiling artifacts.
#[derive(Debug)]
pub struct ArtifactDir {
    path: PathBuf,
    kind: ArtifactKind,
}

impl ArtifactDir {
    pub const fn new(path: PathBuf, kind: ArtifactKind) -> Self {
        Self { path, kind }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory if absent. Other operations assume it exists
    /// for the duration of the pipeline run.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))
    }

    /// Eligible files, ordered by name. Only files carrying this layer's
    /// suffix are returned; the manifest and any stray files are ignored.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| Path::new(n).extension().is_some_and(|x| x == self.kind.suffix()))
            .collect();
        names.sort();

        Ok(names.into_iter().map(|n| self.path.join(n)).collect())
    }

    /// Stable hash over the sequence of file *names* — never contents.
    /// Identical input names imply the re-mergeable state is unchanged,
    /// so staleness can be checked without re-reading large binary payloads.
    pub fn fingerprint(files: &[PathBuf]) -> String {
        let mut hasher = Sha256::new();
        for file in files {
            if let Some(name) = file.file_name() {
                hasher.update(name.as_encoded_bytes());
                hasher.update(b"\n");
            }
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(FINGERPRINT_LEN);
        for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    /// Newest modification time among the given files, for the staleness
    /// check against an existing fold output.
    pub fn newest_mtime(files: &[PathBuf]) -> Result<Option<SystemTime>> {
        let mut newest = None;
        for file in files {
            let mtime = fs::metadata(file)
                .and_then(|m| m.modified())
                .with_context(|| format!("failed to stat {}", file.display()))?;
            if newest.is_none_or(|n| mtime > n) {
                newest = Some(mtime);
            }
        }
        Ok(newest)
    }

    /// Write the newline-delimited input list consumed by the merge tool.
    pub fn write_manifest(&self, files: &[PathBuf]) -> Result<PathBuf> {
        let manifest = self.path.join(MANIFEST_NAME);
        let mut out = fs::File::create(&manifest)
            .with_context(|| format!("failed to create {}", manifest.display()))?;
        for file in files {
            writeln!(out, "{}", file.display())
                .with_context(|| format!("failed to write {}", manifest.display()))?;
        }
        Ok(manifest)
    }

    /// Delete every file in the directory, including the manifest.
    /// Called only after a successful (or skipped-up-to-date) fold.
    pub fn clean(&self) -> Result<()> {
        let entries = fs::read_dir(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        for entry in entries.filter_map(std::result::Result::ok) {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                fs::remove_file(entry.path())
                    .with_context(|| format!("failed to remove {}", entry.path().display()))?;
            }
        }
        Ok(())
    }
}
