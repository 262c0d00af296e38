//! Object-file collection for the report step.
//!
//! `llvm-cov` needs the instrumented binaries that produced the profile
//! data. They come from an explicit newline-delimited manifest, from live
//! cargo discovery, or both — selectable per report invocation. Discovery
//! order is preserved and duplicates are left in place; the downstream tool
//! tolerates them as repeated `-object` arguments.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::ValueEnum;
use tracing::debug;

use crate::run::InstrumentEnv;

/// Build profile the objects were compiled under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    Debug,
    Release,
}

impl Profile {
    /// Subdirectory of the cargo target directory for this profile.
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether to discover objects via cargo in addition to any manifest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CargoObjects {
    /// Discover only when no object manifest was supplied.
    Auto,
    /// Always discover.
    #[value(name = "true")]
    Always,
    /// Never discover.
    #[value(name = "false")]
    Never,
}

impl std::fmt::Display for CargoObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Always => write!(f, "true"),
            Self::Never => write!(f, "false"),
        }
    }
}

/// Read a newline-delimited object manifest. The file must exist.
pub fn from_manifest(path: &Path) -> Result<Vec<PathBuf>> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read object manifest {}", path.display()))?;
    Ok(body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Collect the object list for one report invocation. `instrument` is the
/// same environment `covctl run` injects, so a discovery build reports the
/// executables that actually produced the fragments.
pub fn collect(
    manifest: Option<&Path>,
    mode: CargoObjects,
    profile: Profile,
    instrument: &InstrumentEnv,
) -> Result<Vec<PathBuf>> {
    let mut objects = match manifest {
        Some(path) => from_manifest(path)?,
        None => Vec::new(),
    };

    let discover_now = match mode {
        CargoObjects::Always => true,
        CargoObjects::Auto => manifest.is_none(),
        CargoObjects::Never => false,
    };
    if discover_now {
        objects.extend(discover(profile, instrument)?);
    }

    if objects.is_empty() {
        bail!(
            "no object files to report on.\n  \
             To fix: pass --input-objects FILE, or allow discovery with --cargo-objects auto"
        );
    }
    debug!(count = objects.len(), "collected report objects");
    Ok(objects)
}

/// Live discovery: declared workspace `bin` targets cross-referenced with
/// the test executables cargo reports for `--no-run`.
fn discover(profile: Profile, instrument: &InstrumentEnv) -> Result<Vec<PathBuf>> {
    let mut metadata_cmd = Command::new("cargo");
    metadata_cmd.args(["metadata", "--format-version", "1", "--no-deps"]);
    let metadata = cargo_stdout(&mut metadata_cmd, "cargo metadata")?;
    let mut objects = bin_targets(&metadata, profile)?;

    let messages = cargo_stdout(
        &mut discovery_build(profile, instrument),
        "cargo test --no-run",
    )?;
    objects.extend(test_executables(&messages));

    Ok(objects)
}

/// The discovery build runs under the same environment as `covctl run`.
/// RUSTFLAGS is part of cargo's unit fingerprint: a flag-less invocation
/// here would rebuild the workspace without instrumentation and report
/// fresh executables carrying no coverage mapping, which the profile data
/// cannot match.
fn discovery_build(profile: Profile, instrument: &InstrumentEnv) -> Command {
    let mut cmd = Command::new("cargo");
    cmd.args(["test", "--no-run", "--message-format=json"]);
    if matches!(profile, Profile::Release) {
        cmd.arg("--release");
    }
    instrument.apply(&mut cmd);
    cmd
}

fn cargo_stdout(cmd: &mut Command, what: &str) -> Result<String> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to run {what}"))?;
    if !output.status.success() {
        bail!(
            "{what} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Declared `bin` targets from `cargo metadata` JSON, resolved to
/// `<target-directory>/<profile>/<name>`.
fn bin_targets(metadata_json: &str, profile: Profile) -> Result<Vec<PathBuf>> {
    let metadata: serde_json::Value =
        serde_json::from_str(metadata_json).context("failed to parse cargo metadata output")?;

    let target_dir = metadata["target_directory"]
        .as_str()
        .context("cargo metadata output has no target_directory")?;
    let out_dir = Path::new(target_dir).join(profile.dir_name());

    let mut bins = Vec::new();
    let packages = metadata["packages"].as_array().cloned().unwrap_or_default();
    for package in &packages {
        let targets = package["targets"].as_array().cloned().unwrap_or_default();
        for target in &targets {
            let is_bin = target["kind"]
                .as_array()
                .is_some_and(|kinds| kinds.iter().any(|k| k.as_str() == Some("bin")));
            if is_bin && let Some(name) = target["name"].as_str() {
                bins.push(out_dir.join(name));
            }
        }
    }
    Ok(bins)
}

/// Test executables from `cargo test --no-run --message-format=json` output:
/// every compiler-artifact message with a non-null `executable`.
fn test_executables(messages: &str) -> Vec<PathBuf> {
    messages
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|msg| msg["reason"].as_str() == Some("compiler-artifact"))
        .filter_map(|msg| msg["executable"].as_str().map(PathBuf::from))
        .collect()
}
