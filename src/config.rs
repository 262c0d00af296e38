//! Pipeline configuration (`covctl.toml`) and output layout.
//!
//! Defines the typed configuration for an optional `covctl.toml` in the
//! working directory, the resolved [`Settings`] the commands run against,
//! and the [`OutputLayout`] mapping the top-level output directory to its
//! artifact subdirectories.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "covctl.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level pipeline configuration.
///
/// Parsed from `covctl.toml`. Missing fields use sensible defaults.
/// Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CovConfig {
    /// Output location settings.
    #[serde(default)]
    pub output: OutputConfig,

    /// External tool overrides.
    #[serde(default)]
    pub tools: ToolOverrides,
}

/// Output location settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Top-level output directory (default: `"coverage"`).
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Namespace prefix for fragment file names. Defaults to the host name
    /// so fragments from concurrent CI hosts never collide.
    #[serde(default)]
    pub prefix: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            prefix: None,
        }
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("coverage")
}

/// Explicit paths for the external tools. Any entry set here bypasses
/// toolchain/PATH resolution entirely.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ToolOverrides {
    pub llvm_profdata: Option<PathBuf>,
    pub llvm_cov: Option<PathBuf>,
    pub demangler: Option<PathBuf>,
}

impl CovConfig {
    /// Load from the given file, or all defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// OutputLayout
// ---------------------------------------------------------------------------

/// On-disk layout under the top-level output directory:
///
/// ```text
/// <root>/
///   profraw/            raw fragments + transient file list
///   profdata/           per-job merged artifacts + transient file list
///   coverage.profdata   final aggregate
///   report/             rendered output
/// ```
#[derive(Clone, Debug)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub const fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profraw_dir(&self) -> PathBuf {
        self.root.join("profraw")
    }

    pub fn profdata_dir(&self) -> PathBuf {
        self.root.join("profdata")
    }

    pub fn aggregate_path(&self) -> PathBuf {
        self.root.join("coverage.profdata")
    }

    pub fn report_dir(&self) -> PathBuf {
        self.root.join("report")
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Resolved per-invocation settings: config file merged with CLI overrides.
#[derive(Clone, Debug)]
pub struct Settings {
    pub layout: OutputLayout,
    pub prefix: String,
    pub tools: ToolOverrides,
}

impl Settings {
    /// Merge `covctl.toml` (if present) with the global CLI flags.
    /// The output root is made absolute so child processes that change
    /// directory still write fragments to the right place.
    pub fn load(dir_override: Option<PathBuf>, prefix_override: Option<String>) -> Result<Self> {
        let config = CovConfig::load(Path::new(CONFIG_FILE))?;

        let dir = dir_override.unwrap_or(config.output.dir);
        let root = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()
                .context("failed to determine working directory")?
                .join(dir)
        };

        let prefix = prefix_override
            .or(config.output.prefix)
            .unwrap_or_else(host_name);

        Ok(Self {
            layout: OutputLayout::new(root),
            prefix,
            tools: config.tools,
        })
    }
}

/// Best-effort host name: `HOSTNAME` env var, then the `hostname` command,
/// then a fixed fallback. Only used to namespace fragment file names.
fn host_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME")
        && !name.trim().is_empty()
    {
        return name.trim().to_owned();
    }

    if let Ok(output) = Command::new("hostname").output()
        && output.status.success()
    {
        let name = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if !name.is_empty() {
            return name;
        }
    }

    "host".to_owned()
}
