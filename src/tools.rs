//! External tool discovery.
//!
//! The pipeline drives three external executables: `llvm-profdata` (merge),
//! `llvm-cov` (query/export), and a symbol demangler (`rustfilt`). The Rust
//! toolchain ships its own copies of the LLVM pair via the `llvm-tools`
//! component; those are preferred over whatever happens to be on `PATH`
//! because they match the compiler's profile format version.
//!
//! Resolution is an explicit ordered list of candidate locations, not
//! fallback exception handling.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Result, bail};
use tracing::debug;

/// Install guidance for the toolchain-bundled LLVM tools.
pub const LLVM_TOOLS_HINT: &str = "install the LLVM tools: rustup component add llvm-tools";

/// Install guidance for the Rust symbol demangler.
pub const DEMANGLER_HINT: &str = "install rustfilt: cargo install rustfilt";

/// One place a tool may live, tried in order.
#[derive(Clone, Debug)]
enum Candidate {
    /// A specific directory (e.g. the toolchain's bundled LLVM bin dir).
    Dir(PathBuf),
    /// The system `PATH`.
    SearchPath,
}

/// Ordered tool lookup across candidate locations.
#[derive(Clone, Debug)]
pub struct ToolResolver {
    candidates: Vec<Candidate>,
}

impl ToolResolver {
    /// Standard resolution order: the active toolchain's bundled LLVM tools
    /// directory (when `rustc` is available), then the system `PATH`.
    pub fn from_rustc() -> Self {
        let mut candidates = Vec::new();
        if let Some(dir) = toolchain_bin_dir() {
            debug!(dir = %dir.display(), "toolchain LLVM tools directory");
            candidates.push(Candidate::Dir(dir));
        }
        candidates.push(Candidate::SearchPath);
        Self { candidates }
    }

    /// Resolver over explicit directories, optionally ending with `PATH`.
    /// Used by tests; also handy for hermetic CI environments.
    pub fn with_dirs(dirs: Vec<PathBuf>, search_path: bool) -> Self {
        let mut candidates: Vec<Candidate> = dirs.into_iter().map(Candidate::Dir).collect();
        if search_path {
            candidates.push(Candidate::SearchPath);
        }
        Self { candidates }
    }

    /// Locate `name`, or fail with a message naming the tool and how to
    /// install it.
    pub fn resolve(&self, name: &str, guidance: &str) -> Result<PathBuf> {
        for candidate in &self.candidates {
            let found = match candidate {
                Candidate::Dir(dir) => {
                    let path = dir.join(name);
                    path.is_file().then_some(path)
                }
                Candidate::SearchPath => search_path(name),
            };
            if let Some(path) = found {
                debug!(tool = name, path = %path.display(), "resolved tool");
                return Ok(path);
            }
        }
        bail!("could not locate `{name}` in the toolchain or on PATH.\n  To fix: {guidance}");
    }
}

/// `$(rustc --print sysroot)/lib/rustlib/<host>/bin`, where the `llvm-tools`
/// component installs `llvm-profdata` and `llvm-cov`.
fn toolchain_bin_dir() -> Option<PathBuf> {
    let sysroot = rustc_line(&["--print", "sysroot"])?;
    let host = Command::new("rustc")
        .args(["-vV"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .find_map(|l| l.strip_prefix("host: ").map(str::to_owned))
        })?;

    let dir = PathBuf::from(sysroot)
        .join("lib")
        .join("rustlib")
        .join(host)
        .join("bin");
    dir.is_dir().then_some(dir)
}

fn rustc_line(args: &[&str]) -> Option<String> {
    let output = Command::new("rustc").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    (!line.is_empty()).then_some(line)
}

fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}
