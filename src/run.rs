//! Run a child command under coverage instrumentation.
//!
//! The instrumentation environment is an explicit value applied to the one
//! child invocation — never ambient process-wide state — so flags cannot
//! leak into unrelated commands.

use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::debug;

use crate::artifacts::{ArtifactDir, ArtifactKind};
use crate::config::{OutputLayout, Settings};

/// Error indicating the child process exited with a non-zero status.
/// Carries the exit code for the caller to propagate.
#[derive(Debug)]
pub struct ExitCodeError(pub i32);

impl std::fmt::Display for ExitCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "command exited with code {}", self.0)
    }
}

impl std::error::Error for ExitCodeError {}

/// Run a command with coverage instrumentation enabled
///
/// The child (and its descendants, e.g. test binaries spawned by cargo)
/// write one raw fragment per process into the profraw directory. The
/// child's exit code is passed through.
///
/// Examples:
///   covctl run -- cargo test
///   covctl run -- target/debug/integration-suite --filter smoke
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Command and arguments to run (after --)
    #[arg(last = true, required = true)]
    pub cmd: Vec<String>,
}

/// Environment injected into the instrumented child: where each process
/// writes its fragment, and the compiler flags that enable instrumentation.
#[derive(Clone, Debug)]
pub struct InstrumentEnv {
    /// `LLVM_PROFILE_FILE` value; `%p` expands to the process id and `%m`
    /// to the binary's module signature, so concurrent writers never
    /// collide.
    pub profile_file: String,
    /// `RUSTFLAGS` value, existing flags preserved.
    pub rustflags: String,
}

impl InstrumentEnv {
    pub fn new(layout: &OutputLayout, prefix: &str, base_rustflags: Option<&str>) -> Self {
        let profile_file = format!(
            "{}/{prefix}-%p-%m.{}",
            layout.profraw_dir().display(),
            ArtifactKind::Fragment.suffix()
        );
        let rustflags = match base_rustflags {
            Some(base) if !base.trim().is_empty() => format!("{base} -Cinstrument-coverage"),
            _ => "-Cinstrument-coverage".to_owned(),
        };
        Self {
            profile_file,
            rustflags,
        }
    }

    /// Apply to one child invocation only.
    pub fn apply(&self, cmd: &mut Command) {
        cmd.env("LLVM_PROFILE_FILE", &self.profile_file);
        cmd.env("RUSTFLAGS", &self.rustflags);
    }
}

/// `covctl run` entry point.
pub fn run(args: &RunArgs, settings: &Settings) -> Result<()> {
    if args.cmd.is_empty() {
        bail!(
            "No command specified.\n  \
             Usage: covctl run -- <command> [args...]\n  \
             Example: covctl run -- cargo test"
        );
    }

    // Fragments land here; the directory must exist before the child runs.
    ArtifactDir::new(settings.layout.profraw_dir(), ArtifactKind::Fragment).ensure()?;

    let base_rustflags = std::env::var("RUSTFLAGS").ok();
    let env = InstrumentEnv::new(&settings.layout, &settings.prefix, base_rustflags.as_deref());
    debug!(profile_file = %env.profile_file, "instrumentation environment");

    let mut cmd = Command::new(&args.cmd[0]);
    cmd.args(&args.cmd[1..]);
    env.apply(&mut cmd);

    let status = cmd
        .status()
        .with_context(|| format!("Failed to run '{}'", args.cmd[0]))?;

    if !status.success() {
        return Err(ExitCodeError(status.code().unwrap_or(1)).into());
    }
    Ok(())
}
