//! Report rendering over the final aggregate.
//!
//! A closed set of renderer variants shares one parameter bundle
//! ([`ReportRequest`]) and one contract: `generate()` writes the report to
//! stdout or disk, `open()` optionally launches a platform viewer (default
//! no-op). The published variant composes the plain HTML render twice —
//! once scoped to the requested sources, once unscoped — and synthesizes a
//! commit-addressed navigation index over both.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use tracing::{debug, info};

use crate::config::Settings;
use crate::merge::{self, LlvmProfdata, ProfileMerger};
use crate::objects::{self, CargoObjects, Profile};
use crate::run::InstrumentEnv;
use crate::tools::{DEMANGLER_HINT, LLVM_TOOLS_HINT, ToolResolver};

/// Display length of the commit id embedded in the published index.
const COMMIT_ID_LEN: usize = 10;

/// Generate a coverage report from the final aggregate
///
/// Runs the full merge chain first, so `covctl report` straight after a
/// test run does the right thing. Source paths restrict the report to the
/// current project; pass --all to include dependency sources instead.
#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Build profile the instrumented objects were compiled under
    #[arg(long, value_enum, default_value_t = Profile::Debug)]
    pub profile: Profile,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Html)]
    pub format: Format,

    /// Newline-delimited manifest of object files to report on
    #[arg(long, value_name = "FILE")]
    pub input_objects: Option<PathBuf>,

    /// Discover objects via cargo (auto = only when no manifest is given)
    #[arg(long, value_enum, default_value_t = CargoObjects::Auto)]
    pub cargo_objects: CargoObjects,

    /// Commit URL embedded in the published report index (github format)
    #[arg(long, value_name = "URL")]
    pub commit_url: Option<String>,

    /// Demangler executable (default: rustfilt from toolchain or PATH)
    #[arg(long, value_name = "PATH")]
    pub demangler: Option<PathBuf>,

    /// Open the rendered report in a browser
    #[arg(long)]
    pub open: bool,

    /// Include dependency sources (mutually exclusive with [SOURCES])
    #[arg(long)]
    pub all: bool,

    /// Source paths to restrict the report to (default: current directory)
    #[arg(value_name = "SOURCES")]
    pub sources: Vec<PathBuf>,
}

/// Requested report format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Per-file summary table on stdout
    Summary,
    /// Full annotated sources as text on stdout
    Text,
    /// LCOV line-coverage export on stdout
    Lcov,
    /// Static HTML under report/
    Html,
    /// Published two-page HTML site for commit-addressed hosting
    Github,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Summary => write!(f, "summary"),
            Self::Text => write!(f, "text"),
            Self::Lcov => write!(f, "lcov"),
            Self::Html => write!(f, "html"),
            Self::Github => write!(f, "github"),
        }
    }
}

/// Immutable parameter bundle shared by every renderer variant.
#[derive(Clone, Debug)]
pub struct ReportRequest {
    pub llvm_cov: PathBuf,
    pub demangler: PathBuf,
    pub aggregate: PathBuf,
    pub objects: Vec<PathBuf>,
    /// Source scope; empty means "all sources including dependencies".
    pub sources: Vec<PathBuf>,
    pub report_dir: PathBuf,
}

/// The renderer variants. `PublishedHtml` reuses the plain HTML render step
/// by composition, not by subtyping.
#[derive(Clone, Debug)]
pub enum Renderer {
    Summary,
    Text,
    Lcov,
    Html,
    PublishedHtml { commit_url: String },
}

impl Renderer {
    /// Write the report to stdout or disk.
    pub fn generate(&self, request: &ReportRequest) -> Result<()> {
        match self {
            Self::Summary => llvm_cov(request, "report", &[], &request.sources),
            Self::Text => llvm_cov(
                request,
                "show",
                &[OsString::from("-format=text")],
                &request.sources,
            ),
            Self::Lcov => llvm_cov(
                request,
                "export",
                &[OsString::from("-format=lcov")],
                &request.sources,
            ),
            Self::Html => render_html(request, &request.report_dir, &request.sources),
            Self::PublishedHtml { commit_url } => publish(request, commit_url),
        }
    }

    /// Launch a platform viewer on the rendered output. No-op for formats
    /// that write to stdout.
    pub fn open(&self, request: &ReportRequest) -> Result<()> {
        match self {
            Self::Html | Self::PublishedHtml { .. } => {
                open_in_viewer(&request.report_dir.join("index.html"))
            }
            _ => Ok(()),
        }
    }
}

/// Fail fast on flag combinations no renderer can satisfy. Runs before any
/// external process is spawned.
pub fn validate(args: &ReportArgs) -> Result<()> {
    if args.all && !args.sources.is_empty() {
        bail!("--all and explicit source paths are mutually exclusive; pass one or the other");
    }
    if args.format == Format::Github && args.commit_url.is_none() {
        bail!("--format github requires --commit-url to address the published report");
    }
    Ok(())
}

/// Ensure the merge chain has completed and an aggregate exists.
/// A report against a pipeline that never produced fragments is a
/// legitimate but unsatisfiable request, reported as such.
pub fn prepare(settings: &Settings, tool: &dyn ProfileMerger) -> Result<()> {
    merge::merge_profdata(settings, tool)?;
    let aggregate = settings.layout.aggregate_path();
    if !aggregate.is_file() {
        bail!("no coverage data found at {}", aggregate.display());
    }
    Ok(())
}

/// `covctl report` entry point.
pub fn run(args: &ReportArgs, settings: &Settings) -> Result<()> {
    validate(args)?;

    let resolver = ToolResolver::from_rustc();
    let profdata_bin = match &settings.tools.llvm_profdata {
        Some(path) => path.clone(),
        None => resolver.resolve("llvm-profdata", LLVM_TOOLS_HINT)?,
    };
    prepare(settings, &LlvmProfdata::new(profdata_bin))?;

    // Discovery builds under the same environment `covctl run` injects, so
    // the reported executables are the ones that produced the fragments.
    let base_rustflags = std::env::var("RUSTFLAGS").ok();
    let instrument =
        InstrumentEnv::new(&settings.layout, &settings.prefix, base_rustflags.as_deref());
    let objects = objects::collect(
        args.input_objects.as_deref(),
        args.cargo_objects,
        args.profile,
        &instrument,
    )?;

    let llvm_cov = match &settings.tools.llvm_cov {
        Some(path) => path.clone(),
        None => resolver.resolve("llvm-cov", LLVM_TOOLS_HINT)?,
    };
    let demangler = match args.demangler.clone().or_else(|| settings.tools.demangler.clone()) {
        Some(path) => path,
        None => resolver.resolve("rustfilt", DEMANGLER_HINT)?,
    };

    let request = ReportRequest {
        llvm_cov,
        demangler,
        aggregate: settings.layout.aggregate_path(),
        objects,
        sources: source_scope(args.all, &args.sources),
        report_dir: settings.layout.report_dir(),
    };

    let renderer = match args.format {
        Format::Summary => Renderer::Summary,
        Format::Text => Renderer::Text,
        Format::Lcov => Renderer::Lcov,
        Format::Html => Renderer::Html,
        Format::Github => Renderer::PublishedHtml {
            // validate() guarantees the URL is present for this format.
            commit_url: args.commit_url.clone().unwrap_or_default(),
        },
    };

    info!(format = %args.format, "generating report");
    renderer.generate(&request)?;
    if args.open {
        renderer.open(&request)?;
    }
    Ok(())
}

/// Resolve the effective source scope: explicit paths as given, `--all` as
/// the empty (unfiltered) scope, and "current project only" by default.
fn source_scope(all: bool, sources: &[PathBuf]) -> Vec<PathBuf> {
    if all {
        Vec::new()
    } else if sources.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        sources.to_vec()
    }
}

/// Invoke an `llvm-cov` subcommand with the shared argument set. Output
/// goes wherever the tool sends it (stdout for report/export, files for
/// html). A non-zero exit is fatal and propagated.
fn llvm_cov(
    request: &ReportRequest,
    subcommand: &str,
    extra: &[OsString],
    sources: &[PathBuf],
) -> Result<()> {
    let mut cmd = Command::new(&request.llvm_cov);
    cmd.arg(subcommand);
    for object in &request.objects {
        cmd.arg("-object").arg(object);
    }
    let mut instr = OsString::from("-instr-profile=");
    instr.push(&request.aggregate);
    cmd.arg(instr);
    cmd.arg("-Xdemangler").arg(&request.demangler);
    cmd.args(extra);
    cmd.args(sources);

    debug!(tool = %request.llvm_cov.display(), subcommand, "running llvm-cov");
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {}", request.llvm_cov.display()))?;
    if !status.success() {
        bail!("`llvm-cov {subcommand}` failed with {status}");
    }
    Ok(())
}

/// The shared render-HTML-to-directory step.
fn render_html(request: &ReportRequest, output_dir: &Path, sources: &[PathBuf]) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let mut out_flag = OsString::from("-output-dir=");
    out_flag.push(output_dir);
    llvm_cov(
        request,
        "show",
        &[OsString::from("-format=html"), out_flag],
        sources,
    )
}

/// Two-pass published render: the scoped pass becomes `local.html`, the
/// unscoped pass (rendered into a temporary directory) arrives as
/// `all.html`, and a fresh navigation `index.html` links both under the
/// commit id.
fn publish(request: &ReportRequest, commit_url: &str) -> Result<()> {
    render_html(request, &request.report_dir, &request.sources)?;
    let index = request.report_dir.join("index.html");
    fs::rename(&index, request.report_dir.join("local.html"))
        .with_context(|| format!("failed to rename {}", index.display()))?;

    let staging = tempfile::tempdir().context("failed to create staging directory")?;
    render_html(request, staging.path(), &[])?;
    import_unscoped_pass(staging.path(), &request.report_dir)?;

    let commit_id = commit_short_id(commit_url);
    fs::write(&index, nav_index_html(commit_id))
        .with_context(|| format!("failed to write {}", index.display()))?;
    info!(commit = commit_id, dir = %request.report_dir.display(), "published report");
    Ok(())
}

/// Copy a rendered HTML tree into the report directory, with the top-level
/// `index.html` arriving as `all.html`.
fn import_unscoped_pass(staging: &Path, report_dir: &Path) -> Result<()> {
    for entry in fs::read_dir(staging)
        .with_context(|| format!("failed to read {}", staging.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let destination = if name == "index.html" {
            report_dir.join("all.html")
        } else {
            report_dir.join(&name)
        };
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), &destination)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let destination = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &destination)?;
        } else {
            fs::copy(entry.path(), &destination)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Display form of a commit: the path segment after the last `/` of the
/// commit URL, truncated to a short prefix.
pub fn commit_short_id(commit_url: &str) -> &str {
    let tail = commit_url.rsplit('/').next().unwrap_or(commit_url);
    tail.get(..COMMIT_ID_LEN).unwrap_or(tail)
}

/// Minimal static navigation page linking the scoped and unscoped renders.
fn nav_index_html(commit_id: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><meta charset=\"utf-8\"><title>coverage @ {commit_id}</title></head>\n\
         <body>\n\
         <h1>Coverage report for commit <code>{commit_id}</code></h1>\n\
         <ul>\n\
         <li><a href=\"local.html\">Project sources</a></li>\n\
         <li><a href=\"all.html\">All sources (including dependencies)</a></li>\n\
         </ul>\n\
         </body>\n\
         </html>\n"
    )
}

#[cfg(target_os = "linux")]
const VIEWER: Option<&str> = Some("xdg-open");
#[cfg(target_os = "macos")]
const VIEWER: Option<&str> = Some("open");
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const VIEWER: Option<&str> = None;

fn open_in_viewer(path: &Path) -> Result<()> {
    let Some(viewer) = VIEWER else {
        bail!("don't know how to open {} on this platform", path.display());
    };
    let status = Command::new(viewer)
        .arg(path)
        .status()
        .with_context(|| format!("failed to run {viewer}"))?;
    if !status.success() {
        bail!("`{viewer}` failed with {status}");
    }
    Ok(())
}
