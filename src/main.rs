use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use covctl::config::Settings;
use covctl::merge::MergeKind;
use covctl::run::ExitCodeError;
use covctl::{clean, merge, report, run, telemetry};

/// Coverage pipeline for instrumented test suites
///
/// covctl manages the lifecycle of LLVM coverage artifacts across many
/// parallel CI jobs: instrumented processes write raw fragments, covctl
/// folds them into per-job merged artifacts and then into one final
/// aggregate, and renders that aggregate in several formats.
///
/// TYPICAL FLOW:
///
///   covctl run -- cargo test        # fragments land in coverage/profraw/
///   covctl merge                    # fold everything into the aggregate
///   covctl report --format html     # render coverage/report/
///
/// Fragments from other CI jobs can be copied into coverage/profdata/
/// before merging; the fold picks them up like any other pending artifact.
#[derive(Parser)]
#[command(name = "covctl")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'covctl <command> --help' for more information on a specific command.")]
struct Cli {
    /// Top-level output directory for coverage artifacts
    #[arg(long, global = true, value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Namespace for fragment file names (defaults to the host name)
    #[arg(long, global = true, value_name = "STRING")]
    profraw_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command with coverage instrumentation enabled
    Run(run::RunArgs),

    /// Fold pending fragments and merged artifacts
    ///
    /// profraw folds raw fragments into one per-job merged artifact;
    /// profdata (the default) additionally folds every pending merged
    /// artifact into the final aggregate. Inputs are consumed: after a
    /// fold the source directory is empty.
    Merge {
        /// Which layer to fold up to
        #[arg(long, value_enum, default_value_t = MergeKind::Profdata)]
        kind: MergeKind,
    },

    /// Generate a coverage report from the final aggregate
    Report(report::ReportArgs),

    /// Remove generated artifacts
    Clean(clean::CleanArgs),
}

fn dispatch(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.dir, cli.profraw_prefix)?;
    match cli.command {
        Commands::Run(args) => run::run(&args, &settings),
        Commands::Merge { kind } => merge::run(kind, &settings),
        Commands::Report(args) => report::run(&args, &settings),
        Commands::Clean(args) => clean::run(&args, &settings),
    }
}

fn main() {
    telemetry::init();
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli) {
        // `run` passes its child's exit code through untouched.
        if let Some(exit) = err.downcast_ref::<ExitCodeError>() {
            std::process::exit(exit.0);
        }
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
