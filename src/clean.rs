//! Remove generated coverage artifacts.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::config::Settings;

/// Remove generated artifacts
///
/// With no flags the entire top-level output directory is removed. With
/// flags, removal is selective: --report drops only the rendered report,
/// --prof drops the profiling layers (fragments, merged artifacts, and the
/// final aggregate) while leaving any rendered report intact.
#[derive(Args, Debug, Default)]
pub struct CleanArgs {
    /// Remove only the rendered report directory
    #[arg(long)]
    pub report: bool,

    /// Remove only raw/merged profiling data and the final aggregate
    #[arg(long)]
    pub prof: bool,
}

/// `covctl clean` entry point.
pub fn run(args: &CleanArgs, settings: &Settings) -> Result<()> {
    let layout = &settings.layout;

    if !args.report && !args.prof {
        remove_tree(layout.root())?;
        info!(dir = %layout.root().display(), "removed output directory");
        return Ok(());
    }

    if args.report {
        remove_tree(&layout.report_dir())?;
    }
    if args.prof {
        remove_tree(&layout.profraw_dir())?;
        remove_tree(&layout.profdata_dir())?;
        remove_file(&layout.aggregate_path())?;
    }
    Ok(())
}

/// Remove a directory tree; an already-absent path is not an error.
fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;

    use tempfile::TempDir;

    use crate::config::{OutputLayout, ToolOverrides};

    fn populated_settings(tmp: &TempDir) -> Settings {
        let settings = Settings {
            layout: OutputLayout::new(tmp.path().join("coverage")),
            prefix: "host".to_owned(),
            tools: ToolOverrides::default(),
        };
        let layout = &settings.layout;
        fs::create_dir_all(layout.profraw_dir()).expect("mkdir");
        fs::create_dir_all(layout.profdata_dir()).expect("mkdir");
        fs::create_dir_all(layout.report_dir()).expect("mkdir");
        fs::write(layout.profraw_dir().join("a.profraw"), b"a").expect("write");
        fs::write(layout.aggregate_path(), b"agg").expect("write");
        fs::write(layout.report_dir().join("index.html"), b"<html>").expect("write");
        settings
    }

    #[test]
    fn no_filters_removes_everything() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = populated_settings(&tmp);

        run(&CleanArgs::default(), &settings).expect("clean");
        assert!(!settings.layout.root().exists());
    }

    #[test]
    fn prof_filter_keeps_the_report() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = populated_settings(&tmp);

        let args = CleanArgs {
            report: false,
            prof: true,
        };
        run(&args, &settings).expect("clean");

        assert!(!settings.layout.profraw_dir().exists());
        assert!(!settings.layout.profdata_dir().exists());
        assert!(!settings.layout.aggregate_path().exists());
        assert!(settings.layout.report_dir().join("index.html").is_file());
    }

    #[test]
    fn report_filter_keeps_profiling_data() {
        let tmp = TempDir::new().expect("tempdir");
        let settings = populated_settings(&tmp);

        let args = CleanArgs {
            report: true,
            prof: false,
        };
        run(&args, &settings).expect("clean");

        assert!(!settings.layout.report_dir().exists());
        assert!(settings.layout.aggregate_path().is_file());
        assert!(settings.layout.profraw_dir().join("a.profraw").is_file());
    }

    #[test]
    fn cleaning_an_absent_tree_is_a_no_op() {
        let settings = Settings {
            layout: OutputLayout::new(PathBuf::from("/nonexistent/covctl-test")),
            prefix: "host".to_owned(),
            tools: ToolOverrides::default(),
        };
        let args = CleanArgs {
            report: true,
            prof: true,
        };
        run(&args, &settings).expect("clean absent");
    }
}
