//! End-to-end pipeline scenarios over a temporary output directory.
//!
//! Drives the library API with a counting stand-in for `llvm-profdata`,
//! so the directory lifecycle and staleness behavior are exercised without
//! the real LLVM tools.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use tempfile::TempDir;

use covctl::artifacts::ArtifactDir;
use covctl::clean::{self, CleanArgs};
use covctl::config::{OutputLayout, Settings, ToolOverrides};
use covctl::merge::{self, ProfileMerger};
use covctl::report::{self, Renderer, ReportRequest};

/// Merge stand-in: counts invocations and concatenates its inputs so output
/// bytes are reproducible.
#[derive(Default)]
struct ConcatMerger {
    calls: AtomicUsize,
}

impl ConcatMerger {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProfileMerger for ConcatMerger {
    fn merge(&self, manifest: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let list = fs::read_to_string(manifest)?;
        let mut combined = Vec::new();
        for line in list.lines() {
            combined.extend(fs::read(line)?);
        }
        fs::write(output, combined)?;
        Ok(())
    }
}

fn settings(root: &Path) -> Settings {
    Settings {
        layout: OutputLayout::new(root.join("coverage")),
        prefix: "host1".to_owned(),
        tools: ToolOverrides::default(),
    }
}

fn write_fragment(settings: &Settings, name: &str, contents: &[u8]) {
    let dir = settings.layout.profraw_dir();
    fs::create_dir_all(&dir).expect("create profraw dir");
    fs::write(dir.join(name), contents).expect("write fragment");
}

fn dir_entries(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(path)
        .expect("read dir")
        .filter_map(std::result::Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn two_fragments_fold_into_named_artifact_then_aggregate() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());
    write_fragment(&settings, "host1-100-aaa.profraw", b"AAA");
    write_fragment(&settings, "host1-101-bbb.profraw", b"BBB");

    // The merged-artifact name embeds the fingerprint of the input names.
    let expected_hash = ArtifactDir::fingerprint(&[
        PathBuf::from("host1-100-aaa.profraw"),
        PathBuf::from("host1-101-bbb.profraw"),
    ]);

    let tool = ConcatMerger::default();
    assert!(merge::merge_profraw(&settings, &tool).expect("merge profraw"));
    assert_eq!(tool.calls(), 1);
    assert_eq!(
        dir_entries(&settings.layout.profdata_dir()),
        vec![format!("host1-{expected_hash}.profdata")]
    );
    assert!(dir_entries(&settings.layout.profraw_dir()).is_empty());

    // Second layer: the merged artifact folds into the aggregate and the
    // merged directory is emptied in turn.
    assert!(merge::merge_profdata(&settings, &tool).expect("merge profdata"));
    assert!(settings.layout.aggregate_path().is_file());
    assert_eq!(
        fs::read(settings.layout.aggregate_path()).expect("read aggregate"),
        b"AAABBB"
    );
    assert!(dir_entries(&settings.layout.profdata_dir()).is_empty());
}

#[test]
fn empty_raw_directory_merges_to_nothing() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());

    let tool = ConcatMerger::default();
    assert!(!merge::merge_profraw(&settings, &tool).expect("merge"));
    assert_eq!(tool.calls(), 0);
    assert!(!settings.layout.aggregate_path().exists());
}

#[test]
fn repeated_merge_without_new_fragments_invokes_no_tools() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());
    write_fragment(&settings, "host1-100-aaa.profraw", b"AAA");

    let first = ConcatMerger::default();
    assert!(merge::merge_profdata(&settings, &first).expect("first merge"));
    let aggregate_before = fs::read(settings.layout.aggregate_path()).expect("read");

    let second = ConcatMerger::default();
    assert!(merge::merge_profdata(&settings, &second).expect("second merge"));
    assert_eq!(second.calls(), 0, "idempotent re-merge must skip the tool");
    assert_eq!(
        fs::read(settings.layout.aggregate_path()).expect("read"),
        aggregate_before
    );
}

#[test]
fn artifacts_from_other_jobs_join_the_aggregate() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());
    write_fragment(&settings, "host1-100-aaa.profraw", b"LOCAL");

    // Simulate a merged artifact copied in from another CI job.
    let foreign = settings.layout.profdata_dir();
    fs::create_dir_all(&foreign).expect("mkdir");
    fs::write(foreign.join("host2-deadbeef0000.profdata"), b"REMOTE").expect("write");

    let tool = ConcatMerger::default();
    assert!(merge::merge_profdata(&settings, &tool).expect("merge"));

    let aggregate = fs::read(settings.layout.aggregate_path()).expect("read");
    let body = String::from_utf8_lossy(&aggregate);
    assert!(body.contains("LOCAL"));
    assert!(body.contains("REMOTE"));
}

#[test]
fn report_without_any_coverage_data_fails_clearly() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());

    let tool = ConcatMerger::default();
    let err = report::prepare(&settings, &tool).expect_err("should fail");
    let msg = format!("{err}");
    assert!(
        msg.contains("no coverage data found at"),
        "unexpected message: {msg}"
    );
    assert!(msg.contains("coverage.profdata"), "unexpected message: {msg}");
    assert_eq!(tool.calls(), 0);
}

#[test]
fn report_preparation_runs_the_merge_chain() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());
    write_fragment(&settings, "host1-100-aaa.profraw", b"AAA");

    let tool = ConcatMerger::default();
    report::prepare(&settings, &tool).expect("prepare");
    assert!(settings.layout.aggregate_path().is_file());
}

/// Stand-in for `llvm-cov show -format=html`: writes an index page (echoing
/// its arguments) and a stylesheet into the requested output directory.
#[cfg(unix)]
fn write_renderer_stub(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let script = concat!(
        "#!/bin/sh\n",
        "dir=\"\"\n",
        "for arg in \"$@\"; do\n",
        "  case \"$arg\" in\n",
        "    -output-dir=*) dir=\"${arg#-output-dir=}\" ;;\n",
        "  esac\n",
        "done\n",
        "mkdir -p \"$dir\"\n",
        "printf '<p>rendered: %s</p>' \"$*\" > \"$dir/index.html\"\n",
        "printf 'body{}' > \"$dir/style.css\"\n",
    );
    fs::write(path, script).expect("write stub");
    let mut perms = fs::metadata(path).expect("stat stub").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod stub");
}

#[cfg(unix)]
#[test]
fn published_report_links_both_passes_under_a_commit_index() {
    let tmp = TempDir::new().expect("tempdir");
    let stub = tmp.path().join("fake-llvm-cov");
    write_renderer_stub(&stub);

    let report_dir = tmp.path().join("coverage").join("report");
    let request = ReportRequest {
        llvm_cov: stub,
        demangler: PathBuf::from("rustfilt"),
        aggregate: tmp.path().join("coverage").join("coverage.profdata"),
        objects: vec![PathBuf::from("target/debug/app")],
        sources: vec![PathBuf::from(".")],
        report_dir: report_dir.clone(),
    };
    let renderer = Renderer::PublishedHtml {
        commit_url: "https://github.com/org/repo/commit/abc1234567890def".to_owned(),
    };
    renderer.generate(&request).expect("publish");

    // Both render passes survive, non-empty, under their published names.
    let local = fs::read_to_string(report_dir.join("local.html")).expect("local.html");
    let all = fs::read_to_string(report_dir.join("all.html")).expect("all.html");
    assert!(local.contains("rendered:"), "pass 1 missing: {local}");
    assert!(all.contains("rendered:"), "pass 2 missing: {all}");
    // Pass 1 was scoped to the requested sources, pass 2 was unfiltered.
    assert!(local.contains(" .<"), "pass 1 should carry the source scope: {local}");
    assert!(!all.contains(" .<"), "pass 2 must be unscoped: {all}");

    // The navigation index is written last: it embeds the truncated commit
    // id and links both pages instead of either rendered page's content.
    let index = fs::read_to_string(report_dir.join("index.html")).expect("index.html");
    assert!(index.contains("abc1234567"), "missing commit id: {index}");
    assert!(!index.contains("abc12345678"), "commit id not truncated: {index}");
    assert!(index.contains("href=\"local.html\""));
    assert!(index.contains("href=\"all.html\""));
    assert!(!index.contains("rendered:"), "nav index clobbered by a render pass");

    // Supporting assets from the unscoped pass were copied in.
    assert!(report_dir.join("style.css").is_file());
}

#[test]
fn clean_prof_preserves_rendered_report() {
    let tmp = TempDir::new().expect("tempdir");
    let settings = settings(tmp.path());
    write_fragment(&settings, "host1-100-aaa.profraw", b"AAA");

    let tool = ConcatMerger::default();
    merge::merge_profdata(&settings, &tool).expect("merge");

    // A previously rendered report survives a --prof clean.
    fs::create_dir_all(settings.layout.report_dir()).expect("mkdir");
    fs::write(settings.layout.report_dir().join("index.html"), b"<html>").expect("write");

    let args = CleanArgs {
        report: false,
        prof: true,
    };
    clean::run(&args, &settings).expect("clean");

    assert!(!settings.layout.aggregate_path().exists());
    assert!(!settings.layout.profraw_dir().exists());
    assert!(settings.layout.report_dir().join("index.html").is_file());

    // Full clean removes the whole tree.
    clean::run(&CleanArgs::default(), &settings).expect("full clean");
    assert!(!settings.layout.root().exists());
}
