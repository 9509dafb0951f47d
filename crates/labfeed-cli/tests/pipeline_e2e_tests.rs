//! End-to-end tests for the labfeed binary
//!
//! These tests validate the full operator workflow including:
//! - Directory layout creation
//! - Automated intake (archive and quarantine routing)
//! - Chunked uploads suspended and resumed across processes
//! - Status reporting

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Build a labfeed command isolated from the ambient environment.
fn labfeed(data_root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("labfeed").unwrap();
    for var in [
        "LABFEED_DATA_ROOT",
        "LABFEED_STATE_DIR",
        "LABFEED_STORE_PATH",
        "LABFEED_SINK_URL",
        "LABFEED_SINK_TIMEOUT",
        "LABFEED_TIME_BUDGET",
        "LABFEED_ROW_BUDGET",
        "LABFEED_FIXED_COLUMNS",
        "LOG_LEVEL",
        "LOG_OUTPUT",
    ] {
        cmd.env_remove(var);
    }
    cmd.arg("--data-root").arg(data_root);
    cmd
}

fn init_layout(data_root: &Path) {
    labfeed(data_root).arg("init").assert().success();
}

#[test]
fn test_init_creates_stage_directories() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");

    labfeed(&root)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("incoming"));

    for stage in ["incoming", "processing", "archive", "failed"] {
        assert!(root.join(stage).is_dir(), "missing stage {stage}");
    }
    assert!(root.join("state").is_dir());
}

#[test]
fn test_run_archives_clean_file() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    fs::write(
        root.join("incoming/results.csv"),
        "pack_reference,variable,value,sample_point\nPK1,pH Lab,7.2,\nPK1,Conductivity,150,Main\n",
    )
    .unwrap();

    labfeed(&root)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("archived"))
        .stdout(predicate::str::contains("1 committed"));

    assert!(root.join("archive/results.csv").exists());
    assert!(!root.join("incoming/results.csv").exists());
    assert!(root.join("reports.jsonl").exists());
}

#[test]
fn test_run_quarantines_file_without_anchor_column() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    fs::write(
        root.join("incoming/results.csv"),
        "site,variable,value\nS1,pH Lab,7.2\n",
    )
    .unwrap();

    labfeed(&root)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("quarantined"));

    assert!(root.join("failed/results.csv").exists());
    assert!(root.join("failed/results.csv.notices.txt").exists());
}

#[test]
fn test_run_retries_file_stranded_in_processing() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    // A file left behind by an earlier pass that ran out of budget.
    fs::write(
        root.join("processing/stalled.csv"),
        "pack_reference,variable,value\nPK1,pH Lab,7.2\n",
    )
    .unwrap();

    labfeed(&root)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("stalled.csv"))
        .stdout(predicate::str::contains("archived"));

    assert!(root.join("archive/stalled.csv").exists());
    assert!(!root.join("processing/stalled.csv").exists());
}

#[test]
fn test_run_with_empty_incoming() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    labfeed(&root)
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("No files waiting"));
}

#[test]
fn test_upload_suspends_and_resumes_across_processes() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    let source = dir.path().join("upload.csv");
    fs::write(
        &source,
        "pack_reference,variable,value\nPK1,pH Lab,7.2\nPK2,pH Lab,6.9\nPK3,pH Lab,7.0\n",
    )
    .unwrap();

    // First invocation: one chunk of two rows, then suspend.
    let output = labfeed(&root)
        .env("LABFEED_ROW_BUDGET", "2")
        .arg("upload")
        .arg(&source)
        .arg("--chunks")
        .arg("1")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    assert!(stdout.contains("chunk 1: 2 row(s)"), "stdout: {stdout}");
    assert!(stdout.contains("Resume with"), "stdout: {stdout}");

    let job_id = stdout
        .lines()
        .find(|line| line.contains("registered as job"))
        .and_then(|line| line.split_whitespace().last())
        .expect("job id in output")
        .to_string();

    // The suspended job is visible in status.
    labfeed(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Suspended upload jobs"))
        .stdout(predicate::str::contains("upload.csv"));

    // Second invocation: resume from the persisted cursor and finish.
    labfeed(&root)
        .env("LABFEED_ROW_BUDGET", "2")
        .arg("upload")
        .arg("--resume")
        .arg(&job_id)
        .assert()
        .success()
        .stdout(predicate::str::contains("archived"))
        .stdout(predicate::str::contains("3 rows"))
        .stdout(predicate::str::contains("3 committed"));

    assert!(root.join("archive/upload.csv").exists());
    // The original upload is left untouched.
    assert!(source.exists());
}

#[test]
fn test_upload_without_anchor_reports_fatal() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    let source = dir.path().join("upload.csv");
    fs::write(&source, "site,variable,value\nS1,pH Lab,7.2\n").unwrap();

    labfeed(&root)
        .arg("upload")
        .arg(&source)
        .assert()
        .success()
        .stdout(predicate::str::contains("fatal"))
        .stdout(predicate::str::contains("pack_reference"));

    assert!(root.join("failed/upload.csv").exists());
}

#[test]
fn test_status_counts_stage_files_and_stored_reports() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    fs::write(
        root.join("incoming/results.csv"),
        "pack_reference,variable,value\nPK1,pH Lab,7.2\n",
    )
    .unwrap();
    labfeed(&root).arg("run").assert().success();

    labfeed(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No suspended upload jobs"))
        .stdout(predicate::str::contains("Stored reports: 1"));
}

#[test]
fn test_status_does_not_count_notices_sidecars() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("feed");
    init_layout(&root);

    // Quarantine a file so failed holds the feed file plus its sidecar.
    fs::write(
        root.join("incoming/results.csv"),
        "site,variable,value\nS1,pH Lab,7.2\n",
    )
    .unwrap();
    labfeed(&root).arg("run").assert().success();
    assert!(root.join("failed/results.csv.notices.txt").exists());

    labfeed(&root)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 file(s)"))
        .stdout(predicate::str::contains("2 file(s)").not());
}
