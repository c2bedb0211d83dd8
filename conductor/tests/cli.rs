//! CLI tests: spawn the conductor binary and check exit codes.

use std::process::Command;

use conductor::exit_codes;
use conductor::test_support::TestRepo;

fn conductor(repo: &TestRepo) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conductor"));
    cmd.arg("--root").arg(repo.root());
    cmd
}

#[test]
fn unplanned_phase_exits_with_needs_planning_code() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(".planning/phases/04-billing/CONTEXT.md", "notes\n")
        .expect("context");
    repo.commit_all("phase 4 context").expect("commit");

    let status = conductor(&repo).arg("4").status().expect("conductor");

    assert_eq!(status.code(), Some(exit_codes::NEEDS_PLANNING));
}

#[test]
fn unknown_phase_fails() {
    let repo = TestRepo::new().expect("repo");

    let status = conductor(&repo).arg("9").status().expect("conductor");

    assert_eq!(status.code(), Some(exit_codes::FAILURE));
}

#[test]
fn dry_run_prints_plan_and_exits_ok() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(
        ".planning/phases/01-setup/01-01-PLAN.md",
        "<objective>Scaffold the workspace</objective>\n",
    )
    .expect("plan");
    repo.commit_all("plan").expect("commit");

    let output = conductor(&repo)
        .args(["1", "--dry-run", "--branch-strategy", "chain"])
        .output()
        .expect("conductor");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("strategy chain"), "{stdout}");
    assert!(stdout.contains("plan/01-01-scaffold-the-workspace"), "{stdout}");
}

#[test]
fn init_config_writes_defaults_once() {
    let repo = TestRepo::new().expect("repo");

    let first = conductor(&repo).arg("--init-config").status().expect("conductor");
    assert_eq!(first.code(), Some(exit_codes::OK));
    assert!(repo.root().join(".planning/conductor.toml").exists());

    let second = conductor(&repo).arg("--init-config").status().expect("conductor");
    assert_eq!(second.code(), Some(exit_codes::FAILURE));
}
