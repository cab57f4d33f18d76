use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn base_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("gitsynq"));
    cmd.current_dir(dir.path());
    cmd.env_remove("GITSYNQ_CONFIG");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn git_available() -> bool {
    which::which("git").is_ok()
}

#[test]
fn help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("push"))
        .stdout(contains("pull"))
        .stdout(contains("hooks"))
        .stdout(contains("--config"));
}

#[test]
fn push_help_shows_full_flag() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["push", "--help"])
        .assert()
        .success()
        .stdout(contains("--full"))
        .stdout(contains("--json"));
}

#[test]
fn unknown_flag_is_usage_error() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["push", "--bogus"])
        .assert()
        .code(2);
}

#[test]
fn push_without_config_exits_2() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["--color", "never", "push"])
        .assert()
        .code(2)
        .stderr(contains("gitsynq init"))
        .stderr(predicate::str::contains("\u{1b}").not());
}

#[test]
fn push_json_without_config_reports_error_object() {
    let dir = TempDir::new().unwrap();
    let output = base_cmd(&dir)
        .args(["push", "--json"])
        .assert()
        .code(2)
        .get_output()
        .stdout
        .clone();
    let value: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["stage"], "config");
}

#[test]
fn config_flag_overrides_default_location() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["--config", "elsewhere/sync.toml", "status"])
        .assert()
        .code(2)
        .stderr(contains("elsewhere/sync.toml"));
}

#[test]
fn init_writes_config_and_refuses_overwrite() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["init", "--host", "build.local", "-u", "deploy", "-n", "svc", "-b", "main"])
        .assert()
        .success();

    let written = std::fs::read_to_string(dir.path().join(".gitsynq.toml")).unwrap();
    assert!(written.contains("host = \"build.local\""));
    assert!(written.contains("name = \"svc\""));
    assert!(dir.path().join(".gitsynq-hooks").is_dir());

    base_cmd(&dir)
        .args(["init", "--host", "other", "-u", "deploy", "-n", "svc", "-b", "main"])
        .assert()
        .code(2)
        .stderr(contains("--force"));

    base_cmd(&dir)
        .args(["init", "--host", "other", "-u", "deploy", "-n", "svc", "-b", "main", "--force"])
        .assert()
        .success();
    let written = std::fs::read_to_string(dir.path().join(".gitsynq.toml")).unwrap();
    assert!(written.contains("host = \"other\""));
}

#[test]
fn hooks_lists_every_hook() {
    let dir = TempDir::new().unwrap();
    base_cmd(&dir)
        .args(["--color", "never", "hooks"])
        .assert()
        .success()
        .stdout(contains("pre-push"))
        .stdout(contains("post-pull"))
        .stdout(contains("not set"));
    assert!(dir.path().join(".gitsynq-hooks").is_dir());
}

#[test]
fn status_shows_config_and_commits() {
    if !git_available() {
        eprintln!("skipping: git not found");
        return;
    }
    let dir = TempDir::new().unwrap();
    let git = |args: &[&str]| {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=t", "-c", "user.email=t@gitsynq.invalid"])
            .args(args)
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
    };
    git(&["init", "-q", "-b", "main"]);
    std::fs::write(dir.path().join("f.txt"), "x").unwrap();
    git(&["add", "f.txt"]);
    git(&["commit", "-q", "-m", "status smoke commit"]);

    base_cmd(&dir)
        .args(["init", "--host", "build.local", "-u", "deploy"])
        .assert()
        .success();
    base_cmd(&dir)
        .args(["--color", "never", "status"])
        .assert()
        .success()
        .stdout(contains("deploy@build.local:22"))
        .stdout(contains("status smoke commit"));
}
