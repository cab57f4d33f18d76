mod util;

use gitsynq::bundle::{BundleError, BundleMode, Bundler, MergeOutcome};
use tempfile::TempDir;

use util::{commit, git, git_available, head, init_repo, mark_tracking};

macro_rules! require_git {
    () => {
        if !git_available() {
            eprintln!("skipping: git not found");
            return;
        }
    };
}

#[test]
fn incremental_without_tracking_ref_writes_nothing() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    commit(&repo, "a.txt", "a", "first");

    let dest = tmp.path().join("out").join("p.bundle");
    let err = Bundler::new(&repo, "origin")
        .create_incremental(&dest, "p", "main")
        .unwrap_err();
    assert!(matches!(err, BundleError::NoTrackingReference { .. }), "got {err:?}");
    assert!(!dest.exists());
}

#[test]
fn incremental_with_no_new_commits_is_empty() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    commit(&repo, "a.txt", "a", "first");
    mark_tracking(&repo, "main");

    let dest = tmp.path().join("p.bundle");
    let err = Bundler::new(&repo, "origin")
        .create_incremental(&dest, "p", "main")
        .unwrap_err();
    assert!(matches!(err, BundleError::Empty { .. }), "got {err:?}");
    assert!(!dest.exists());
}

#[test]
fn incremental_carries_only_new_commits() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    let base = commit(&repo, "a.txt", "a", "first");
    mark_tracking(&repo, "main");
    commit(&repo, "b.txt", "b", "second");

    let dest = tmp.path().join("p.bundle");
    let artifact = Bundler::new(&repo, "origin")
        .create_incremental(&dest, "p", "main")
        .unwrap();
    assert_eq!(artifact.mode, BundleMode::Incremental);
    assert_eq!(artifact.size, std::fs::metadata(&dest).unwrap().len());

    let heads = git(&repo, &["bundle", "list-heads", dest.to_str().unwrap()]);
    assert!(heads.contains("refs/heads/main"));

    // The base commit is a prerequisite, so a repository without it cannot apply the bundle.
    let empty = tmp.path().join("empty");
    init_repo(&empty);
    let err = Bundler::new(&empty, "origin").verify(&dest).unwrap_err();
    assert!(matches!(err, BundleError::Invalid { .. }), "got {err:?}");
    Bundler::new(&repo, "origin").verify(&dest).unwrap();
    assert_ne!(head(&repo), base);
}

#[test]
fn full_bundle_verifies_anywhere() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    commit(&repo, "a.txt", "a", "first");

    let dest = tmp.path().join("full.bundle");
    let artifact = Bundler::new(&repo, "origin")
        .create_full(&dest, "p", "main")
        .unwrap();
    assert_eq!(artifact.mode, BundleMode::Full);
    assert_eq!(artifact.file_name(), "full.bundle");

    let other = tmp.path().join("other");
    init_repo(&other);
    Bundler::new(&other, "origin").verify(&dest).unwrap();
}

#[test]
fn merge_fast_forwards_and_removes_temp_remote() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("source");
    init_repo(&source);
    commit(&source, "a.txt", "a", "first");

    let target = tmp.path().join("target");
    git(tmp.path(), &["clone", "-q", source.to_str().unwrap(), target.to_str().unwrap()]);
    let new_head = commit(&source, "b.txt", "b", "second");

    let dest = tmp.path().join("s.bundle");
    Bundler::new(&source, "origin")
        .create_full(&dest, "s", "main")
        .unwrap();

    let outcome = Bundler::new(&target, "origin").merge(&dest, "main").unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            target: "main".into()
        }
    );
    assert_eq!(head(&target), new_head);
    assert_eq!(git(&target, &["remote"]), "origin");
}

#[test]
fn merge_falls_back_to_legacy_branch() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    git(&source, &["init", "-q", "-b", "master"]);
    let legacy_head = commit(&source, "a.txt", "a", "first");

    let target = tmp.path().join("target");
    init_repo(&target);

    let dest = tmp.path().join("s.bundle");
    Bundler::new(&source, "origin")
        .create_full(&dest, "s", "master")
        .unwrap();

    let outcome = Bundler::new(&target, "origin").merge(&dest, "main").unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            target: "master".into()
        }
    );
    assert_eq!(head(&target), legacy_head);
}

#[test]
fn merge_without_candidates_is_noop() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("source");
    std::fs::create_dir_all(&source).unwrap();
    git(&source, &["init", "-q", "-b", "feature"]);
    commit(&source, "a.txt", "a", "first");

    let target = tmp.path().join("target");
    init_repo(&target);
    let before = commit(&target, "t.txt", "t", "target");

    let dest = tmp.path().join("s.bundle");
    Bundler::new(&source, "origin")
        .create_full(&dest, "s", "feature")
        .unwrap();

    let outcome = Bundler::new(&target, "origin").merge(&dest, "main").unwrap();
    assert_eq!(outcome, MergeOutcome::NothingToMerge);
    assert_eq!(head(&target), before);
    assert_eq!(git(&target, &["remote"]), "");
}

#[test]
fn verify_rejects_garbage() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    let junk = tmp.path().join("junk.bundle");
    std::fs::write(&junk, "not a bundle").unwrap();

    let err = Bundler::new(&repo, "origin").verify(&junk).unwrap_err();
    assert!(matches!(err, BundleError::Invalid { .. }));
    assert!(err.diagnostics().is_some_and(|d| !d.is_empty()));
}

#[test]
fn repository_queries() {
    require_git!();
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    let bundler = Bundler::new(&repo, "origin");

    assert!(bundler.is_repository().unwrap());
    assert_eq!(bundler.current_branch().unwrap().as_deref(), Some("main"));
    assert!(bundler.recent_commits(5).unwrap().is_empty());

    commit(&repo, "a.txt", "a", "first change");
    commit(&repo, "b.txt", "b", "second change");
    let log = bundler.recent_commits(1).unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("second change"));

    let plain = tmp.path().join("plain");
    std::fs::create_dir_all(&plain).unwrap();
    assert!(!Bundler::new(&plain, "origin").is_repository().unwrap());
}
