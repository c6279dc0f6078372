#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Stdio;

use futures::TryStreamExt;
use tempfile::TempDir;

use scmsync_adapters::AdapterFactory;
use scmsync_adapters::Capability;
use scmsync_adapters::ChangeAction;
use scmsync_adapters::Commit;
use scmsync_adapters::ConnectionSettings;
use scmsync_adapters::EntryKind;
use scmsync_adapters::GitAdapter;
use scmsync_adapters::GitFactory;
use scmsync_adapters::ScmAdapter;
use scmsync_adapters::ScmError;

fn check_git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    git_dated(dir, args, "2023-11-14T12:00:00 +0000");
}

fn git_dated(dir: &Path, args: &[&str], date: &str) {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Repository with three commits on main touching README.md and src/lib.rs.
fn setup_git_repo() -> TempDir {
    let repo = TempDir::new().unwrap();
    let dir = repo.path();

    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.email", "jane@example.com"]);
    git(dir, &["config", "user.name", "Jane Doe"]);

    fs::write(dir.join("README.md"), "hello\n").unwrap();
    git(dir, &["add", "README.md"]);
    git_dated(
        dir,
        &["commit", "-m", "Initial commit"],
        "2023-11-14T12:00:00 +0000",
    );

    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(dir.join("src/lib.rs"), "pub fn lib() {}\n").unwrap();
    git(dir, &["add", "src/lib.rs"]);
    git_dated(
        dir,
        &["commit", "-m", "Add library"],
        "2023-11-14T12:01:00 +0000",
    );

    fs::write(dir.join("README.md"), "hello world\n").unwrap();
    git(dir, &["add", "README.md"]);
    git_dated(
        dir,
        &["commit", "-m", "Update readme, refs #42"],
        "2023-11-14T12:02:00 +0000",
    );

    repo
}

fn adapter_for(repo: &TempDir) -> GitAdapter {
    GitAdapter::new(ConnectionSettings::for_url(
        repo.path().to_string_lossy().into_owned(),
    ))
}

async fn collect_revisions(adapter: &GitAdapter, marker: Option<&str>) -> Vec<Commit> {
    adapter
        .revisions_since(marker)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

#[tokio::test]
async fn streams_full_history_oldest_first() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let commits = collect_revisions(&adapter, None).await;

    assert_eq!(commits.len(), 3);
    assert_eq!(commits[0].message, "Initial commit");
    assert_eq!(commits[2].message, "Update readme, refs #42");
    assert_eq!(commits[0].committer, "Jane Doe <jane@example.com>");
    assert!(commits[0].parents.is_empty());
    assert_eq!(commits[1].parents, vec![commits[0].revision.clone()]);
    assert!(commits[0].committed_at < commits[2].committed_at);

    let first_changes = &commits[0].changes;
    assert_eq!(first_changes.len(), 1);
    assert_eq!(first_changes[0].action, ChangeAction::Added);
    assert_eq!(first_changes[0].path, "README.md");

    let last_changes = &commits[2].changes;
    assert_eq!(last_changes[0].action, ChangeAction::Modified);
}

#[tokio::test]
async fn marker_limits_stream_to_newer_commits() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let all = collect_revisions(&adapter, None).await;

    let newer = collect_revisions(&adapter, Some(&all[0].revision)).await;
    let revisions: Vec<String> = newer.iter().map(|c| c.revision.clone()).collect();
    assert_eq!(
        revisions,
        vec![all[1].revision.clone(), all[2].revision.clone()]
    );

    let none_newer = collect_revisions(&adapter, Some(&all[2].revision)).await;
    assert!(none_newer.is_empty());
}

#[tokio::test]
async fn unknown_marker_falls_back_to_full_history() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let commits = collect_revisions(&adapter, Some("0000000000000000000000000000000000000000")).await;
    assert_eq!(commits.len(), 3);
}

#[tokio::test]
async fn empty_repository_streams_nothing() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = TempDir::new().unwrap();
    git(repo.path(), &["init", "-b", "main"]);
    let adapter = adapter_for(&repo);
    let commits = collect_revisions(&adapter, None).await;
    assert!(commits.is_empty());
}

#[tokio::test]
async fn cat_returns_file_content_and_not_found() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);

    let content = adapter.cat("README.md", None).await.unwrap();
    assert_eq!(content, b"hello world\n");

    // Leading slashes are tolerated.
    let content = adapter.cat("/src/lib.rs", None).await.unwrap();
    assert_eq!(content, b"pub fn lib() {}\n");

    let err = adapter.cat("missing.txt", None).await.unwrap_err();
    assert!(matches!(err, ScmError::NotFound { .. }));
}

#[tokio::test]
async fn cat_respects_revision() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let all = collect_revisions(&adapter, None).await;

    let content = adapter
        .cat("README.md", Some(&all[0].revision))
        .await
        .unwrap();
    assert_eq!(content, b"hello\n");
}

#[tokio::test]
async fn entries_lists_directories_and_files() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);

    let root = adapter.entries("", None).await.unwrap();
    let readme = root.iter().find(|e| e.name == "README.md").unwrap();
    assert_eq!(readme.kind, EntryKind::File);
    assert_eq!(readme.size, Some(12));
    let src = root.iter().find(|e| e.name == "src").unwrap();
    assert_eq!(src.kind, EntryKind::Dir);

    let src_entries = adapter.entries("src", None).await.unwrap();
    assert_eq!(src_entries.len(), 1);
    assert_eq!(src_entries[0].name, "lib.rs");
    assert_eq!(src_entries[0].path, "src/lib.rs");
}

#[tokio::test]
async fn branches_and_tags_are_listed() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    git(repo.path(), &["branch", "feature"]);
    git(repo.path(), &["tag", "v0.1.0"]);

    let adapter = adapter_for(&repo);
    let branches = adapter.branches().await.unwrap();
    assert!(branches.contains(&"main".to_string()));
    assert!(branches.contains(&"feature".to_string()));

    let tags = adapter.tags().await.unwrap();
    assert_eq!(tags, vec!["v0.1.0"]);
}

#[tokio::test]
async fn all_branches_feed_the_revision_stream() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    git(repo.path(), &["checkout", "-b", "feature"]);
    fs::write(repo.path().join("feature.txt"), "on a branch\n").unwrap();
    git(repo.path(), &["add", "feature.txt"]);
    git_dated(
        repo.path(),
        &["commit", "-m", "Branch work"],
        "2023-11-14T12:03:00 +0000",
    );
    git(repo.path(), &["checkout", "main"]);

    let adapter = adapter_for(&repo);
    let commits = collect_revisions(&adapter, None).await;
    assert_eq!(commits.len(), 4);
    assert!(commits.iter().any(|c| c.message == "Branch work"));
}

#[tokio::test]
async fn diff_of_single_commit_shows_patch() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let all = collect_revisions(&adapter, None).await;

    let patch = adapter.diff(None, &all[2].revision, None).await.unwrap();
    assert!(patch.contains("README.md"));
    assert!(patch.contains("+hello world"));

    let ranged = adapter
        .diff(Some("README.md"), &all[0].revision, Some(&all[2].revision))
        .await
        .unwrap();
    assert!(ranged.contains("+hello world"));
}

#[tokio::test]
async fn root_url_resolves_to_the_worktree() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let repo = setup_git_repo();
    let adapter = adapter_for(&repo);
    let root = adapter.root_url().await.unwrap().unwrap();
    assert_eq!(
        Path::new(&root).canonicalize().unwrap(),
        repo.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn missing_repository_reports_unavailable() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let adapter = GitAdapter::new(ConnectionSettings::for_url("/nonexistent/repo/path"));
    let err = adapter.branches().await.unwrap_err();
    assert!(err.is_unavailable(), "unexpected error: {err}");
}

#[test]
fn git_factory_probes_the_client() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let factory = GitFactory;
    assert!(factory.client_available());
    let version = factory.client_version().unwrap();
    assert!(!version.is_empty());
    assert!(!version.starts_with("git version"));
}

#[test]
fn git_adapter_claims_full_capabilities() {
    let adapter = GitAdapter::new(ConnectionSettings::for_url("/tmp/unused"));
    assert!(adapter.supports(Capability::Cat));
    assert!(adapter.supports(Capability::RevisionGraph));
}
