// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::FakeWorktreeManager;
use kandev_core::launch::{metadata_keys, LaunchRequest, WorktreeOptions};
use kandev_core::id::WorktreeId;

fn preparer_with(manager: Arc<FakeWorktreeManager>) -> WorkspacePreparer {
    WorkspacePreparer::new(Some(manager as Arc<dyn crate::external::WorktreeManager>))
}

#[tokio::test]
async fn direct_workspace_path_is_used_as_is() {
    let preparer = WorkspacePreparer::new(None);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .workspace_path("/work/ws");
    let prepared = preparer.prepare(&request).await.unwrap();
    assert_eq!(prepared.path, PathBuf::from("/work/ws"));
    assert_eq!(
        prepared.metadata.get(metadata_keys::TASK_DESCRIPTION).map(String::as_str),
        Some("fix build")
    );
}

#[tokio::test]
async fn repository_path_is_the_fallback_workspace() {
    let preparer = WorkspacePreparer::new(None);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .repository_path("/repos/app");
    let prepared = preparer.prepare(&request).await.unwrap();
    assert_eq!(prepared.path, PathBuf::from("/repos/app"));
    assert_eq!(
        prepared.metadata.get(metadata_keys::REPOSITORY_PATH).map(String::as_str),
        Some("/repos/app")
    );
}

#[tokio::test]
async fn missing_paths_fail() {
    let preparer = WorkspacePreparer::new(None);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build");
    let err = preparer.prepare(&request).await.unwrap_err();
    assert!(matches!(err, LifecycleError::WorkspaceFailed(_)));
}

#[tokio::test]
async fn worktree_launch_records_metadata() {
    let manager = FakeWorktreeManager::new();
    let preparer = preparer_with(manager.clone());
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .repository_path("/repos/app")
        .worktree(WorktreeOptions {
            use_worktree: true,
            base_branch: Some("main".into()),
            branch_prefix: Some("agent/".into()),
            ..WorktreeOptions::default()
        });

    let prepared = preparer.prepare(&request).await.unwrap();

    assert!(prepared.path.starts_with("/repos/app/.worktrees"));
    let md = &prepared.metadata;
    assert!(md.get(metadata_keys::WORKTREE_ID).is_some());
    assert_eq!(
        md.get(metadata_keys::WORKTREE_BRANCH).map(String::as_str),
        Some("agent/s-1")
    );
    assert_eq!(
        md.get(metadata_keys::MAIN_REPO_GIT_DIR).map(String::as_str),
        Some("/repos/app/.git")
    );
    assert_eq!(md.get(metadata_keys::BASE_BRANCH).map(String::as_str), Some("main"));

    let requests = manager.requests();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].pull_first);
}

#[tokio::test]
async fn supplied_worktree_id_is_reused() {
    let manager = FakeWorktreeManager::new();
    let preparer = preparer_with(manager.clone());
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .repository_path("/repos/app")
        .worktree(WorktreeOptions {
            use_worktree: true,
            worktree_id: Some(WorktreeId::new("wt-existing")),
            ..WorktreeOptions::default()
        });

    let prepared = preparer.prepare(&request).await.unwrap();
    assert_eq!(
        prepared.metadata.get(metadata_keys::WORKTREE_ID).map(String::as_str),
        Some("wt-existing")
    );
}

#[tokio::test]
async fn worktree_without_repository_fails() {
    let preparer = preparer_with(FakeWorktreeManager::new());
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build").worktree(
        WorktreeOptions { use_worktree: true, ..WorktreeOptions::default() },
    );
    let err = preparer.prepare(&request).await.unwrap_err();
    assert!(matches!(err, LifecycleError::WorkspaceFailed(_)));
}

#[tokio::test]
async fn worktree_manager_failure_propagates() {
    let manager = FakeWorktreeManager::new();
    manager.fail_with("disk full");
    let preparer = preparer_with(manager);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .repository_path("/repos/app")
        .worktree(WorktreeOptions { use_worktree: true, ..WorktreeOptions::default() });

    let err = preparer.prepare(&request).await.unwrap_err();
    assert!(matches!(err, LifecycleError::WorkspaceFailed(m) if m.contains("disk full")));
}

#[tokio::test]
async fn setup_script_runs_in_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    let preparer = WorkspacePreparer::new(None);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .workspace_path(dir.path())
        .setup_script("echo ran > setup-marker");

    preparer.prepare(&request).await.unwrap();
    assert!(dir.path().join("setup-marker").exists());
}

#[tokio::test]
async fn failing_setup_script_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let preparer = WorkspacePreparer::new(None);
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build")
        .workspace_path(dir.path())
        .setup_script("echo doomed >&2; exit 3");

    let err = preparer.prepare(&request).await.unwrap_err();
    assert!(matches!(err, LifecycleError::WorkspaceFailed(m) if m.contains("doomed")));
}
