// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace preparation: direct paths, managed worktrees, and the
//! optional setup script.

use crate::external::{WorktreeManager, WorktreeRequest};
use crate::LifecycleError;
use indexmap::IndexMap;
use kandev_core::launch::{metadata_keys, LaunchRequest};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved workspace plus the metadata the preparation produced.
#[derive(Debug, Clone)]
pub struct PreparedWorkspace {
    pub path: PathBuf,
    pub metadata: IndexMap<String, String>,
}

pub struct WorkspacePreparer {
    worktrees: Option<Arc<dyn WorktreeManager>>,
}

impl WorkspacePreparer {
    pub fn new(worktrees: Option<Arc<dyn WorktreeManager>>) -> Self {
        Self { worktrees }
    }

    /// Resolve the workspace for a launch.
    ///
    /// Worktree launches drive the external manager (reusing an existing
    /// worktree when an id is supplied) and record worktree metadata,
    /// including the main repository's git dir so container backends can
    /// mount it. Plain launches use the supplied workspace or repository
    /// path directly.
    pub async fn prepare(&self, request: &LaunchRequest) -> Result<PreparedWorkspace, LifecycleError> {
        let mut metadata = IndexMap::new();
        if !request.task_description.is_empty() {
            metadata.insert(
                metadata_keys::TASK_DESCRIPTION.to_string(),
                request.task_description.clone(),
            );
        }
        metadata.insert(
            metadata_keys::SESSION_ID.to_string(),
            request.session_id.to_string(),
        );

        let path = if request.worktree.use_worktree {
            let repository_path = request.repository_path.clone().ok_or_else(|| {
                LifecycleError::WorkspaceFailed(
                    "worktree launch requires a repository path".into(),
                )
            })?;
            let manager = self.worktrees.as_ref().ok_or_else(|| {
                LifecycleError::WorkspaceFailed("no worktree manager configured".into())
            })?;

            let worktree = manager
                .create(WorktreeRequest {
                    worktree_id: request.worktree.worktree_id.clone(),
                    repository_id: request.worktree.repository_id.clone(),
                    repository_path: repository_path.clone(),
                    base_branch: request.worktree.base_branch.clone(),
                    branch_prefix: request.worktree.branch_prefix.clone(),
                    pull_first: request.worktree.pull_before_worktree,
                    session_id: request.session_id.clone(),
                })
                .await
                .map_err(|e| LifecycleError::WorkspaceFailed(e.to_string()))?;

            metadata.insert(metadata_keys::WORKTREE_ID.to_string(), worktree.id.to_string());
            metadata.insert(
                metadata_keys::WORKTREE_PATH.to_string(),
                worktree.path.display().to_string(),
            );
            metadata.insert(metadata_keys::WORKTREE_BRANCH.to_string(), worktree.branch.clone());
            metadata.insert(
                metadata_keys::MAIN_REPO_GIT_DIR.to_string(),
                repository_path.join(".git").display().to_string(),
            );
            metadata.insert(
                metadata_keys::REPOSITORY_PATH.to_string(),
                repository_path.display().to_string(),
            );
            if let Some(base_branch) = &request.worktree.base_branch {
                metadata.insert(metadata_keys::BASE_BRANCH.to_string(), base_branch.clone());
            }
            worktree.path
        } else if let Some(path) = &request.workspace_path {
            path.clone()
        } else if let Some(repository_path) = &request.repository_path {
            metadata.insert(
                metadata_keys::REPOSITORY_PATH.to_string(),
                repository_path.display().to_string(),
            );
            repository_path.clone()
        } else {
            return Err(LifecycleError::WorkspaceFailed(
                "launch requires a workspace or repository path".into(),
            ));
        };

        if let Some(script) = &request.setup_script {
            metadata.insert(metadata_keys::SETUP_SCRIPT.to_string(), script.clone());
            self.run_setup_script(&path, script, &request.env).await?;
        }

        Ok(PreparedWorkspace { path, metadata })
    }

    /// Run the setup script through `sh -c` in the workspace.
    async fn run_setup_script(
        &self,
        workspace: &Path,
        script: &str,
        env: &IndexMap<String, String>,
    ) -> Result<(), LifecycleError> {
        tracing::info!(workspace = %workspace.display(), "running setup script");
        let output = tokio::process::Command::new("sh")
            .args(["-c", script])
            .current_dir(workspace)
            .envs(env.iter())
            .output()
            .await
            .map_err(|e| LifecycleError::WorkspaceFailed(format!("setup script spawn: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join("; ");
            return Err(LifecycleError::WorkspaceFailed(format!(
                "setup script exited with {:?}: {}",
                output.status.code(),
                tail
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
