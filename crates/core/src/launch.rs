// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch request and executor selection types.

use crate::id::{ProfileId, SessionId, TaskId, WorktreeId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Recognized keys in [`LaunchRequest::metadata`].
pub mod metadata_keys {
    pub const TASK_DESCRIPTION: &str = "task_description";
    pub const SESSION_ID: &str = "session_id";
    pub const WORKTREE_ID: &str = "worktree_id";
    pub const WORKTREE_PATH: &str = "worktree_path";
    pub const WORKTREE_BRANCH: &str = "worktree_branch";
    pub const MAIN_REPO_GIT_DIR: &str = "main_repo_git_dir";
    pub const REPOSITORY_PATH: &str = "repository_path";
    pub const SETUP_SCRIPT: &str = "setup_script";
    pub const BASE_BRANCH: &str = "base_branch";
    pub const REMOTE_AUTH_HOME: &str = "remote_auth_home";
}

/// Requested executor backend. Maps to a registered backend name; an
/// unregistered request falls back to `Standalone` under the manager's
/// fallback policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Docker,
    #[default]
    Standalone,
    Remote,
}

crate::simple_display! {
    ExecutorKind {
        Docker => "docker",
        Standalone => "standalone",
        Remote => "remote",
    }
}

impl ExecutorKind {
    /// Registered backend name this kind maps to.
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Standalone => "standalone",
            Self::Remote => "remote",
        }
    }
}

/// Worktree preparation options on a launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeOptions {
    pub use_worktree: bool,
    /// Reuse an existing managed worktree when supplied.
    #[serde(default)]
    pub worktree_id: Option<WorktreeId>,
    #[serde(default)]
    pub repository_id: Option<String>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub branch_prefix: Option<String>,
    #[serde(default)]
    pub pull_before_worktree: bool,
}

/// Request to launch an agent for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub profile_id: ProfileId,
    /// Prepared workspace path; when absent the preparer derives one from
    /// `repository_path` (plus worktree options).
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    #[serde(default)]
    pub repository_path: Option<PathBuf>,
    pub task_description: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Protocol session to resume, when known.
    #[serde(default)]
    pub protocol_session_id: Option<String>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub executor: ExecutorKind,
    #[serde(default)]
    pub worktree: WorktreeOptions,
    /// Shell script run in the workspace before the agent starts.
    #[serde(default)]
    pub setup_script: Option<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl LaunchRequest {
    pub fn new(
        task_id: impl Into<TaskId>,
        session_id: impl Into<SessionId>,
        profile_id: impl Into<ProfileId>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            profile_id: profile_id.into(),
            workspace_path: None,
            repository_path: None,
            task_description: task_description.into(),
            env: IndexMap::new(),
            protocol_session_id: None,
            model_override: None,
            executor: ExecutorKind::default(),
            worktree: WorktreeOptions::default(),
            setup_script: None,
            metadata: IndexMap::new(),
        }
    }

    crate::setters! {
        set {
            env: IndexMap<String, String>,
            executor: ExecutorKind,
            worktree: WorktreeOptions,
            metadata: IndexMap<String, String>,
        }
        option {
            workspace_path: PathBuf,
            repository_path: PathBuf,
            protocol_session_id: String,
            model_override: String,
            setup_script: String,
        }
    }
}

#[cfg(test)]
#[path = "launch_tests.rs"]
mod tests;
