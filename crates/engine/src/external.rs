// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Seams to the external collaborators the core consumes.
//!
//! Profile store, agent registry, worktree manager, workspace-info
//! provider, event bus, and the control-client factory. Production
//! implementations live outside this crate; tests use the fakes in
//! [`crate::test_support`].

use async_trait::async_trait;
use kandev_agentctl::{ControlClient, HttpControlClient};
use kandev_backends::ExecutorInstance;
use kandev_core::event::Event;
use kandev_core::id::{AgentId, ProfileId, SessionId, TaskId, WorktreeId};
use kandev_core::profile::{AgentSpec, ProfileInfo};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Profile store: `resolve(profile_id) → ProfileInfo | missing`.
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    async fn resolve(&self, id: &ProfileId) -> Option<ProfileInfo>;
}

/// Agent registry: `get(agent_id) → AgentSpec | missing`.
#[async_trait]
pub trait AgentRegistry: Send + Sync + 'static {
    async fn get(&self, id: &AgentId) -> Option<AgentSpec>;
}

#[derive(Debug, Error)]
#[error("worktree operation failed: {0}")]
pub struct WorktreeError(pub String);

/// Worktree creation request; a supplied id reuses an existing worktree.
#[derive(Debug, Clone)]
pub struct WorktreeRequest {
    pub worktree_id: Option<WorktreeId>,
    pub repository_id: Option<String>,
    pub repository_path: PathBuf,
    pub base_branch: Option<String>,
    pub branch_prefix: Option<String>,
    pub pull_first: bool,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub id: WorktreeId,
    pub path: PathBuf,
    pub branch: String,
}

/// External worktree manager.
#[async_trait]
pub trait WorktreeManager: Send + Sync + 'static {
    async fn create(&self, request: WorktreeRequest) -> Result<Worktree, WorktreeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub workspace_path: PathBuf,
    pub repository_path: Option<PathBuf>,
}

/// Workspace-info provider, consulted during lazy per-session recovery.
#[async_trait]
pub trait WorkspaceInfoProvider: Send + Sync + 'static {
    async fn get_for_session(
        &self,
        task_id: &TaskId,
        session_id: &SessionId,
    ) -> Option<WorkspaceInfo>;
}

/// Topic-scoped publish onto the event bus. Consumer subscription is
/// outside the core.
pub trait EventBus: Send + Sync + 'static {
    fn publish(&self, topic: &str, event: &Event);
}

/// Builds control clients for daemon instances; the seam tests use to
/// substitute in-process fakes.
pub trait ControlClientFactory: Send + Sync + 'static {
    fn client_for(&self, instance: &ExecutorInstance) -> Arc<dyn ControlClient>;
}

/// Production factory: plain HTTP/WebSocket clients over TCP.
#[derive(Debug, Default)]
pub struct HttpClientFactory;

impl ControlClientFactory for HttpClientFactory {
    fn client_for(&self, instance: &ExecutorInstance) -> Arc<dyn ControlClient> {
        Arc::new(HttpControlClient::new(instance.address()))
    }
}
