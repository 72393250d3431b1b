// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor backends: where control daemons run.
//!
//! A backend creates one control daemon per execution (a container, an
//! instance under the shared local daemon, or an instance on a remote
//! host) and hands back an [`ExecutorInstance`] the manager converts into
//! an execution. Backends register by name in the [`ExecutorRegistry`].

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod credential;
pub mod docker;
pub mod interactive;
pub mod registry;
pub mod remote;
pub mod standalone;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use credential::{resolve_required_env, CredentialStore, EnvCredentialStore};
pub use docker::DockerBackend;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{BackendCall, FakeBackend};
pub use interactive::{InteractiveRunner, LocalPtyRunner, PtyProcess, PtySpec};
pub use registry::ExecutorRegistry;
pub use remote::RemoteBackend;
pub use standalone::StandaloneBackend;

use async_trait::async_trait;
use indexmap::IndexMap;
use kandev_core::id::{ExecutionId, InstanceId, ProfileId, SessionId, TaskId};
use kandev_core::profile::AgentSpec;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors from executor backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("create failed: {0}")]
    CreateFailed(String),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("recover failed: {0}")]
    RecoverFailed(String),
    /// Retryable network-ish failure (5xx, 429, reset, timeout).
    #[error("transient: {0}")]
    Transient(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Everything a backend needs to create a daemon for one execution.
#[derive(Debug, Clone)]
pub struct CreateInstanceSpec {
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub profile_id: ProfileId,
    pub agent_spec: AgentSpec,
    pub workspace_path: PathBuf,
    /// Merged environment (request env + standard vars + credentials).
    pub env: IndexMap<String, String>,
    pub metadata: IndexMap<String, String>,
}

/// How the manager reaches a created daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceTransport {
    Container {
        container_id: String,
        ip: String,
        port: u16,
    },
    Standalone {
        port: u16,
    },
}

/// Short-lived handoff shape a backend returns from `create_instance`.
///
/// The manager merges it with the originating request into an execution.
#[derive(Debug, Clone)]
pub struct ExecutorInstance {
    pub instance_id: InstanceId,
    pub backend_name: String,
    pub transport: InstanceTransport,
    pub workspace_path: PathBuf,
    /// Free-form handoff metadata (worktree id, branch, port).
    pub metadata: IndexMap<String, String>,
}

impl ExecutorInstance {
    /// TCP address of the daemon's API.
    pub fn address(&self) -> String {
        match &self.transport {
            InstanceTransport::Container { ip, port, .. } => format!("{}:{}", ip, port),
            InstanceTransport::Standalone { port } => format!("127.0.0.1:{}", port),
        }
    }

    pub fn container_id(&self) -> Option<&str> {
        match &self.transport {
            InstanceTransport::Container { container_id, .. } => Some(container_id),
            InstanceTransport::Standalone { .. } => None,
        }
    }
}

/// One place control daemons can run.
///
/// Cancellation follows the workspace convention: callers drop the future
/// (or race it against a shutdown channel); no method takes an explicit
/// context argument.
#[async_trait]
pub trait ExecutorBackend: Send + Sync + 'static {
    /// Registered backend name (`docker`, `standalone`, `remote`).
    fn name(&self) -> &'static str;

    /// Cheap liveness probe. Lazily-initialized backends may no-op.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Create the per-execution control daemon.
    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<ExecutorInstance, BackendError>;

    /// Stop a daemon: graceful with a 30 s budget, immediate when forced.
    async fn stop_instance(
        &self,
        instance: &ExecutorInstance,
        force: bool,
    ) -> Result<(), BackendError>;

    /// Instances whose daemons this backend can prove are still alive
    /// after an orchestrator restart.
    async fn recover_instances(&self) -> Result<Vec<ExecutorInstance>, BackendError>;

    /// PTY runner for passthrough agents, when this backend supports one.
    fn interactive_runner(&self) -> Option<Arc<dyn InteractiveRunner>> {
        None
    }

    /// Release held resources. Default: nothing to release.
    async fn close(&self) {}
}
