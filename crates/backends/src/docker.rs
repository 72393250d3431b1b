// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker executor backend.
//!
//! Each execution gets a container running the control daemon with its
//! API on a container port mapped to a unique host port. The Docker CLI
//! drives container lifecycle; the client check is lazy and retryable so
//! a docker daemon that comes up late never leaves the backend stuck
//! unavailable.

use crate::credential::{resolve_required_env, CredentialStore};
use crate::{
    BackendError, CreateInstanceSpec, ExecutorBackend, ExecutorInstance, InstanceTransport,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use kandev_core::id::InstanceId;
use kandev_core::launch::metadata_keys;
use kandev_core::profile::MountTemplate;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

/// Port the daemon listens on inside the container.
const CONTAINER_PORT: u16 = 8080;

/// Managed-container label; recovery and cleanup key off it.
pub const LABEL_MANAGED: &str = "kandev.managed";
pub const LABEL_INSTANCE_ID: &str = "kandev.instance_id";
pub const LABEL_TASK_ID: &str = "kandev.task_id";
pub const LABEL_PROFILE_ID: &str = "kandev.agent_profile_id";

pub struct DockerBackend {
    credentials: Arc<dyn CredentialStore>,
    /// Set once the CLI has answered a version probe. Failure is never
    /// sticky; the probe reruns on the next create.
    cli_ready: Mutex<bool>,
    port_counter: AtomicU16,
}

impl DockerBackend {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        let base_port: u16 = std::env::var("KANDEV_DOCKER_BASE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9300);
        Self {
            credentials,
            cli_ready: Mutex::new(false),
            port_counter: AtomicU16::new(base_port),
        }
    }

    fn next_port(&self) -> u16 {
        self.port_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Lazily confirm the Docker CLI is usable.
    async fn ensure_cli(&self) -> Result<(), BackendError> {
        if *self.cli_ready.lock() {
            return Ok(());
        }
        run_docker(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(|e| BackendError::Unavailable(format!("docker cli: {}", e)))?;
        *self.cli_ready.lock() = true;
        Ok(())
    }
}

#[async_trait]
impl ExecutorBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    /// Lazy init makes the health check a no-op.
    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<ExecutorInstance, BackendError> {
        self.ensure_cli().await?;

        let runtime = &spec.agent_spec.runtime;
        let image = image_ref(runtime.image.as_deref(), runtime.image_tag.as_deref())
            .ok_or_else(|| {
                BackendError::CreateFailed(format!(
                    "agent {} has no container image",
                    spec.agent_spec.id
                ))
            })?;

        let instance_id = InstanceId::generate();
        let host_port = self.next_port();
        let container_name = format!("kandev-{}", spec.execution_id);

        let mut env = standard_env(spec, Some(&instance_id));
        env.extend(resolve_required_env(
            self.credentials.as_ref(),
            &runtime.required_env,
        ));

        let home = dirs::home_dir().unwrap_or_else(|| "/root".into());
        let mut mounts = expand_mounts(&runtime.mounts, &spec.workspace_path, &home);
        mounts.push(format!("{}:/workspace", spec.workspace_path.display()));
        // Worktree launches mount the main repository's git dir read-write
        // so worktree metadata inside the container resolves.
        if let Some(git_dir) = spec.metadata.get(metadata_keys::MAIN_REPO_GIT_DIR) {
            mounts.push(format!("{git_dir}:{git_dir}"));
        }

        let labels = build_labels(spec, &instance_id);

        let port_mapping = format!("{}:{}", host_port, CONTAINER_PORT);
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name.clone(),
            "-p".into(),
            port_mapping,
            "-w".into(),
            "/workspace".into(),
        ];
        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        for mount in &mounts {
            args.push("-v".into());
            args.push(mount.clone());
        }
        if let Some(memory_mb) = runtime.memory_mb {
            args.push("--memory".into());
            args.push(format!("{memory_mb}m"));
        }
        if let Some(cpu_cores) = runtime.cpu_cores {
            args.push("--cpus".into());
            args.push(format!("{cpu_cores}"));
        }
        args.push(image);
        args.push("--port".into());
        args.push(format!("{CONTAINER_PORT}"));

        tracing::info!(
            execution_id = %spec.execution_id,
            %container_name,
            host_port,
            "spawning container daemon"
        );

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = run_docker(&arg_refs)
            .await
            .map_err(|e| BackendError::CreateFailed(format!("docker run failed: {}", e)))?;
        let container_id = stdout.trim().to_string();

        let mut metadata = IndexMap::new();
        metadata.insert("container_name".to_string(), container_name);
        metadata.insert("port".to_string(), host_port.to_string());

        Ok(ExecutorInstance {
            instance_id,
            backend_name: self.name().to_string(),
            transport: InstanceTransport::Container {
                container_id,
                ip: "127.0.0.1".to_string(),
                port: host_port,
            },
            workspace_path: spec.workspace_path.clone(),
            metadata,
        })
    }

    async fn stop_instance(
        &self,
        instance: &ExecutorInstance,
        force: bool,
    ) -> Result<(), BackendError> {
        let Some(container_id) = instance.container_id() else {
            return Err(BackendError::StopFailed(format!(
                "instance {} has no container",
                instance.instance_id
            )));
        };

        let result = if force {
            run_docker(&["kill", container_id]).await
        } else {
            run_docker(&["stop", "-t", "30", container_id]).await
        };
        if let Err(e) = result {
            tracing::warn!(%container_id, error = %e, "container stop failed");
        }
        // Remove regardless so a wedged container does not leak.
        if let Err(e) = run_docker(&["rm", "-f", container_id]).await {
            tracing::warn!(%container_id, error = %e, "container rm failed");
        }
        Ok(())
    }

    /// Live containers are rediscovered per-session on demand rather than
    /// enumerated at startup.
    async fn recover_instances(&self) -> Result<Vec<ExecutorInstance>, BackendError> {
        Ok(Vec::new())
    }
}

/// `image[:tag]`; `None` when the spec has no image.
fn image_ref(image: Option<&str>, tag: Option<&str>) -> Option<String> {
    let image = image?;
    Some(match tag {
        Some(tag) => format!("{image}:{tag}"),
        None => image.to_string(),
    })
}

/// Standard env every agent process receives, plus per-launch extras.
///
/// `instance_id` is `None` when the daemon assigns the id itself (the
/// shared standalone daemon injects `KANDEV_INSTANCE_ID` on its side).
pub(crate) fn standard_env(
    spec: &CreateInstanceSpec,
    instance_id: Option<&InstanceId>,
) -> IndexMap<String, String> {
    let mut env = IndexMap::new();
    if let Some(instance_id) = instance_id {
        env.insert("KANDEV_INSTANCE_ID".to_string(), instance_id.to_string());
    }
    env.insert("KANDEV_TASK_ID".to_string(), spec.task_id.to_string());
    env.insert("KANDEV_SESSION_ID".to_string(), spec.session_id.to_string());
    env.insert(
        "KANDEV_AGENT_PROFILE_ID".to_string(),
        spec.profile_id.to_string(),
    );
    if let Some(description) = spec.metadata.get(metadata_keys::TASK_DESCRIPTION) {
        env.insert("TASK_DESCRIPTION".to_string(), description.clone());
    }
    // Request env wins over the standard values on key collision.
    for (key, value) in &spec.env {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// Expand mount templates: `{workspace}` and `{home}` placeholders.
pub(crate) fn expand_mounts(
    mounts: &[MountTemplate],
    workspace: &Path,
    home: &Path,
) -> Vec<String> {
    let workspace = workspace.display().to_string();
    let home = home.display().to_string();
    mounts
        .iter()
        .map(|m| {
            let source = m
                .source
                .replace("{workspace}", &workspace)
                .replace("{home}", &home);
            let target = m
                .target
                .replace("{workspace}", &workspace)
                .replace("{home}", &home);
            if m.read_only {
                format!("{source}:{target}:ro")
            } else {
                format!("{source}:{target}")
            }
        })
        .collect()
}

pub(crate) fn build_labels(
    spec: &CreateInstanceSpec,
    instance_id: &InstanceId,
) -> Vec<(String, String)> {
    vec![
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_INSTANCE_ID.to_string(), instance_id.to_string()),
        (LABEL_TASK_ID.to_string(), spec.task_id.to_string()),
        (LABEL_PROFILE_ID.to_string(), spec.profile_id.to_string()),
    ]
}

/// Run a docker CLI command, returning stdout or stderr-as-error.
async fn run_docker(args: &[&str]) -> Result<String, String> {
    let output = tokio::process::Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("docker not runnable: {}", e))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
