// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote executor backend (user-owned host over SSH).
//!
//! The remote host runs the same shared control daemon as the standalone
//! backend; the differences are around provisioning: the remote user's
//! home directory must be resolved (metadata override, then an SSH
//! probe), SSH-form git URLs are rewritten to token-authenticated HTTPS
//! because the host has no agent keys, and uploads retry transient HTTP
//! failures with backoff.

use crate::credential::{resolve_required_env, CredentialStore};
use crate::docker::standard_env;
use crate::{
    BackendError, CreateInstanceSpec, ExecutorBackend, ExecutorInstance, InstanceTransport,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use kandev_core::launch::metadata_keys;
use kandev_wire::{
    CreateInstanceRequest, CreateInstanceResponse, StopRequest, CREATE_INSTANCE_PATH, HEALTH_PATH,
    STOP_PATH,
};
use kandev_agentctl::http;
use std::time::Duration;
use std::sync::Arc;

/// Credential-store key holding a git HTTPS access token.
pub const GIT_TOKEN_KEY: &str = "GIT_ACCESS_TOKEN";

const MAX_TRANSIENT_ATTEMPTS: usize = 4;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const SSH_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RemoteBackend {
    /// SSH target, `user@host`.
    ssh_target: String,
    /// Address of the remote control daemon, `host:port`.
    daemon_addr: String,
    credentials: Arc<dyn CredentialStore>,
}

impl RemoteBackend {
    pub fn new(
        ssh_target: impl Into<String>,
        daemon_addr: impl Into<String>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            ssh_target: ssh_target.into(),
            daemon_addr: daemon_addr.into(),
            credentials,
        }
    }

    /// Resolve the remote user's home directory.
    ///
    /// A metadata override wins; otherwise probe over SSH. Empty output
    /// is fatal — a blank `$HOME` would scatter agent state across `/`.
    async fn resolve_home(&self, spec: &CreateInstanceSpec) -> Result<String, BackendError> {
        if let Some(home) = spec.metadata.get(metadata_keys::REMOTE_AUTH_HOME) {
            if !home.is_empty() {
                return Ok(home.clone());
            }
        }

        let probe = tokio::time::timeout(
            SSH_PROBE_TIMEOUT,
            tokio::process::Command::new("ssh")
                .arg(&self.ssh_target)
                .args(["sh", "-c", "echo $HOME"])
                .output(),
        )
        .await
        .map_err(|_| BackendError::CreateFailed("home probe timed out".into()))?
        .map_err(|e| BackendError::CreateFailed(format!("home probe failed: {}", e)))?;

        let home = String::from_utf8_lossy(&probe.stdout).trim().to_string();
        if home.is_empty() {
            return Err(BackendError::CreateFailed(format!(
                "home probe on {} returned empty output",
                self.ssh_target
            )));
        }
        Ok(home)
    }
}

#[async_trait]
impl ExecutorBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        http::get(&self.daemon_addr, HEALTH_PATH)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unavailable(format!("remote daemon health: {}", e)))
    }

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<ExecutorInstance, BackendError> {
        let home = self.resolve_home(spec).await?;

        let mut env = standard_env(spec, None);
        env.extend(resolve_required_env(
            self.credentials.as_ref(),
            &spec.agent_spec.runtime.required_env,
        ));
        env.insert("HOME".to_string(), home.clone());

        // The remote host has no SSH deploy keys; hand it HTTPS instead.
        if let Some(token) = self.credentials.get(GIT_TOKEN_KEY) {
            for value in env.values_mut() {
                if let Some(rewritten) = rewrite_ssh_url(value, &token) {
                    *value = rewritten;
                }
            }
        }

        let request = CreateInstanceRequest {
            workspace_path: spec.workspace_path.clone(),
            protocol: spec.agent_spec.runtime.protocol,
            env,
            mcp_servers: spec.agent_spec.runtime.mcp_servers.clone(),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| BackendError::CreateFailed(format!("encode create: {}", e)))?;

        let response = with_transient_retry(MAX_TRANSIENT_ATTEMPTS, || {
            let body = body.clone();
            async move {
                http::post(&self.daemon_addr, CREATE_INSTANCE_PATH, &body)
                    .await
                    .map_err(classify_upload_error)
            }
        })
        .await?;

        let created: CreateInstanceResponse = serde_json::from_str(&response)
            .map_err(|e| BackendError::CreateFailed(format!("invalid create response: {}", e)))?;

        tracing::info!(
            execution_id = %spec.execution_id,
            instance_id = %created.id,
            host = %self.ssh_target,
            port = created.port,
            "remote instance created"
        );

        let mut metadata = IndexMap::new();
        metadata.insert("port".to_string(), created.port.to_string());
        metadata.insert(metadata_keys::REMOTE_AUTH_HOME.to_string(), home);

        let host = self
            .daemon_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| self.daemon_addr.clone());

        Ok(ExecutorInstance {
            instance_id: created.id,
            backend_name: self.name().to_string(),
            transport: InstanceTransport::Container {
                // Remote instances address like containers: daemon host + port.
                container_id: String::new(),
                ip: host,
                port: created.port,
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
        let body = serde_json::to_string(&StopRequest { force })
            .map_err(|e| BackendError::StopFailed(format!("encode stop: {}", e)))?;
        http::post(&instance.address(), STOP_PATH, &body)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::StopFailed(format!("remote stop: {}", e)))
    }

    async fn recover_instances(&self) -> Result<Vec<ExecutorInstance>, BackendError> {
        Ok(Vec::new())
    }
}

/// Rewrite an SSH-form git URL to token-authenticated HTTPS.
///
/// Handles `git@host:org/repo.git` and `ssh://git@host/org/repo.git`.
/// Returns `None` for anything that is not an SSH-form git URL.
pub fn rewrite_ssh_url(url: &str, token: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        if host.is_empty() || path.is_empty() {
            return None;
        }
        return Some(format!("https://{token}@{host}/{path}"));
    }
    if let Some(rest) = url.strip_prefix("ssh://git@") {
        let (host, path) = rest.split_once('/')?;
        if host.is_empty() || path.is_empty() {
            return None;
        }
        return Some(format!("https://{token}@{host}/{path}"));
    }
    None
}

/// Classify an upload failure: 5xx, 429, connection reset, and client
/// timeouts retry; everything else is permanent.
fn classify_upload_error(e: kandev_agentctl::ControlError) -> BackendError {
    use kandev_agentctl::ControlError;
    match &e {
        ControlError::Timeout => BackendError::Transient("request timed out".into()),
        ControlError::Http(msg) => {
            let transient = msg.contains("HTTP 5")
                || msg.contains("HTTP 429")
                || msg.contains("reset")
                || msg.contains("connect failed");
            if transient {
                BackendError::Transient(msg.clone())
            } else {
                BackendError::CreateFailed(msg.clone())
            }
        }
        _ => BackendError::CreateFailed(e.to_string()),
    }
}

/// Run an operation, retrying transient failures with exponential backoff.
async fn with_transient_retry<T, F, Fut>(max_attempts: usize, mut op: F) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, BackendError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, error = %e, "transient upload failure, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[path = "remote_tests.rs"]
mod tests;
