// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Standalone executor backend.
//!
//! A single long-lived control daemon on the local machine multiplexes
//! instances by port: the backend posts a create request to the shared
//! daemon and gets back `{id, port}` for the per-instance API. Daemon
//! state is authoritative, so recovery is a no-op — resumed sessions
//! restart instances lazily on the next user action.

use crate::credential::{resolve_required_env, CredentialStore};
use crate::docker::standard_env;
use crate::interactive::{InteractiveRunner, LocalPtyRunner};
use crate::{
    BackendError, CreateInstanceSpec, ExecutorBackend, ExecutorInstance, InstanceTransport,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use kandev_agentctl::http;
use kandev_wire::{
    CreateInstanceRequest, CreateInstanceResponse, StopRequest, CREATE_INSTANCE_PATH, HEALTH_PATH,
    STOP_PATH,
};
use std::sync::Arc;
use std::time::Duration;

const HEALTH_WAIT_ATTEMPTS: usize = 20;
const HEALTH_WAIT_INTERVAL: Duration = Duration::from_millis(250);

pub struct StandaloneBackend {
    daemon_addr: String,
    credentials: Arc<dyn CredentialStore>,
    runner: Arc<LocalPtyRunner>,
}

impl StandaloneBackend {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        let daemon_addr = std::env::var("KANDEV_AGENTCTL_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9200".to_string());
        Self::with_addr(daemon_addr, credentials)
    }

    pub fn with_addr(daemon_addr: impl Into<String>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            daemon_addr: daemon_addr.into(),
            credentials,
            runner: Arc::new(LocalPtyRunner::new()),
        }
    }

    /// Wait for the shared daemon to answer its health endpoint.
    async fn wait_for_daemon(&self) -> Result<(), BackendError> {
        for i in 0..HEALTH_WAIT_ATTEMPTS {
            if i > 0 {
                tokio::time::sleep(HEALTH_WAIT_INTERVAL).await;
            }
            if http::get(&self.daemon_addr, HEALTH_PATH).await.is_ok() {
                return Ok(());
            }
        }
        Err(BackendError::Unavailable(format!(
            "standalone daemon at {} not healthy",
            self.daemon_addr
        )))
    }
}

#[async_trait]
impl ExecutorBackend for StandaloneBackend {
    fn name(&self) -> &'static str {
        "standalone"
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        http::get(&self.daemon_addr, HEALTH_PATH)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::Unavailable(format!("daemon health: {}", e)))
    }

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<ExecutorInstance, BackendError> {
        self.wait_for_daemon().await?;

        // The shared daemon assigns the instance id and injects
        // KANDEV_INSTANCE_ID itself.
        let mut env = standard_env(spec, None);
        env.extend(resolve_required_env(
            self.credentials.as_ref(),
            &spec.agent_spec.runtime.required_env,
        ));

        let request = CreateInstanceRequest {
            workspace_path: spec.workspace_path.clone(),
            protocol: spec.agent_spec.runtime.protocol,
            env,
            mcp_servers: spec.agent_spec.runtime.mcp_servers.clone(),
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| BackendError::CreateFailed(format!("encode create: {}", e)))?;
        let response = http::post(&self.daemon_addr, CREATE_INSTANCE_PATH, &body)
            .await
            .map_err(|e| BackendError::CreateFailed(format!("daemon create: {}", e)))?;
        let created: CreateInstanceResponse = serde_json::from_str(&response)
            .map_err(|e| BackendError::CreateFailed(format!("invalid create response: {}", e)))?;

        tracing::info!(
            execution_id = %spec.execution_id,
            instance_id = %created.id,
            port = created.port,
            "standalone instance created"
        );

        let mut metadata = IndexMap::new();
        metadata.insert("port".to_string(), created.port.to_string());

        Ok(ExecutorInstance {
            instance_id: created.id,
            backend_name: self.name().to_string(),
            transport: InstanceTransport::Standalone { port: created.port },
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
            .map_err(|e| BackendError::StopFailed(format!("instance stop: {}", e)))
    }

    /// Daemon state is authoritative; instances restart lazily on resume.
    async fn recover_instances(&self) -> Result<Vec<ExecutorInstance>, BackendError> {
        Ok(Vec::new())
    }

    fn interactive_runner(&self) -> Option<Arc<dyn InteractiveRunner>> {
        Some(self.runner.clone())
    }
}

#[cfg(test)]
#[path = "standalone_tests.rs"]
mod tests;
