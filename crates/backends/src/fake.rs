// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake executor backend for tests.

use crate::interactive::InteractiveRunner;
use crate::{
    BackendError, CreateInstanceSpec, ExecutorBackend, ExecutorInstance, InstanceTransport,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use kandev_core::id::{ExecutionId, InstanceId};
use parking_lot::Mutex;
use std::sync::Arc;

/// Recorded backend invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    HealthCheck,
    Create(ExecutionId),
    Stop { instance_id: InstanceId, force: bool },
    Recover,
    Close,
}

/// In-memory backend that records calls and returns scripted results.
pub struct FakeBackend {
    name: &'static str,
    port: u16,
    calls: Mutex<Vec<BackendCall>>,
    next_create_error: Mutex<Option<BackendError>>,
    health_error: Mutex<Option<String>>,
    recover_with: Mutex<Vec<ExecutorInstance>>,
    runner: Mutex<Option<Arc<dyn InteractiveRunner>>>,
}

impl FakeBackend {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            port: 42_000,
            calls: Mutex::new(Vec::new()),
            next_create_error: Mutex::new(None),
            health_error: Mutex::new(None),
            recover_with: Mutex::new(Vec::new()),
            runner: Mutex::new(None),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Fail the next `create_instance` with the given error.
    pub fn fail_next_create(&self, error: BackendError) {
        *self.next_create_error.lock() = Some(error);
    }

    pub fn set_health_error(&self, message: impl Into<String>) {
        *self.health_error.lock() = Some(message.into());
    }

    /// Instances `recover_instances` should report alive.
    pub fn set_recoverable(&self, instances: Vec<ExecutorInstance>) {
        *self.recover_with.lock() = instances;
    }

    pub fn set_runner(&self, runner: Arc<dyn InteractiveRunner>) {
        *self.runner.lock() = Some(runner);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Build the instance this fake would return for an execution.
    pub fn instance_for(&self, execution_id: &ExecutionId) -> ExecutorInstance {
        let mut metadata = IndexMap::new();
        metadata.insert("port".to_string(), self.port.to_string());
        ExecutorInstance {
            instance_id: InstanceId::new(format!("inst-{execution_id}")),
            backend_name: self.name.to_string(),
            transport: InstanceTransport::Standalone { port: self.port },
            workspace_path: "/tmp/fake-workspace".into(),
            metadata,
        }
    }
}

#[async_trait]
impl ExecutorBackend for FakeBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        self.calls.lock().push(BackendCall::HealthCheck);
        match self.health_error.lock().as_ref() {
            Some(message) => Err(BackendError::Unavailable(message.clone())),
            None => Ok(()),
        }
    }

    async fn create_instance(
        &self,
        spec: &CreateInstanceSpec,
    ) -> Result<ExecutorInstance, BackendError> {
        self.calls.lock().push(BackendCall::Create(spec.execution_id.clone()));
        if let Some(error) = self.next_create_error.lock().take() {
            return Err(error);
        }
        let mut instance = self.instance_for(&spec.execution_id);
        instance.workspace_path = spec.workspace_path.clone();
        Ok(instance)
    }

    async fn stop_instance(
        &self,
        instance: &ExecutorInstance,
        force: bool,
    ) -> Result<(), BackendError> {
        self.calls.lock().push(BackendCall::Stop {
            instance_id: instance.instance_id.clone(),
            force,
        });
        Ok(())
    }

    async fn recover_instances(&self) -> Result<Vec<ExecutorInstance>, BackendError> {
        self.calls.lock().push(BackendCall::Recover);
        Ok(self.recover_with.lock().clone())
    }

    fn interactive_runner(&self) -> Option<Arc<dyn InteractiveRunner>> {
        self.runner.lock().clone()
    }

    async fn close(&self) {
        self.calls.lock().push(BackendCall::Close);
    }
}
