// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `ControlClient` trait and its HTTP/WebSocket implementation.

use crate::stream::{AgentStream, EventStream};
use crate::{http, ws, ControlError};
use async_trait::async_trait;
use kandev_wire::{
    ConfigureAgentRequest, PermissionResponse, PermissionStreamEvent, StartAgentResponse,
    StopRequest, WorkspaceStreamEvent, AGENT_STREAM_PATH, CONFIGURE_PATH, HEALTH_PATH,
    PERMISSION_RESPOND_PATH, PERMISSION_STREAM_PATH, START_PATH, STOP_PATH, WORKSPACE_STREAM_PATH,
};

/// Operations the engine performs against one control daemon.
///
/// Implemented over TCP by [`HttpControlClient`]; tests substitute an
/// in-process fake built on [`AgentStream::pair`] and
/// [`EventStream::channel`].
#[async_trait]
pub trait ControlClient: Send + Sync + 'static {
    /// Daemon address, `host:port`.
    fn address(&self) -> String;

    async fn health(&self) -> Result<(), ControlError>;

    /// Graceful agent stop; `force` skips the grace period.
    async fn stop(&self, force: bool) -> Result<(), ControlError>;

    async fn configure_agent(&self, request: ConfigureAgentRequest) -> Result<(), ControlError>;

    async fn start_agent(&self) -> Result<StartAgentResponse, ControlError>;

    async fn open_agent_stream(&self) -> Result<AgentStream, ControlError>;

    async fn open_permission_stream(
        &self,
    ) -> Result<EventStream<PermissionStreamEvent>, ControlError>;

    async fn open_workspace_stream(
        &self,
    ) -> Result<EventStream<WorkspaceStreamEvent>, ControlError>;

    async fn respond_permission(&self, response: PermissionResponse) -> Result<(), ControlError>;
}

/// Control client over the daemon's TCP HTTP + WebSocket API.
#[derive(Debug, Clone)]
pub struct HttpControlClient {
    addr: String,
}

impl HttpControlClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<String, ControlError> {
        let body = serde_json::to_string(body)
            .map_err(|e| ControlError::Http(format!("encode body failed: {}", e)))?;
        http::post(&self.addr, path, &body).await
    }
}

#[async_trait]
impl ControlClient for HttpControlClient {
    fn address(&self) -> String {
        self.addr.clone()
    }

    async fn health(&self) -> Result<(), ControlError> {
        http::get(&self.addr, HEALTH_PATH).await.map(|_| ())
    }

    async fn stop(&self, force: bool) -> Result<(), ControlError> {
        self.post_json(STOP_PATH, &StopRequest { force }).await.map(|_| ())
    }

    async fn configure_agent(&self, request: ConfigureAgentRequest) -> Result<(), ControlError> {
        self.post_json(CONFIGURE_PATH, &request).await.map(|_| ())
    }

    async fn start_agent(&self) -> Result<StartAgentResponse, ControlError> {
        let body = http::post(&self.addr, START_PATH, "{}").await?;
        serde_json::from_str(&body)
            .map_err(|e| ControlError::Http(format!("invalid start response: {}", e)))
    }

    async fn open_agent_stream(&self) -> Result<AgentStream, ControlError> {
        let ws = ws::connect(&self.addr, AGENT_STREAM_PATH).await?;
        Ok(AgentStream::connect(ws))
    }

    async fn open_permission_stream(
        &self,
    ) -> Result<EventStream<PermissionStreamEvent>, ControlError> {
        let ws = ws::connect(&self.addr, PERMISSION_STREAM_PATH).await?;
        Ok(EventStream::connect(ws))
    }

    async fn open_workspace_stream(
        &self,
    ) -> Result<EventStream<WorkspaceStreamEvent>, ControlError> {
        let ws = ws::connect(&self.addr, WORKSPACE_STREAM_PATH).await?;
        Ok(EventStream::connect(ws))
    }

    async fn respond_permission(&self, response: PermissionResponse) -> Result<(), ControlError> {
        self.post_json(PERMISSION_RESPOND_PATH, &response).await.map(|_| ())
    }
}
