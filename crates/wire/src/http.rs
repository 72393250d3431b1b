// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP bodies and endpoint paths on the control daemon.

use indexmap::IndexMap;
use kandev_core::id::InstanceId;
use kandev_core::profile::{AgentProtocol, McpServer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const HEALTH_PATH: &str = "/health";
pub const STOP_PATH: &str = "/api/v1/stop";
pub const CONFIGURE_PATH: &str = "/api/v1/agent/configure";
pub const START_PATH: &str = "/api/v1/start";
pub const CREATE_INSTANCE_PATH: &str = "/api/v1/instances";
pub const AGENT_STREAM_PATH: &str = "/api/v1/agent/stream";
pub const WORKSPACE_STREAM_PATH: &str = "/api/v1/workspace/stream";
pub const PERMISSION_STREAM_PATH: &str = "/api/v1/permissions/stream";
pub const PERMISSION_RESPOND_PATH: &str = "/api/v1/permissions/respond";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// `POST /api/v1/agent/configure`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureAgentRequest {
    pub command: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// `auto` or `prompt`.
    pub approval_policy: String,
    /// Per-turn argv for one-shot CLIs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_command: Option<Vec<String>>,
}

/// `POST /api/v1/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartAgentResponse {
    pub full_command: String,
}

/// `POST /api/v1/stop`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub force: bool,
}

/// `POST /api/v1/instances` on the shared standalone daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub workspace_path: PathBuf,
    pub protocol: AgentProtocol,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstanceResponse {
    pub id: InstanceId,
    pub port: u16,
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
