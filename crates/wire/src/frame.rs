// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed messages on the agent WebSocket stream.
//!
//! Requests carry a monotonically increasing `id`; the daemon echoes it on
//! the matching response. Events carry no `id`. Error responses put a
//! machine code and message in `data`.

use kandev_core::profile::McpServer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Error code the daemon uses for unimplemented protocol actions.
pub const ERROR_CODE_METHOD_NOT_FOUND: &str = "method_not_found";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected frame kind: {0:?}")]
    UnexpectedKind(FrameKind),
}

/// Protocol action on the agent stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "agent.initialize")]
    Initialize,
    #[serde(rename = "agent.session.new")]
    SessionNew,
    #[serde(rename = "agent.session.load")]
    SessionLoad,
    #[serde(rename = "agent.prompt")]
    Prompt,
    #[serde(rename = "agent.cancel")]
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Request,
    Response,
    Event,
    Error,
}

/// One framed message: `{id, action, type, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    #[serde(rename = "type")]
    pub kind: FrameKind,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a request frame with a typed body.
    pub fn request<T: Serialize>(id: u64, action: Action, body: &T) -> Result<Self, WireError> {
        Ok(Self {
            id: Some(id),
            action: Some(action),
            kind: FrameKind::Request,
            data: serde_json::to_value(body)?,
        })
    }

    /// Parse a frame from WebSocket text.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String, WireError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Machine error code when this is an error frame.
    pub fn error_code(&self) -> Option<&str> {
        if self.kind != FrameKind::Error {
            return None;
        }
        self.data.get("code").and_then(Value::as_str)
    }

    /// Human error message when this is an error frame.
    pub fn error_message(&self) -> String {
        self.data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown daemon error")
            .to_string()
    }

    /// Whether this frame signals a method the agent does not implement.
    pub fn is_method_not_found(&self) -> bool {
        self.error_code() == Some(ERROR_CODE_METHOD_NOT_FOUND)
    }
}

// ── Typed action bodies ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeRequest {
    pub client_name: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// Agent implements `agent.session.load`.
    #[serde(default)]
    pub load_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub agent_name: String,
    pub agent_version: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNewRequest {
    pub workspace_path: PathBuf,
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNewResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLoadRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptAttachment {
    pub path: PathBuf,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub session_id: String,
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<PromptAttachment>,
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
