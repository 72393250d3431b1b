// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus event payloads published by the lifecycle core.
//!
//! Serializes with `{"type": "agent:started", ...fields}` format. Payload
//! schemas are closed: the raw daemon stream union never reaches bus
//! consumers — the publisher normalizes everything into these shapes.
//! Topics are derived from the session id.

use crate::id::{ExecutionId, ProfileId, SessionId, TaskId};
use crate::status::ExecutionStatus;
use crate::turn::SlashCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shared payload for agent lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePayload {
    pub execution_id: ExecutionId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub profile_id: ProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp_ms: u64,
}

/// Status of one tool call as reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    InProgress,
    Complete,
    Error,
    Failed,
}

impl ToolCallStatus {
    /// Whether this status ends the tool call.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Failed)
    }
}

/// One selectable option on a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOption {
    pub id: String,
    pub name: String,
    /// e.g. `allow_once`, `allow_always`, `reject_once`.
    pub kind: String,
}

/// Normalized agent-stream payload wrapped by [`Event::AgentStream`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamPayload {
    /// One streaming text update. `is_append` is false on the first
    /// publish for a `message_id` and true thereafter.
    MessageStreaming {
        message_id: String,
        text: String,
        is_append: bool,
        /// True for reasoning text, false for assistant output.
        thinking: bool,
    },
    ToolCall {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    ToolUpdate {
        id: String,
        status: ToolCallStatus,
    },
    /// Turn finished. `text` is empty when streaming was used; otherwise
    /// it carries the full buffered message.
    Complete {
        stop_reason: String,
        text: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    PermissionRequest {
        id: String,
        tool_call_id: String,
        title: String,
        options: Vec<PermissionOption>,
    },
    ContextWindow {
        used_tokens: u64,
        max_tokens: u64,
    },
    AvailableCommands {
        commands: Vec<SlashCommand>,
    },
    SessionStatus {
        status: String,
    },
}

/// Events published on the bus by the lifecycle core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // -- agent lifecycle --
    #[serde(rename = "agent:started")]
    AgentStarted {
        #[serde(flatten)]
        payload: LifecyclePayload,
    },

    #[serde(rename = "agent:ready")]
    AgentReady {
        #[serde(flatten)]
        payload: LifecyclePayload,
    },

    #[serde(rename = "agent:completed")]
    AgentCompleted {
        #[serde(flatten)]
        payload: LifecyclePayload,
    },

    #[serde(rename = "agent:failed")]
    AgentFailed {
        #[serde(flatten)]
        payload: LifecyclePayload,
    },

    #[serde(rename = "agent:stopped")]
    AgentStopped {
        #[serde(flatten)]
        payload: LifecyclePayload,
    },

    // -- control daemon lifecycle --
    #[serde(rename = "agentctl:starting")]
    DaemonStarting {
        execution_id: ExecutionId,
        session_id: SessionId,
        timestamp_ms: u64,
    },

    #[serde(rename = "agentctl:ready")]
    DaemonReady {
        execution_id: ExecutionId,
        session_id: SessionId,
        timestamp_ms: u64,
    },

    #[serde(rename = "agentctl:error")]
    DaemonError {
        execution_id: ExecutionId,
        session_id: SessionId,
        message: String,
        timestamp_ms: u64,
    },

    // -- protocol session --
    #[serde(rename = "agent:acp_session_created")]
    AcpSessionCreated {
        session_id: SessionId,
        protocol_session_id: String,
        timestamp_ms: u64,
    },

    #[serde(rename = "agent:context_reset")]
    AgentContextReset {
        execution_id: ExecutionId,
        session_id: SessionId,
        timestamp_ms: u64,
    },

    // -- agent stream --
    #[serde(rename = "agent:stream")]
    AgentStream {
        session_id: SessionId,
        timestamp_ms: u64,
        payload: StreamPayload,
    },

    // -- workspace --
    #[serde(rename = "git:status")]
    GitStatus {
        session_id: SessionId,
        timestamp_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        changed_files: Vec<String>,
    },

    #[serde(rename = "git:commit")]
    GitCommit {
        session_id: SessionId,
        timestamp_ms: u64,
        commit_id: String,
        message: String,
    },

    #[serde(rename = "git:reset")]
    GitReset {
        session_id: SessionId,
        timestamp_ms: u64,
        target: String,
    },

    #[serde(rename = "git:snapshot")]
    GitSnapshot {
        session_id: SessionId,
        timestamp_ms: u64,
        snapshot_id: String,
    },

    #[serde(rename = "shell:output")]
    ShellOutput {
        session_id: SessionId,
        timestamp_ms: u64,
        data: String,
        stderr: bool,
    },

    #[serde(rename = "shell:exit")]
    ShellExit {
        session_id: SessionId,
        timestamp_ms: u64,
        exit_code: Option<i32>,
    },

    #[serde(rename = "process:output")]
    ProcessOutput {
        session_id: SessionId,
        timestamp_ms: u64,
        data: String,
    },

    #[serde(rename = "process:status")]
    ProcessStatus {
        session_id: SessionId,
        timestamp_ms: u64,
        running: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    #[serde(rename = "file:change")]
    FileChange {
        session_id: SessionId,
        timestamp_ms: u64,
        paths: Vec<PathBuf>,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::AgentStarted { .. } => "agent:started",
            Event::AgentReady { .. } => "agent:ready",
            Event::AgentCompleted { .. } => "agent:completed",
            Event::AgentFailed { .. } => "agent:failed",
            Event::AgentStopped { .. } => "agent:stopped",
            Event::DaemonStarting { .. } => "agentctl:starting",
            Event::DaemonReady { .. } => "agentctl:ready",
            Event::DaemonError { .. } => "agentctl:error",
            Event::AcpSessionCreated { .. } => "agent:acp_session_created",
            Event::AgentContextReset { .. } => "agent:context_reset",
            Event::AgentStream { .. } => "agent:stream",
            Event::GitStatus { .. } => "git:status",
            Event::GitCommit { .. } => "git:commit",
            Event::GitReset { .. } => "git:reset",
            Event::GitSnapshot { .. } => "git:snapshot",
            Event::ShellOutput { .. } => "shell:output",
            Event::ShellExit { .. } => "shell:exit",
            Event::ProcessOutput { .. } => "process:output",
            Event::ProcessStatus { .. } => "process:status",
            Event::FileChange { .. } => "file:change",
        }
    }

    /// Session the event belongs to.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Event::AgentStarted { payload }
            | Event::AgentReady { payload }
            | Event::AgentCompleted { payload }
            | Event::AgentFailed { payload }
            | Event::AgentStopped { payload } => &payload.session_id,
            Event::DaemonStarting { session_id, .. }
            | Event::DaemonReady { session_id, .. }
            | Event::DaemonError { session_id, .. }
            | Event::AcpSessionCreated { session_id, .. }
            | Event::AgentContextReset { session_id, .. }
            | Event::AgentStream { session_id, .. }
            | Event::GitStatus { session_id, .. }
            | Event::GitCommit { session_id, .. }
            | Event::GitReset { session_id, .. }
            | Event::GitSnapshot { session_id, .. }
            | Event::ShellOutput { session_id, .. }
            | Event::ShellExit { session_id, .. }
            | Event::ProcessOutput { session_id, .. }
            | Event::ProcessStatus { session_id, .. }
            | Event::FileChange { session_id, .. } => session_id,
        }
    }

    /// Bus topic this event publishes on.
    pub fn topic(&self) -> String {
        format!("session.{}", self.session_id())
    }

    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::AgentStarted { payload }
            | Event::AgentReady { payload }
            | Event::AgentCompleted { payload }
            | Event::AgentFailed { payload }
            | Event::AgentStopped { payload } => {
                format!(
                    "{t} execution={} session={} status={}",
                    payload.execution_id, payload.session_id, payload.status
                )
            }
            Event::DaemonStarting { execution_id, .. }
            | Event::DaemonReady { execution_id, .. } => {
                format!("{t} execution={execution_id}")
            }
            Event::DaemonError { execution_id, message, .. } => {
                format!("{t} execution={execution_id} message={message}")
            }
            Event::AcpSessionCreated { session_id, protocol_session_id, .. } => {
                format!("{t} session={session_id} protocol_session={protocol_session_id}")
            }
            Event::AgentContextReset { execution_id, .. } => {
                format!("{t} execution={execution_id}")
            }
            Event::AgentStream { session_id, payload, .. } => {
                let kind = match payload {
                    StreamPayload::MessageStreaming { .. } => "message_streaming",
                    StreamPayload::ToolCall { .. } => "tool_call",
                    StreamPayload::ToolUpdate { .. } => "tool_update",
                    StreamPayload::Complete { .. } => "complete",
                    StreamPayload::PermissionRequest { .. } => "permission_request",
                    StreamPayload::ContextWindow { .. } => "context_window",
                    StreamPayload::AvailableCommands { .. } => "available_commands",
                    StreamPayload::SessionStatus { .. } => "session_status",
                };
                format!("{t} session={session_id} kind={kind}")
            }
            Event::GitStatus { session_id, .. }
            | Event::GitCommit { session_id, .. }
            | Event::GitReset { session_id, .. }
            | Event::GitSnapshot { session_id, .. }
            | Event::ShellOutput { session_id, .. }
            | Event::ShellExit { session_id, .. }
            | Event::ProcessOutput { session_id, .. }
            | Event::ProcessStatus { session_id, .. }
            | Event::FileChange { session_id, .. } => {
                format!("{t} session={session_id}")
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
