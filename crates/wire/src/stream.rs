// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event unions carried on the three daemon streams.
//!
//! These are the daemon's raw shapes; the engine's publisher normalizes
//! them into bus payloads and never leaks them to subscribers.

use kandev_core::event::{PermissionOption, ToolCallStatus};
use kandev_core::turn::SlashCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events on `/api/v1/agent/stream` (outside request/response frames).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    /// Incremental assistant text.
    MessageChunk { text: String },
    /// Incremental reasoning text.
    Reasoning { text: String },
    ToolCall {
        id: String,
        name: String,
        #[serde(default)]
        title: Option<String>,
    },
    ToolUpdate {
        id: String,
        status: ToolCallStatus,
    },
    /// Turn finished; an absent stop reason defaults to `end_turn`
    /// downstream.
    Complete {
        #[serde(default)]
        stop_reason: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    AvailableCommands { commands: Vec<SlashCommand> },
    ContextWindow { used_tokens: u64, max_tokens: u64 },
    SessionStatus { status: String },
}

/// Events on the permission stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermissionStreamEvent {
    PermissionRequested {
        id: String,
        tool_call_id: String,
        title: String,
        options: Vec<PermissionOption>,
    },
    /// The daemon confirms a request was answered (possibly elsewhere).
    PermissionResolved {
        id: String,
        option_id: String,
    },
}

/// Reply to a pending permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    pub id: String,
    pub option_id: String,
}

/// Events on `/api/v1/workspace/stream` (unified shell/git/file feed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceStreamEvent {
    ShellOutput {
        data: String,
        #[serde(default)]
        stderr: bool,
    },
    ShellExit {
        #[serde(default)]
        exit_code: Option<i32>,
    },
    ProcessOutput { data: String },
    ProcessStatus {
        running: bool,
        #[serde(default)]
        exit_code: Option<i32>,
    },
    GitStatus {
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        changed_files: Vec<String>,
    },
    GitCommit {
        commit_id: String,
        message: String,
    },
    GitReset { target: String },
    GitSnapshot { snapshot_id: String },
    FileChange { paths: Vec<PathBuf> },
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
