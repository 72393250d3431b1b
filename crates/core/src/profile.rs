// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent profile and agent spec data model.
//!
//! A `ProfileInfo` names the agent and its per-user runtime flags; an
//! `AgentSpec` describes one agent CLI: how to invoke it, which permission
//! flags it understands, what its runtime needs, and (for CLIs that cannot
//! speak the structured protocol) how to drive it through a PTY. Command
//! construction is a pure function over these templates — see
//! [`crate::command`].

use crate::id::{AgentId, ProfileId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Resolved agent profile (from the external profile store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub id: ProfileId,
    pub agent_id: AgentId,
    /// Model override for this profile; falls back to the spec default.
    #[serde(default)]
    pub model: Option<String>,
    /// Auto-approve permission prompts for this profile.
    #[serde(default)]
    pub auto_approve: bool,
    /// Per-flag permission values, keyed by [`PermissionSetting::name`].
    #[serde(default)]
    pub permission_values: IndexMap<String, String>,
    /// Agent supports `session/load` natively.
    #[serde(default)]
    pub native_session_resume: bool,
    /// Drive this agent through a PTY instead of the protocol.
    #[serde(default)]
    pub cli_passthrough: bool,
    /// Disabled profiles refuse to launch.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Wire protocol an agent speaks under the control daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentProtocol {
    /// Structured agent protocol over the daemon's WebSocket stream.
    Acp,
    /// PTY-attached; no structured protocol.
    Passthrough,
}

crate::simple_display! {
    AgentProtocol {
        Acp => "acp",
        Passthrough => "passthrough",
    }
}

/// Registry entry for one agent CLI (from the external agent registry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: AgentId,
    pub display_name: String,
    #[serde(default)]
    pub default_model: Option<String>,
    pub command: CommandTemplate,
    /// Permission flags this CLI understands, keyed by setting name.
    #[serde(default)]
    pub permission_settings: Vec<PermissionSetting>,
    /// Present only for PTY-driven agents.
    #[serde(default)]
    pub passthrough: Option<PassthroughConfig>,
    pub runtime: RuntimeRequirements,
}

impl AgentSpec {
    /// Look up a permission setting by name.
    pub fn permission_setting(&self, name: &str) -> Option<&PermissionSetting> {
        self.permission_settings.iter().find(|s| s.name == name)
    }
}

/// CLI invocation template. Flag templates substitute `{model}`,
/// `{session_id}`, `{prompt}`, and `{value}` placeholders; `None` means
/// the CLI has no such flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub binary: String,
    #[serde(default)]
    pub base_args: Vec<String>,
    /// e.g. `--model {model}`
    #[serde(default)]
    pub model_flag: Option<String>,
    /// e.g. `--prompt {prompt}`; `None` appends the prompt positionally.
    #[serde(default)]
    pub prompt_flag: Option<String>,
    /// Continue-most-recent-conversation flag, e.g. `--continue`.
    #[serde(default)]
    pub resume_flag: Option<String>,
    /// Resume-by-id flag, e.g. `--resume {session_id}`.
    #[serde(default)]
    pub session_resume_flag: Option<String>,
}

/// How one permission setting renders onto the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSetting {
    /// Key in `ProfileInfo::permission_values`.
    pub name: String,
    /// Flag template, e.g. `--permission-mode {value}` or a bare toggle.
    pub flag: String,
    pub kind: PermissionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Included when the value is `"true"`, omitted otherwise.
    Toggle,
    /// Always included with `{value}` substituted.
    Value,
}

/// PTY-mode configuration for agents that cannot speak the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughConfig {
    /// Regex matched against terminal output to detect the prompt-ready
    /// state (turn boundary).
    pub prompt_ready_pattern: String,
    /// Output silence after which the turn is considered stalled.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Cap on the rolling output buffer used for pattern matching.
    #[serde(default = "default_buffer_cap")]
    pub buffer_cap_bytes: usize,
    /// Output must stay quiet this long after a pattern match before the
    /// turn is declared over.
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,
    /// Delay process start until a terminal WebSocket is attached.
    #[serde(default)]
    pub wait_for_terminal: bool,
}

fn default_idle_timeout_ms() -> u64 {
    120_000
}

fn default_buffer_cap() -> usize {
    256 * 1024
}

fn default_stability_window_ms() -> u64 {
    500
}

/// Runtime requirements for an agent under the control daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeRequirements {
    pub protocol: AgentProtocol,
    /// Container image for the docker backend.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub image_tag: Option<String>,
    /// Env var names resolved through the credential store at launch.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Agent supports `session/load` natively.
    #[serde(default)]
    pub native_session_resume: bool,
    /// Inject rendered session history into the first prompt after a
    /// resume (for agents without native session loading).
    #[serde(default)]
    pub history_context_injection: bool,
    /// Mount templates; `{workspace}` and `{home}` expand at create time.
    #[serde(default)]
    pub mounts: Vec<MountTemplate>,
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub cpu_cores: Option<f64>,
    /// MCP servers passed to `session/new`.
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

/// One bind mount, templated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTemplate {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

/// MCP server reference handed to the agent at session creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
