// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle error taxonomy.
//!
//! Recoverable conditions are retried internally (transient uploads,
//! the single prompt-reconnect retry) and never reach callers on
//! success. Everything here is a caller-visible outcome.

use kandev_core::id::SessionId;
use kandev_core::status::ExecutionStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Lookup by id or session missed.
    #[error("execution not found: {0}")]
    NotFound(String),

    /// A live execution already exists for the session.
    #[error("session {0} already has an execution")]
    SessionOccupied(SessionId),

    /// Prompt attempted outside Running/Ready.
    #[error("execution is {status}, not ready for prompts")]
    NotReady { status: ExecutionStatus },

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },

    /// Backend not registered (possibly after fallback refusal) or its
    /// lazy initialization failed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The control daemon stopped answering within its budget.
    #[error("control daemon unreachable: {0}")]
    DaemonUnreachable(String),

    /// `initialize` or `session/*` failed non-recoverably.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Agent subprocess (or passthrough PTY) did not start.
    #[error("agent start failed: {0}")]
    StartFailed(String),

    /// Prompt dispatch failed twice, or the turn completed with an error.
    #[error("prompt failed: {0}")]
    PromptFailed(String),

    /// Execution exists but its daemon client was never attached.
    #[error("execution not configured: {0}")]
    NotConfigured(String),

    #[error("unknown agent or profile: {0}")]
    AgentUnknown(String),

    #[error("agent profile is disabled: {0}")]
    AgentDisabled(String),

    #[error("workspace preparation failed: {0}")]
    WorkspaceFailed(String),

    /// Caller or shutdown cancellation.
    #[error("cancelled")]
    Cancelled,

    /// Accumulated per-task errors from a worker-pool fan-out.
    #[error("{} operations failed", .0.len())]
    Joined(Vec<LifecycleError>),
}

impl LifecycleError {
    /// Flatten a fan-out result: empty → Ok, one error → itself,
    /// several → `Joined`.
    pub fn join(mut errors: Vec<LifecycleError>) -> Result<(), LifecycleError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(LifecycleError::Joined(errors)),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
