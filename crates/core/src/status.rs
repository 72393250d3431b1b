// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution status state machine.
//!
//! `Created → Running → Ready ↔ Running → {Completed | Failed | Stopped}`.
//! `Running` means a prompt is in flight; `Ready` means the agent is idle
//! and awaiting a follow-up.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution registered; daemon not yet confirmed ready.
    Created,
    /// A prompt is in flight (or the agent is starting up).
    Running,
    /// Agent is idle and awaiting a follow-up prompt.
    Ready,
    /// Agent finished its work and was marked completed.
    Completed,
    /// Execution failed; `error_message` is populated.
    Failed,
    /// Execution was stopped by the caller.
    Stopped,
}

crate::simple_display! {
    ExecutionStatus {
        Created => "created",
        Running => "running",
        Ready => "ready",
        Completed => "completed",
        Failed => "failed",
        Stopped => "stopped",
    }
}

impl ExecutionStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// A prompt may only be dispatched while Running or Ready.
    pub fn can_prompt(&self) -> bool {
        matches!(self, Self::Running | Self::Ready)
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Same-state transitions for Running and Ready are legal: Running
    /// re-entry happens when a follow-up prompt is dispatched from a
    /// still-running turn boundary, and Ready re-entry absorbs duplicate
    /// `complete` deliveries.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (Created, Running) | (Created, Failed) | (Created, Stopped) => true,
            (Running, Running | Ready | Completed | Failed | Stopped) => true,
            (Ready, Running | Ready | Completed | Failed | Stopped) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
