// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Translates core state changes and daemon stream events into bus
//! events. Payload schemas are closed; the raw stream unions never
//! reach subscribers.

use crate::execution::Execution;
use crate::external::EventBus;
use kandev_core::clock::Clock;
use kandev_core::event::{Event, StreamPayload};
use kandev_core::id::SessionId;
use kandev_wire::WorkspaceStreamEvent;
use std::sync::Arc;

pub struct EventPublisher<C: Clock> {
    bus: Arc<dyn EventBus>,
    clock: C,
}

impl<C: Clock> EventPublisher<C> {
    pub fn new(bus: Arc<dyn EventBus>, clock: C) -> Self {
        Self { bus, clock }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.epoch_ms()
    }

    pub fn publish(&self, event: Event) {
        tracing::debug!(topic = %event.topic(), "{}", event.log_summary());
        self.bus.publish(&event.topic(), &event);
    }

    // ── agent lifecycle ────────────────────────────────────────────

    pub fn agent_started(&self, execution: &Execution) {
        let payload = execution.snapshot(self.now_ms());
        self.publish(Event::AgentStarted { payload });
    }

    pub fn agent_ready(&self, execution: &Execution) {
        let payload = execution.snapshot(self.now_ms());
        self.publish(Event::AgentReady { payload });
    }

    pub fn agent_completed(&self, execution: &Execution) {
        let payload = execution.snapshot(self.now_ms());
        self.publish(Event::AgentCompleted { payload });
    }

    pub fn agent_failed(&self, execution: &Execution) {
        let payload = execution.snapshot(self.now_ms());
        self.publish(Event::AgentFailed { payload });
    }

    pub fn agent_stopped(&self, execution: &Execution) {
        let payload = execution.snapshot(self.now_ms());
        self.publish(Event::AgentStopped { payload });
    }

    // ── daemon lifecycle ───────────────────────────────────────────

    pub fn daemon_starting(&self, execution: &Execution) {
        self.publish(Event::DaemonStarting {
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            timestamp_ms: self.now_ms(),
        });
    }

    pub fn daemon_ready(&self, execution: &Execution) {
        self.publish(Event::DaemonReady {
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            timestamp_ms: self.now_ms(),
        });
    }

    pub fn daemon_error(&self, execution: &Execution, message: impl Into<String>) {
        self.publish(Event::DaemonError {
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            message: message.into(),
            timestamp_ms: self.now_ms(),
        });
    }

    // ── protocol session ───────────────────────────────────────────

    pub fn session_created(&self, execution: &Execution, protocol_session_id: &str) {
        self.publish(Event::AcpSessionCreated {
            session_id: execution.session_id.clone(),
            protocol_session_id: protocol_session_id.to_string(),
            timestamp_ms: self.now_ms(),
        });
    }

    pub fn context_reset(&self, execution: &Execution) {
        self.publish(Event::AgentContextReset {
            execution_id: execution.id.clone(),
            session_id: execution.session_id.clone(),
            timestamp_ms: self.now_ms(),
        });
    }

    // ── streams ────────────────────────────────────────────────────

    pub fn stream(&self, session_id: &SessionId, payload: StreamPayload) {
        self.publish(Event::AgentStream {
            session_id: session_id.clone(),
            timestamp_ms: self.now_ms(),
            payload,
        });
    }

    /// Normalize a workspace stream event onto the bus.
    pub fn workspace_event(&self, session_id: &SessionId, event: WorkspaceStreamEvent) {
        let session_id = session_id.clone();
        let timestamp_ms = self.now_ms();
        let event = match event {
            WorkspaceStreamEvent::ShellOutput { data, stderr } => Event::ShellOutput {
                session_id,
                timestamp_ms,
                data,
                stderr,
            },
            WorkspaceStreamEvent::ShellExit { exit_code } => Event::ShellExit {
                session_id,
                timestamp_ms,
                exit_code,
            },
            WorkspaceStreamEvent::ProcessOutput { data } => Event::ProcessOutput {
                session_id,
                timestamp_ms,
                data,
            },
            WorkspaceStreamEvent::ProcessStatus { running, exit_code } => Event::ProcessStatus {
                session_id,
                timestamp_ms,
                running,
                exit_code,
            },
            WorkspaceStreamEvent::GitStatus { branch, changed_files } => Event::GitStatus {
                session_id,
                timestamp_ms,
                branch,
                changed_files,
            },
            WorkspaceStreamEvent::GitCommit { commit_id, message } => Event::GitCommit {
                session_id,
                timestamp_ms,
                commit_id,
                message,
            },
            WorkspaceStreamEvent::GitReset { target } => Event::GitReset {
                session_id,
                timestamp_ms,
                target,
            },
            WorkspaceStreamEvent::GitSnapshot { snapshot_id } => Event::GitSnapshot {
                session_id,
                timestamp_ms,
                snapshot_id,
            },
            WorkspaceStreamEvent::FileChange { paths } => Event::FileChange {
                session_id,
                timestamp_ms,
                paths,
            },
        };
        self.publish(event);
    }
}

#[cfg(test)]
#[path = "publisher_tests.rs"]
mod tests;
