// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The execution entity: one (session, agent, workspace) trio.
//!
//! Mutable substate is partitioned by concern behind independent locks —
//! status, daemon client, streaming buffers, stream handles, slash
//! commands, protocol state, metadata — so event ingest never contends
//! with stream wiring or status reads. No lock is held across an await.

use crate::LifecycleError;
use kandev_agentctl::{AgentStream, ControlClient};
use kandev_backends::ExecutorInstance;
use indexmap::IndexMap;
use kandev_core::event::LifecyclePayload;
use kandev_core::id::{AgentId, ExecutionId, ProfileId, SessionId, TaskId};
use kandev_core::launch::LaunchRequest;
use kandev_core::status::ExecutionStatus;
use kandev_core::turn::{CompletionSlot, MessageBuffers, SlashCommand};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Result of one prompt round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub stop_reason: String,
    /// Final buffered text when the turn never streamed; empty otherwise.
    pub message: String,
}

#[derive(Debug)]
struct StatusState {
    status: ExecutionStatus,
    finished_at_ms: Option<u64>,
    exit_code: Option<i32>,
    error_message: Option<String>,
}

/// Protocol-session and process bookkeeping.
#[derive(Debug, Default)]
pub struct ProtocolState {
    /// Agent-assigned session id; assigned once per execution and only
    /// re-assigned after an explicit context reset clears it.
    pub protocol_session_id: Option<String>,
    pub agent_command: Vec<String>,
    pub continue_command: Option<Vec<String>>,
    pub passthrough_pid: Option<u32>,
    pub needs_resume_context: bool,
    pub resume_context_injected: bool,
    pub agent_name: Option<String>,
    pub agent_version: Option<String>,
}

/// Shutdown handles for the per-execution stream tasks.
#[derive(Default)]
pub struct StreamHandles {
    pub permission: Option<oneshot::Sender<()>>,
    pub workspace: Option<oneshot::Sender<()>>,
    pub ingest: Option<AbortHandle>,
}

/// One live execution.
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub session_id: SessionId,
    pub profile_id: ProfileId,
    pub agent_id: AgentId,
    pub backend_name: String,
    pub workspace_path: PathBuf,
    pub started_at_ms: u64,
    pub instance: ExecutorInstance,

    status: Mutex<StatusState>,
    client: Mutex<Option<Arc<dyn ControlClient>>>,
    agent_stream: Mutex<Option<Arc<AgentStream>>>,
    buffers: Mutex<MessageBuffers>,
    commands: Mutex<Vec<SlashCommand>>,
    protocol: Mutex<ProtocolState>,
    streams: Mutex<StreamHandles>,
    metadata: Mutex<IndexMap<String, String>>,

    /// Capacity-1 turn-completion signal; never blocks the ingest task.
    pub turn: CompletionSlot,
}

impl Execution {
    pub fn new(
        id: ExecutionId,
        request: &LaunchRequest,
        agent_id: AgentId,
        instance: ExecutorInstance,
        now_ms: u64,
    ) -> Arc<Self> {
        let mut metadata = request.metadata.clone();
        for (key, value) in &instance.metadata {
            metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let protocol = ProtocolState {
            protocol_session_id: request.protocol_session_id.clone(),
            needs_resume_context: request.protocol_session_id.is_some(),
            ..ProtocolState::default()
        };

        Arc::new(Self {
            id,
            task_id: request.task_id.clone(),
            session_id: request.session_id.clone(),
            profile_id: request.profile_id.clone(),
            agent_id,
            backend_name: instance.backend_name.clone(),
            workspace_path: instance.workspace_path.clone(),
            started_at_ms: now_ms,
            instance,
            status: Mutex::new(StatusState {
                status: ExecutionStatus::Created,
                finished_at_ms: None,
                exit_code: None,
                error_message: None,
            }),
            client: Mutex::new(None),
            agent_stream: Mutex::new(None),
            buffers: Mutex::new(MessageBuffers {
                last_activity_ms: now_ms,
                ..MessageBuffers::default()
            }),
            commands: Mutex::new(Vec::new()),
            protocol: Mutex::new(protocol),
            streams: Mutex::new(StreamHandles::default()),
            metadata: Mutex::new(metadata),
            turn: CompletionSlot::new(),
        })
    }

    // ── status ─────────────────────────────────────────────────────

    pub fn status(&self) -> ExecutionStatus {
        self.status.lock().status
    }

    /// Transition to `to`, enforcing the state machine. Returns the
    /// previous status.
    pub fn transition(&self, to: ExecutionStatus) -> Result<ExecutionStatus, LifecycleError> {
        let mut state = self.status.lock();
        let from = state.status;
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        state.status = to;
        Ok(from)
    }

    pub fn set_failed(&self, message: impl Into<String>, now_ms: u64) {
        let mut state = self.status.lock();
        state.status = ExecutionStatus::Failed;
        state.error_message = Some(message.into());
        state.finished_at_ms = Some(now_ms);
    }

    pub fn set_finished(&self, status: ExecutionStatus, exit_code: Option<i32>, now_ms: u64) {
        let mut state = self.status.lock();
        state.status = status;
        state.exit_code = exit_code;
        state.finished_at_ms = Some(now_ms);
    }

    pub fn error_message(&self) -> Option<String> {
        self.status.lock().error_message.clone()
    }

    /// Lifecycle payload for bus events.
    pub fn snapshot(&self, timestamp_ms: u64) -> LifecyclePayload {
        let state = self.status.lock();
        LifecyclePayload {
            execution_id: self.id.clone(),
            task_id: self.task_id.clone(),
            session_id: self.session_id.clone(),
            profile_id: self.profile_id.clone(),
            container_id: self.instance.container_id().map(str::to_string),
            status: state.status,
            started_at_ms: self.started_at_ms,
            finished_at_ms: state.finished_at_ms,
            exit_code: state.exit_code,
            error_message: state.error_message.clone(),
            timestamp_ms,
        }
    }

    // ── daemon client ──────────────────────────────────────────────

    pub fn client(&self) -> Option<Arc<dyn ControlClient>> {
        self.client.lock().clone()
    }

    pub fn set_client(&self, client: Arc<dyn ControlClient>) {
        *self.client.lock() = Some(client);
    }

    pub fn clear_client(&self) {
        *self.client.lock() = None;
    }

    // ── agent stream ───────────────────────────────────────────────

    pub fn agent_stream(&self) -> Option<Arc<AgentStream>> {
        self.agent_stream.lock().clone()
    }

    pub fn set_agent_stream(&self, stream: Arc<AgentStream>) {
        *self.agent_stream.lock() = Some(stream);
    }

    pub fn clear_agent_stream(&self) {
        *self.agent_stream.lock() = None;
    }

    // ── message buffers ────────────────────────────────────────────

    pub fn with_buffers<R>(&self, f: impl FnOnce(&mut MessageBuffers) -> R) -> R {
        f(&mut self.buffers.lock())
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.buffers.lock().last_activity_ms
    }

    // ── slash commands ─────────────────────────────────────────────

    pub fn set_commands(&self, commands: Vec<SlashCommand>) {
        *self.commands.lock() = commands;
    }

    pub fn commands(&self) -> Vec<SlashCommand> {
        self.commands.lock().clone()
    }

    // ── protocol state ─────────────────────────────────────────────

    pub fn with_protocol<R>(&self, f: impl FnOnce(&mut ProtocolState) -> R) -> R {
        f(&mut self.protocol.lock())
    }

    pub fn protocol_session_id(&self) -> Option<String> {
        self.protocol.lock().protocol_session_id.clone()
    }

    /// Record the agent-assigned session id.
    ///
    /// Assigned once per handshake; replacing a live id only happens when
    /// a resume hint fell back to `session/new`, and is logged.
    pub fn assign_protocol_session(&self, id: impl Into<String>) {
        let id = id.into();
        let mut protocol = self.protocol.lock();
        if let Some(existing) = &protocol.protocol_session_id {
            if *existing != id {
                tracing::info!(
                    execution_id = %self.id,
                    previous = %existing,
                    assigned = %id,
                    "protocol session replaced"
                );
            }
        }
        protocol.protocol_session_id = Some(id);
    }

    /// Drop protocol session state ahead of a context reset.
    pub fn reset_protocol_session(&self) {
        let mut protocol = self.protocol.lock();
        protocol.protocol_session_id = None;
        protocol.needs_resume_context = false;
        protocol.resume_context_injected = false;
    }

    // ── stream handles ─────────────────────────────────────────────

    pub fn with_streams<R>(&self, f: impl FnOnce(&mut StreamHandles) -> R) -> R {
        f(&mut self.streams.lock())
    }

    /// Tear down stream tasks: abort ingest, signal the side streams.
    pub fn detach_streams(&self) {
        let handles = {
            let mut streams = self.streams.lock();
            std::mem::take(&mut *streams)
        };
        if let Some(tx) = handles.permission {
            let _ = tx.send(());
        }
        if let Some(tx) = handles.workspace {
            let _ = tx.send(());
        }
        if let Some(ingest) = handles.ingest {
            ingest.abort();
        }
        self.clear_agent_stream();
    }

    // ── metadata ───────────────────────────────────────────────────

    pub fn metadata(&self) -> IndexMap<String, String> {
        self.metadata.lock().clone()
    }

    pub fn update_metadata(&self, updater: impl FnOnce(&mut IndexMap<String, String>)) {
        updater(&mut self.metadata.lock());
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("backend", &self.backend_name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "execution_tests.rs"]
mod tests;
