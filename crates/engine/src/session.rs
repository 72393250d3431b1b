// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol handshake, prompt round-trip, and agent event handling.
//!
//! Streaming identity discipline: chunks append to the same message
//! bubble via `current_message_id` / `current_thinking_id`; both ids
//! clear on every flush (tool call or completion) so the next chunk
//! starts a new message. Events are processed serially per execution on
//! a single ingest task.

use crate::execution::{Execution, TurnOutcome};
use crate::publisher::EventPublisher;
use crate::streams::StreamManager;
use crate::LifecycleError;
use kandev_agentctl::ControlError;
use kandev_core::clock::Clock;
use kandev_core::event::StreamPayload;
use kandev_core::history::{system_preamble, SessionHistory};
use kandev_core::profile::AgentSpec;
use kandev_core::status::ExecutionStatus;
use kandev_core::turn::TurnCompletion;
use kandev_wire::{
    Action, AgentStreamEvent, InitializeRequest, InitializeResponse, PromptAttachment,
    PromptRequest, SessionLoadRequest, SessionNewRequest, SessionNewResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(10);
const PROMPT_TIMEOUT: Duration = Duration::from_secs(600);
const STALL_TICK: Duration = Duration::from_secs(30);
const STALL_THRESHOLD_MS: u64 = 5 * 60 * 1000;

pub struct SessionManager<C: Clock> {
    publisher: Arc<EventPublisher<C>>,
    history: Arc<SessionHistory>,
    clock: C,
    client_name: String,
    client_version: String,
}

impl<C: Clock> SessionManager<C> {
    pub fn new(publisher: Arc<EventPublisher<C>>, history: Arc<SessionHistory>, clock: C) -> Self {
        Self {
            publisher,
            history,
            clock,
            client_name: "kandev".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn history(&self) -> &Arc<SessionHistory> {
        &self.history
    }

    // ── handshake ──────────────────────────────────────────────────

    /// Open streams, initialize the agent, and establish a protocol
    /// session (native `session/load` when possible, else `session/new`).
    pub async fn run_handshake(
        &self,
        execution: &Arc<Execution>,
        spec: &AgentSpec,
        streams: &StreamManager<C>,
    ) -> Result<(), LifecycleError> {
        tokio::time::timeout(STREAM_READY_TIMEOUT, streams.connect_all(execution))
            .await
            .map_err(|_| {
                LifecycleError::DaemonUnreachable("agent stream not ready within 10s".into())
            })??;

        let stream = execution.agent_stream().ok_or_else(|| {
            LifecycleError::DaemonUnreachable("agent stream missing after connect".into())
        })?;

        let init: InitializeResponse = stream
            .request(
                Action::Initialize,
                &InitializeRequest {
                    client_name: self.client_name.clone(),
                    client_version: self.client_version.clone(),
                },
                HANDSHAKE_STEP_TIMEOUT,
            )
            .await
            .map_err(|e| LifecycleError::HandshakeFailed(format!("initialize: {e}")))?;
        tracing::info!(
            execution_id = %execution.id,
            agent = %init.agent_name,
            version = %init.agent_version,
            "agent initialized"
        );
        execution.with_protocol(|p| {
            p.agent_name = Some(init.agent_name.clone());
            p.agent_version = Some(init.agent_version.clone());
        });

        // Native resume: only with a known session id and a capable agent.
        if spec.runtime.native_session_resume && init.capabilities.load_session {
            if let Some(session_id) = execution.protocol_session_id() {
                match stream
                    .request::<_, serde_json::Value>(
                        Action::SessionLoad,
                        &SessionLoadRequest { session_id: session_id.clone() },
                        HANDSHAKE_STEP_TIMEOUT,
                    )
                    .await
                {
                    Ok(_) => {
                        tracing::info!(
                            execution_id = %execution.id,
                            protocol_session_id = %session_id,
                            "resumed protocol session"
                        );
                        self.publisher.session_created(execution, &session_id);
                        return Ok(());
                    }
                    // Not fatal: demote to session/new.
                    Err(ControlError::MethodNotFound) => {
                        tracing::info!(
                            execution_id = %execution.id,
                            "agent lacks session/load, creating a new session"
                        );
                    }
                    Err(e) => {
                        return Err(LifecycleError::HandshakeFailed(format!("session/load: {e}")))
                    }
                }
            }
        }

        let created: SessionNewResponse = stream
            .request(
                Action::SessionNew,
                &SessionNewRequest {
                    workspace_path: execution.workspace_path.clone(),
                    mcp_servers: spec.runtime.mcp_servers.clone(),
                },
                HANDSHAKE_STEP_TIMEOUT,
            )
            .await
            .map_err(|e| LifecycleError::HandshakeFailed(format!("session/new: {e}")))?;
        execution.assign_protocol_session(&created.session_id);
        self.publisher.session_created(execution, &created.session_id);
        Ok(())
    }

    // ── prompt round-trip ──────────────────────────────────────────

    /// Dispatch a prompt and wait for its completion signal.
    ///
    /// The stall ticker only logs; cancellation comes from the caller
    /// dropping the future or the shutdown channel flipping.
    pub async fn prompt(
        &self,
        execution: &Arc<Execution>,
        spec: &AgentSpec,
        streams: &StreamManager<C>,
        prompt: &str,
        attachments: Vec<PromptAttachment>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<TurnOutcome, LifecycleError> {
        execution.turn.drain();
        let now = self.clock.epoch_ms();
        execution.with_buffers(|b| {
            b.clear();
            b.last_activity_ms = now;
        });

        if spec.runtime.history_context_injection {
            self.history.record_prompt(&execution.session_id, prompt);
        }
        let effective = self.effective_prompt(execution, spec, prompt);

        let session_id = execution.protocol_session_id().ok_or_else(|| {
            LifecycleError::PromptFailed("no protocol session established".into())
        })?;
        let request = PromptRequest {
            session_id,
            prompt: effective,
            attachments,
        };

        self.dispatch_prompt(execution, streams, &request).await?;
        self.wait_for_completion(execution, shutdown).await
    }

    /// Fire the prompt; on a disconnected stream, reconnect and retry
    /// exactly once.
    async fn dispatch_prompt(
        &self,
        execution: &Arc<Execution>,
        streams: &StreamManager<C>,
        request: &PromptRequest,
    ) -> Result<(), LifecycleError> {
        let first = match execution.agent_stream() {
            Some(stream) => {
                stream
                    .request_ack(Action::Prompt, request, HANDSHAKE_STEP_TIMEOUT)
                    .await
            }
            None => Err(ControlError::StreamNotConnected),
        };

        match first {
            Ok(()) => Ok(()),
            Err(e) if e.is_stream_disconnect() => {
                tracing::warn!(
                    execution_id = %execution.id,
                    "prompt hit a disconnected stream; reconnecting once"
                );
                streams
                    .reconnect_all(execution)
                    .await
                    .map_err(|e| LifecycleError::PromptFailed(format!("reconnect: {e}")))?;
                let stream = execution.agent_stream().ok_or_else(|| {
                    LifecycleError::PromptFailed("stream unavailable after reconnect".into())
                })?;
                stream
                    .request_ack(Action::Prompt, request, HANDSHAKE_STEP_TIMEOUT)
                    .await
                    .map_err(|e| LifecycleError::PromptFailed(format!("retry failed: {e}")))
            }
            Err(e) => Err(LifecycleError::PromptFailed(e.to_string())),
        }
    }

    async fn wait_for_completion(
        &self,
        execution: &Arc<Execution>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<TurnOutcome, LifecycleError> {
        let deadline = tokio::time::sleep(PROMPT_TIMEOUT);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(STALL_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let shutdown_fired = wait_for_shutdown(shutdown);
        tokio::pin!(shutdown_fired);

        loop {
            tokio::select! {
                completion = execution.turn.wait() => {
                    if completion.is_error {
                        let message = completion
                            .error
                            .unwrap_or_else(|| "agent reported an error".to_string());
                        return Err(LifecycleError::PromptFailed(message));
                    }
                    return Ok(TurnOutcome {
                        stop_reason: completion.stop_reason,
                        message: completion.message,
                    });
                }
                _ = &mut deadline => {
                    return Err(LifecycleError::PromptFailed("prompt timed out".into()));
                }
                _ = ticker.tick() => {
                    let idle_ms = self
                        .clock
                        .epoch_ms()
                        .saturating_sub(execution.last_activity_ms());
                    // Log only; the user decides whether to cancel.
                    if idle_ms >= STALL_THRESHOLD_MS {
                        tracing::warn!(
                            execution_id = %execution.id,
                            idle_secs = idle_ms / 1000,
                            "prompt stalled: no agent events past threshold"
                        );
                    }
                }
                _ = &mut shutdown_fired => {
                    return Err(LifecycleError::Cancelled);
                }
            }
        }
    }

    // ── resume-context injection ───────────────────────────────────

    /// Transform the first prompt after a resume for agents without
    /// native session loading. Native resume wins when both are enabled.
    fn effective_prompt(&self, execution: &Arc<Execution>, spec: &AgentSpec, prompt: &str) -> String {
        if !spec.runtime.history_context_injection || spec.runtime.native_session_resume {
            return prompt.to_string();
        }
        let wants_injection = execution.with_protocol(|p| {
            p.needs_resume_context && !p.resume_context_injected
        });
        if !wants_injection {
            return prompt.to_string();
        }
        let Some(rendered) = self.history.render(&execution.session_id) else {
            return prompt.to_string();
        };
        execution.with_protocol(|p| p.resume_context_injected = true);
        format!(
            "{}{}\n{}",
            system_preamble(&execution.task_id, &execution.session_id),
            rendered,
            prompt
        )
    }

    // ── event handling ─────────────────────────────────────────────

    /// Apply one agent stream event. Must be called serially per
    /// execution; every event advances `last_activity_ms`.
    pub fn handle_agent_event(&self, execution: &Arc<Execution>, event: AgentStreamEvent) {
        let now = self.clock.epoch_ms();
        match event {
            AgentStreamEvent::MessageChunk { text } => {
                self.handle_text(execution, text, false, now);
            }
            AgentStreamEvent::Reasoning { text } => {
                self.handle_text(execution, text, true, now);
            }
            AgentStreamEvent::ToolCall { id, name, title } => {
                self.flush_buffers(execution, now);
                self.publisher.stream(
                    &execution.session_id,
                    StreamPayload::ToolCall { id, name, title },
                );
            }
            AgentStreamEvent::ToolUpdate { id, status } => {
                execution.with_buffers(|b| b.last_activity_ms = now);
                if status.is_settled() {
                    execution.update_metadata(|m| {
                        let settled = m
                            .get("tool_calls_settled")
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(0);
                        m.insert("tool_calls_settled".to_string(), (settled + 1).to_string());
                    });
                }
                self.publisher
                    .stream(&execution.session_id, StreamPayload::ToolUpdate { id, status });
            }
            AgentStreamEvent::Complete { stop_reason, error } => {
                self.handle_complete(execution, stop_reason, error, now);
            }
            AgentStreamEvent::AvailableCommands { commands } => {
                execution.with_buffers(|b| b.last_activity_ms = now);
                execution.set_commands(commands.clone());
                self.publisher.stream(
                    &execution.session_id,
                    StreamPayload::AvailableCommands { commands },
                );
            }
            AgentStreamEvent::ContextWindow { used_tokens, max_tokens } => {
                execution.with_buffers(|b| b.last_activity_ms = now);
                self.publisher.stream(
                    &execution.session_id,
                    StreamPayload::ContextWindow { used_tokens, max_tokens },
                );
            }
            AgentStreamEvent::SessionStatus { status } => {
                execution.with_buffers(|b| b.last_activity_ms = now);
                self.publisher
                    .stream(&execution.session_id, StreamPayload::SessionStatus { status });
            }
        }
    }

    /// Buffer a text chunk; emit one streaming event when it crosses a
    /// line boundary, reusing the current message id for appends.
    fn handle_text(&self, execution: &Arc<Execution>, text: String, thinking: bool, now: u64) {
        let emit = execution.with_buffers(|b| {
            b.last_activity_ms = now;
            let (buffer, id) = if thinking {
                (&mut b.thinking, &mut b.current_thinking_id)
            } else {
                (&mut b.message, &mut b.current_message_id)
            };
            buffer.push_str(&text);
            if !text.contains('\n') {
                return None;
            }
            let is_append = !id.is_empty();
            if !is_append {
                *id = new_stream_id();
            }
            Some((id.clone(), std::mem::take(buffer), is_append))
        });
        if let Some((message_id, text, is_append)) = emit {
            self.publisher.stream(
                &execution.session_id,
                StreamPayload::MessageStreaming { message_id, text, is_append, thinking },
            );
        }
    }

    /// Emit any buffered leftovers as streaming events and clear both
    /// streaming ids.
    fn flush_buffers(&self, execution: &Arc<Execution>, now: u64) {
        let emits = execution.with_buffers(|b| {
            b.last_activity_ms = now;
            let mut out = Vec::new();
            if !b.message.is_empty() {
                let is_append = !b.current_message_id.is_empty();
                let id = if is_append {
                    b.current_message_id.clone()
                } else {
                    new_stream_id()
                };
                out.push((id, std::mem::take(&mut b.message), is_append, false));
            }
            if !b.thinking.is_empty() {
                let is_append = !b.current_thinking_id.is_empty();
                let id = if is_append {
                    b.current_thinking_id.clone()
                } else {
                    new_stream_id()
                };
                out.push((id, std::mem::take(&mut b.thinking), is_append, true));
            }
            b.clear_stream_ids();
            out
        });
        for (message_id, text, is_append, thinking) in emits {
            self.publisher.stream(
                &execution.session_id,
                StreamPayload::MessageStreaming { message_id, text, is_append, thinking },
            );
        }
    }

    fn handle_complete(
        &self,
        execution: &Arc<Execution>,
        stop_reason: Option<String>,
        error: Option<String>,
        now: u64,
    ) {
        // Flush: a streamed message emits its tail as an append; a turn
        // that never streamed carries its text on the complete event.
        let (text, emits) = execution.with_buffers(|b| {
            b.last_activity_ms = now;
            let mut emits = Vec::new();
            let text = if b.current_message_id.is_empty() {
                std::mem::take(&mut b.message)
            } else {
                if !b.message.is_empty() {
                    emits.push((
                        b.current_message_id.clone(),
                        std::mem::take(&mut b.message),
                        true,
                        false,
                    ));
                }
                String::new()
            };
            if !b.thinking.is_empty() {
                let is_append = !b.current_thinking_id.is_empty();
                let id = if is_append {
                    b.current_thinking_id.clone()
                } else {
                    new_stream_id()
                };
                emits.push((id, std::mem::take(&mut b.thinking), is_append, true));
            }
            b.clear_stream_ids();
            (text, emits)
        });
        for (message_id, chunk, is_append, thinking) in emits {
            self.publisher.stream(
                &execution.session_id,
                StreamPayload::MessageStreaming {
                    message_id,
                    text: chunk,
                    is_append,
                    thinking,
                },
            );
        }

        let is_error = error.is_some();
        let stop = if is_error {
            "error".to_string()
        } else {
            stop_reason.unwrap_or_else(|| "end_turn".to_string())
        };
        self.publisher.stream(
            &execution.session_id,
            StreamPayload::Complete {
                stop_reason: stop.clone(),
                text: text.clone(),
                is_error,
                error: error.clone(),
            },
        );

        let completion = match error {
            Some(message) => TurnCompletion::errored(message),
            None => TurnCompletion::finished(Some(stop)).with_message(text),
        };
        // Non-blocking by construction: the slot overwrites a pending value.
        execution.turn.signal(completion);

        self.mark_ready(execution);
    }

    /// Transition to Ready and publish, idempotently: a duplicate
    /// `complete` re-delivery performs Ready→Ready and publishes nothing.
    pub fn mark_ready(&self, execution: &Arc<Execution>) {
        match execution.transition(ExecutionStatus::Ready) {
            Ok(prev) if prev == ExecutionStatus::Ready => {}
            Ok(_) => self.publisher.agent_ready(execution),
            Err(e) => {
                tracing::warn!(execution_id = %execution.id, error = %e, "mark ready skipped");
            }
        }
    }
}

/// Resolves when the shutdown channel flips to true; pends forever if
/// the sender goes away without signalling.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn new_stream_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
