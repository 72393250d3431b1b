// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-execution stream wiring.
//!
//! The agent-event stream is connected once per lifecycle and its events
//! feed a single ingest task (serial per execution). Permission and
//! workspace streams reconnect with exponential backoff, capped at five
//! attempts. `reconnect_all` settles briefly, best-effort confirms
//! daemon health, then reconnects everything.

use crate::execution::Execution;
use crate::publisher::EventPublisher;
use crate::session::SessionManager;
use crate::LifecycleError;
use kandev_agentctl::ControlClient;
use kandev_core::clock::Clock;
use kandev_core::event::StreamPayload;
use kandev_wire::PermissionStreamEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const RECONNECT_SETTLE: Duration = Duration::from_millis(500);
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_ATTEMPTS: u32 = 5;

pub struct StreamManager<C: Clock> {
    publisher: Arc<EventPublisher<C>>,
    sessions: Arc<SessionManager<C>>,
}

impl<C: Clock> StreamManager<C> {
    pub fn new(publisher: Arc<EventPublisher<C>>, sessions: Arc<SessionManager<C>>) -> Self {
        Self { publisher, sessions }
    }

    /// Connect all three streams. Returns once the agent-event stream
    /// has completed its WebSocket upgrade; the side streams keep
    /// retrying in the background.
    pub async fn connect_all(&self, execution: &Arc<Execution>) -> Result<(), LifecycleError> {
        let client = execution
            .client()
            .ok_or_else(|| LifecycleError::NotConfigured(execution.id.to_string()))?;

        let agent_stream_live = execution
            .agent_stream()
            .map(|s| s.is_connected())
            .unwrap_or(false);
        if !agent_stream_live {
            let stream = client
                .open_agent_stream()
                .await
                .map_err(|e| LifecycleError::DaemonUnreachable(format!("agent stream: {e}")))?;
            let stream = Arc::new(stream);
            let events = stream.take_events().ok_or_else(|| {
                LifecycleError::DaemonUnreachable("agent stream events already taken".into())
            })?;
            execution.set_agent_stream(stream);

            // Replace any prior ingest task before starting the new one.
            execution.with_streams(|s| {
                if let Some(old) = s.ingest.take() {
                    old.abort();
                }
            });
            let sessions = self.sessions.clone();
            let ingest_execution = execution.clone();
            let handle = tokio::spawn(async move {
                let mut events = events;
                while let Some(event) = events.recv().await {
                    sessions.handle_agent_event(&ingest_execution, event);
                }
                tracing::info!(execution_id = %ingest_execution.id, "agent event stream ended");
            });
            execution.with_streams(|s| s.ingest = Some(handle.abort_handle()));
        }

        self.spawn_permission_stream(execution, client.clone());
        self.spawn_workspace_stream(execution, client);
        Ok(())
    }

    /// Connect only the workspace stream (passthrough executions have no
    /// protocol streams to open).
    pub fn connect_workspace(&self, execution: &Arc<Execution>) -> Result<(), LifecycleError> {
        let client = execution
            .client()
            .ok_or_else(|| LifecycleError::NotConfigured(execution.id.to_string()))?;
        self.spawn_workspace_stream(execution, client);
        Ok(())
    }

    /// Settle, best-effort health confirm, then reconnect everything.
    pub async fn reconnect_all(&self, execution: &Arc<Execution>) -> Result<(), LifecycleError> {
        tokio::time::sleep(RECONNECT_SETTLE).await;
        if let Some(client) = execution.client() {
            if let Err(e) = client.health().await {
                tracing::warn!(
                    execution_id = %execution.id,
                    error = %e,
                    "daemon health probe failed before reconnect"
                );
            }
        }
        self.connect_all(execution).await
    }

    fn spawn_permission_stream(&self, execution: &Arc<Execution>, client: Arc<dyn ControlClient>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        execution.with_streams(|s| {
            if let Some(old) = s.permission.replace(shutdown_tx) {
                let _ = old.send(());
            }
        });

        let publisher = self.publisher.clone();
        let execution = execution.clone();
        tokio::spawn(async move {
            let mut delay = RETRY_BASE_DELAY;
            for attempt in 1..=RETRY_MAX_ATTEMPTS {
                let stream = tokio::select! {
                    result = client.open_permission_stream() => match result {
                        Ok(stream) => Some(stream),
                        Err(e) => {
                            tracing::warn!(
                                execution_id = %execution.id,
                                attempt,
                                error = %e,
                                "permission stream connect failed"
                            );
                            None
                        }
                    },
                    _ = &mut shutdown_rx => return,
                };

                if let Some(mut stream) = stream {
                    loop {
                        tokio::select! {
                            event = stream.next() => match event {
                                Some(PermissionStreamEvent::PermissionRequested {
                                    id, tool_call_id, title, options,
                                }) => {
                                    publisher.stream(
                                        &execution.session_id,
                                        StreamPayload::PermissionRequest {
                                            id, tool_call_id, title, options,
                                        },
                                    );
                                }
                                Some(PermissionStreamEvent::PermissionResolved { id, option_id }) => {
                                    tracing::debug!(
                                        execution_id = %execution.id,
                                        %id,
                                        %option_id,
                                        "permission resolved"
                                    );
                                }
                                None => break, // dropped; fall through to retry
                            },
                            _ = &mut shutdown_rx => return,
                        }
                    }
                }

                if attempt == RETRY_MAX_ATTEMPTS {
                    tracing::warn!(execution_id = %execution.id, "permission stream gave up");
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut shutdown_rx => return,
                }
                delay *= 2;
            }
        });
    }

    fn spawn_workspace_stream(&self, execution: &Arc<Execution>, client: Arc<dyn ControlClient>) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        execution.with_streams(|s| {
            if let Some(old) = s.workspace.replace(shutdown_tx) {
                let _ = old.send(());
            }
        });

        let publisher = self.publisher.clone();
        let execution = execution.clone();
        tokio::spawn(async move {
            let mut delay = RETRY_BASE_DELAY;
            for attempt in 1..=RETRY_MAX_ATTEMPTS {
                let stream = tokio::select! {
                    result = client.open_workspace_stream() => match result {
                        Ok(stream) => Some(stream),
                        Err(e) => {
                            tracing::warn!(
                                execution_id = %execution.id,
                                attempt,
                                error = %e,
                                "workspace stream connect failed"
                            );
                            None
                        }
                    },
                    _ = &mut shutdown_rx => return,
                };

                if let Some(mut stream) = stream {
                    loop {
                        tokio::select! {
                            event = stream.next() => match event {
                                Some(event) => {
                                    publisher.workspace_event(&execution.session_id, event);
                                }
                                None => break,
                            },
                            _ = &mut shutdown_rx => return,
                        }
                    }
                }

                if attempt == RETRY_MAX_ATTEMPTS {
                    tracing::warn!(execution_id = %execution.id, "workspace stream gave up");
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut shutdown_rx => return,
                }
                delay *= 2;
            }
        });
    }
}

#[cfg(test)]
#[path = "streams_tests.rs"]
mod tests;
