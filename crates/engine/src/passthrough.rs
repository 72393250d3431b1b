// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Passthrough subsystem: PTY-driven agents.
//!
//! Agents that cannot speak the structured protocol run attached to a
//! pseudo-terminal. Turn boundaries come from a prompt-ready regex over
//! a rolling output window, debounced by a stability window. If the
//! process exits while a terminal is still attached, it is restarted
//! with the resume command and the terminal keeps streaming.

use crate::execution::Execution;
use crate::publisher::EventPublisher;
use crate::session::SessionManager;
use crate::LifecycleError;
use indexmap::IndexMap;
use kandev_backends::{InteractiveRunner, PtyProcess, PtySpec};
use kandev_core::clock::Clock;
use kandev_core::command::{build_passthrough_command, PassthroughOptions};
use kandev_core::id::ExecutionId;
use kandev_core::profile::{AgentSpec, PassthroughConfig, ProfileInfo};
use kandev_core::status::ExecutionStatus;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

const RESTART_CLEANUP_WAIT: Duration = Duration::from_millis(100);
const RESTART_NOTICE_WAIT: Duration = Duration::from_millis(500);
const TERMINAL_WAIT_BUDGET: Duration = Duration::from_secs(60);
const TERMINAL_WAIT_POLL: Duration = Duration::from_millis(100);
const BROADCAST_CAPACITY: usize = 256;

const RESTART_NOTICE: &[u8] = b"\x1b[33m[Agent exited. Restarting...]\x1b[0m\r\n";

struct TerminalState {
    broadcast: broadcast::Sender<Vec<u8>>,
    attached: AtomicUsize,
    process: Mutex<Option<Arc<PtyProcess>>>,
}

/// One attached terminal. Dropping it detaches.
pub struct TerminalHandle {
    state: Arc<TerminalState>,
    pub output: broadcast::Receiver<Vec<u8>>,
}

impl TerminalHandle {
    /// Forward user keystrokes to the agent's PTY.
    pub async fn write(&self, bytes: &[u8]) -> Result<(), LifecycleError> {
        let process = self.state.process.lock().clone();
        match process {
            Some(process) => process
                .write(bytes)
                .await
                .map_err(|e| LifecycleError::StartFailed(format!("terminal write: {e}"))),
            None => Err(LifecycleError::StartFailed("no passthrough process".into())),
        }
    }
}

impl Drop for TerminalHandle {
    fn drop(&mut self) {
        self.state.attached.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct PassthroughSubsystem<C: Clock> {
    publisher: Arc<EventPublisher<C>>,
    sessions: Arc<SessionManager<C>>,
    clock: C,
    terminals: Mutex<HashMap<ExecutionId, Arc<TerminalState>>>,
}

impl<C: Clock> PassthroughSubsystem<C> {
    pub fn new(publisher: Arc<EventPublisher<C>>, sessions: Arc<SessionManager<C>>, clock: C) -> Self {
        Self {
            publisher,
            sessions,
            clock,
            terminals: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a terminal to a running passthrough execution.
    pub fn attach_terminal(&self, execution_id: &ExecutionId) -> Option<TerminalHandle> {
        let state = self.terminals.lock().get(execution_id).cloned()?;
        state.attached.fetch_add(1, Ordering::SeqCst);
        Some(TerminalHandle {
            output: state.broadcast.subscribe(),
            state,
        })
    }

    /// Signal the passthrough process; SIGKILL when forced.
    pub fn kill(&self, execution_id: &ExecutionId, force: bool) {
        let process = {
            let terminals = self.terminals.lock();
            terminals
                .get(execution_id)
                .and_then(|state| state.process.lock().clone())
        };
        if let Some(process) = process {
            process.signal(force);
        }
    }

    /// Drop terminal state for a finished execution.
    pub fn forget(&self, execution_id: &ExecutionId) {
        self.terminals.lock().remove(execution_id);
    }

    fn terminal_state(&self, execution_id: &ExecutionId) -> Arc<TerminalState> {
        let mut terminals = self.terminals.lock();
        terminals
            .entry(execution_id.clone())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
                Arc::new(TerminalState {
                    broadcast: tx,
                    attached: AtomicUsize::new(0),
                    process: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Start a passthrough agent on the backend's PTY runner.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        &self,
        execution: &Arc<Execution>,
        spec: &AgentSpec,
        profile: &ProfileInfo,
        runner: Arc<dyn InteractiveRunner>,
        initial_prompt: Option<String>,
        resume: bool,
        env: IndexMap<String, String>,
    ) -> Result<(), LifecycleError> {
        let config = spec.passthrough.clone().ok_or_else(|| {
            LifecycleError::StartFailed(format!("agent {} has no passthrough config", spec.id))
        })?;
        let pattern = Regex::new(&config.prompt_ready_pattern).map_err(|e| {
            LifecycleError::StartFailed(format!("bad prompt-ready pattern: {e}"))
        })?;

        let model = profile
            .model
            .clone()
            .or_else(|| spec.default_model.clone());
        let mut options = PassthroughOptions {
            model: model.clone(),
            session_id: execution.protocol_session_id(),
            prompt: initial_prompt,
            resume,
            auto_approve: profile.auto_approve,
            permission_values: profile.permission_values.clone(),
        };
        let argv = build_passthrough_command(spec, &options);
        // The restart path always resumes, never re-sends the prompt.
        options.resume = true;
        options.prompt = None;
        let restart_argv = build_passthrough_command(spec, &options);

        execution.with_protocol(|p| p.agent_command = argv.clone());

        let state = self.terminal_state(&execution.id);
        if config.wait_for_terminal {
            self.wait_for_terminal(&state, &execution.id).await;
        }

        let process = Arc::new(
            runner
                .start(PtySpec {
                    argv,
                    cwd: execution.workspace_path.clone(),
                    env: env.clone(),
                })
                .await
                .map_err(|e| LifecycleError::StartFailed(e.to_string()))?,
        );
        execution.with_protocol(|p| p.passthrough_pid = Some(process.pid()));
        *state.process.lock() = Some(process.clone());

        self.publisher.daemon_ready(execution);

        let output = process.take_output().ok_or_else(|| {
            LifecycleError::StartFailed("pty output unavailable".into())
        })?;

        let monitor = Monitor {
            publisher: self.publisher.clone(),
            sessions: self.sessions.clone(),
            clock: self.clock.clone(),
            execution: execution.clone(),
            state,
            runner,
            restart_argv,
            env,
            config,
            pattern,
        };
        tokio::spawn(monitor.run(process, output));
        Ok(())
    }

    async fn wait_for_terminal(&self, state: &Arc<TerminalState>, execution_id: &ExecutionId) {
        let deadline = Instant::now() + TERMINAL_WAIT_BUDGET;
        while state.attached.load(Ordering::SeqCst) == 0 {
            if Instant::now() >= deadline {
                tracing::warn!(
                    %execution_id,
                    "no terminal attached within budget; starting anyway"
                );
                return;
            }
            tokio::time::sleep(TERMINAL_WAIT_POLL).await;
        }
    }
}

/// Per-process monitor: output fan-out, turn detection, auto-restart.
struct Monitor<C: Clock> {
    publisher: Arc<EventPublisher<C>>,
    sessions: Arc<SessionManager<C>>,
    clock: C,
    execution: Arc<Execution>,
    state: Arc<TerminalState>,
    runner: Arc<dyn InteractiveRunner>,
    restart_argv: Vec<String>,
    env: IndexMap<String, String>,
    config: PassthroughConfig,
    pattern: Regex,
}

impl<C: Clock> Monitor<C> {
    async fn run(self, mut process: Arc<PtyProcess>, mut output: mpsc::Receiver<Vec<u8>>) {
        let mut window = String::new();
        let mut stability_deadline: Option<Instant> = None;

        loop {
            // Capture a copy of the deadline; the arms below reassign it.
            let stability = async move {
                match stability_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                chunk = output.recv() => match chunk {
                    Some(bytes) => {
                        let _ = self.state.broadcast.send(bytes.clone());
                        self.execution.with_buffers(|b| {
                            b.last_activity_ms = self.clock.epoch_ms();
                        });

                        window.push_str(&String::from_utf8_lossy(&bytes));
                        if window.len() > self.config.buffer_cap_bytes {
                            let cut = window.len() - self.config.buffer_cap_bytes;
                            // Cut on a char boundary at or past the overflow.
                            let cut = (cut..window.len())
                                .find(|i| window.is_char_boundary(*i))
                                .unwrap_or(0);
                            window.drain(..cut);
                        }

                        stability_deadline = if self.pattern.is_match(&window) {
                            Some(Instant::now()
                                + Duration::from_millis(self.config.stability_window_ms))
                        } else {
                            None
                        };
                    }
                    None => {
                        let exit_code = process.wait().await;
                        match self.try_restart(exit_code).await {
                            Some((new_process, new_output)) => {
                                process = new_process;
                                output = new_output;
                                window.clear();
                                stability_deadline = None;
                            }
                            None => return,
                        }
                    }
                },
                _ = stability => {
                    stability_deadline = None;
                    // Output settled on the prompt: the turn is over.
                    window.clear();
                    self.sessions.mark_ready(&self.execution);
                }
            }
        }
    }

    /// Restart with the resume command when a terminal is still
    /// attached; otherwise finish the execution.
    async fn try_restart(
        &self,
        exit_code: Option<i32>,
    ) -> Option<(Arc<PtyProcess>, mpsc::Receiver<Vec<u8>>)> {
        if self.state.attached.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(RESTART_CLEANUP_WAIT).await;
            let _ = self.state.broadcast.send(RESTART_NOTICE.to_vec());
            tokio::time::sleep(RESTART_NOTICE_WAIT).await;

            // The terminal may have detached while we waited.
            if self.state.attached.load(Ordering::SeqCst) > 0 {
                match self
                    .runner
                    .start(PtySpec {
                        argv: self.restart_argv.clone(),
                        cwd: self.execution.workspace_path.clone(),
                        env: self.env.clone(),
                    })
                    .await
                {
                    Ok(new_process) => {
                        let new_process = Arc::new(new_process);
                        let output = new_process.take_output();
                        self.execution
                            .with_protocol(|p| p.passthrough_pid = Some(new_process.pid()));
                        *self.state.process.lock() = Some(new_process.clone());
                        tracing::info!(
                            execution_id = %self.execution.id,
                            pid = new_process.pid(),
                            "passthrough agent restarted"
                        );
                        if let Some(output) = output {
                            return Some((new_process, output));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            execution_id = %self.execution.id,
                            error = %e,
                            "passthrough restart failed"
                        );
                    }
                }
            }
        }

        // No restart: settle the execution.
        let now = self.clock.epoch_ms();
        *self.state.process.lock() = None;
        if exit_code == Some(0) {
            self.execution
                .set_finished(ExecutionStatus::Completed, exit_code, now);
            self.publisher.agent_completed(&self.execution);
        } else {
            self.execution
                .set_finished(ExecutionStatus::Failed, exit_code, now);
            self.publisher.agent_failed(&self.execution);
        }
        None
    }
}

#[cfg(test)]
#[path = "passthrough_tests.rs"]
mod tests;
