// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: public lifecycle API, state machine, and recovery.
//!
//! `Launch` creates the control daemon and registers the execution;
//! `StartAgentProcess` configures and starts the agent under it and
//! drives the handshake (or hands off to the passthrough subsystem);
//! `PromptAgent` runs one turn. Recovery re-attaches daemons that
//! survived an orchestrator restart. Long waits derive from the
//! manager's shutdown channel so process shutdown aborts them without
//! touching other callers.

use crate::execution::{Execution, TurnOutcome};
use crate::external::{AgentRegistry, ControlClientFactory, EventBus, ProfileStore, WorktreeManager};
use crate::passthrough::PassthroughSubsystem;
use crate::publisher::EventPublisher;
use crate::session::SessionManager;
use crate::store::ExecutionStore;
use crate::streams::StreamManager;
use crate::worktree::WorkspacePreparer;
use crate::LifecycleError;
use indexmap::IndexMap;
use kandev_backends::{BackendError, CreateInstanceSpec, ExecutorBackend, ExecutorRegistry};
use kandev_core::clock::Clock;
use kandev_core::command::{build_command, build_continue_command, CommandOptions};
use kandev_core::history::SessionHistory;
use kandev_core::id::{ExecutionId, ProfileId, SessionId};
use kandev_core::launch::{metadata_keys, ExecutorKind, LaunchRequest};
use kandev_core::profile::{AgentSpec, ProfileInfo};
use kandev_core::status::ExecutionStatus;
use kandev_wire::{ConfigureAgentRequest, PermissionResponse, PromptAttachment};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// What to do when the requested backend is not registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Refuse the launch.
    Deny,
    /// Substitute standalone, loudly.
    #[default]
    Warn,
    /// Substitute standalone silently.
    Allow,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub fallback_policy: FallbackPolicy,
    pub daemon_ready_timeout: Duration,
    pub daemon_ready_poll: Duration,
    /// Cadence of the liveness sweep over registered executions.
    pub stale_probe_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            fallback_policy: FallbackPolicy::default(),
            daemon_ready_timeout: Duration::from_secs(60),
            daemon_ready_poll: Duration::from_millis(500),
            stale_probe_interval: Duration::from_secs(30),
        }
    }
}

pub struct Manager<C: Clock> {
    store: Arc<ExecutionStore>,
    registry: Arc<ExecutorRegistry>,
    profiles: Arc<dyn ProfileStore>,
    agents: Arc<dyn AgentRegistry>,
    clients: Arc<dyn ControlClientFactory>,
    preparer: WorkspacePreparer,
    publisher: Arc<EventPublisher<C>>,
    sessions: Arc<SessionManager<C>>,
    streams: Arc<StreamManager<C>>,
    passthrough: Arc<PassthroughSubsystem<C>>,
    clock: C,
    config: ManagerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl<C: Clock> Manager<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        profiles: Arc<dyn ProfileStore>,
        agents: Arc<dyn AgentRegistry>,
        clients: Arc<dyn ControlClientFactory>,
        bus: Arc<dyn EventBus>,
        worktrees: Option<Arc<dyn WorktreeManager>>,
        clock: C,
        config: ManagerConfig,
    ) -> Arc<Self> {
        let publisher = Arc::new(EventPublisher::new(bus, clock.clone()));
        let history = Arc::new(SessionHistory::new());
        let sessions = Arc::new(SessionManager::new(publisher.clone(), history, clock.clone()));
        let streams = Arc::new(StreamManager::new(publisher.clone(), sessions.clone()));
        let passthrough = Arc::new(PassthroughSubsystem::new(
            publisher.clone(),
            sessions.clone(),
            clock.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            store: Arc::new(ExecutionStore::new()),
            registry,
            profiles,
            agents,
            clients,
            preparer: WorkspacePreparer::new(worktrees),
            publisher,
            sessions,
            streams,
            passthrough,
            clock,
            config,
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    pub fn passthrough(&self) -> &Arc<PassthroughSubsystem<C>> {
        &self.passthrough
    }

    pub fn get_execution(&self, id: &ExecutionId) -> Option<Arc<Execution>> {
        self.store.get(id)
    }

    pub fn executions(&self) -> Vec<Arc<Execution>> {
        self.store.all()
    }

    // ── recovery ───────────────────────────────────────────────────

    /// Health-check backends, re-attach daemons that survived an
    /// orchestrator restart, and begin the stale-execution sweep.
    pub async fn start(self: &Arc<Self>) {
        self.spawn_stale_probe();
        for (name, result) in self.registry.health_check_all().await {
            match result {
                Ok(()) => tracing::info!(backend = %name, "backend healthy"),
                Err(e) => tracing::warn!(backend = %name, error = %e, "backend unhealthy"),
            }
        }

        for instance in self.registry.recover_all().await {
            let Some(session_id) = instance.metadata.get(metadata_keys::SESSION_ID).cloned()
            else {
                tracing::warn!(
                    instance_id = %instance.instance_id,
                    "recovered instance has no session metadata; skipping"
                );
                continue;
            };
            let task_id = instance.metadata.get("task_id").cloned().unwrap_or_default();
            let profile_id = instance.metadata.get("profile_id").cloned().unwrap_or_default();
            let agent_id = instance.metadata.get("agent_id").cloned().unwrap_or_default();
            let description = instance
                .metadata
                .get(metadata_keys::TASK_DESCRIPTION)
                .cloned()
                .unwrap_or_default();

            let request = LaunchRequest::new(task_id, session_id, profile_id, description);
            let execution = Execution::new(
                ExecutionId::generate(),
                &request,
                agent_id.into(),
                instance,
                self.clock.epoch_ms(),
            );
            let _ = execution.transition(ExecutionStatus::Running);
            execution.set_client(self.clients.client_for(&execution.instance));

            if let Err(e) = self.store.insert(execution.clone()) {
                tracing::warn!(
                    session_id = %execution.session_id,
                    error = %e,
                    "skipping recovered instance"
                );
                continue;
            }
            tracing::info!(
                execution_id = %execution.id,
                session_id = %execution.session_id,
                "recovered execution"
            );

            // Reconnect after the settle delay, then report Ready.
            let streams = self.streams.clone();
            let sessions = self.sessions.clone();
            tokio::spawn(async move {
                match streams.reconnect_all(&execution).await {
                    Ok(()) => sessions.mark_ready(&execution),
                    Err(e) => tracing::warn!(
                        execution_id = %execution.id,
                        error = %e,
                        "stream reconnect after recovery failed"
                    ),
                }
            });
        }
    }

    /// Periodic liveness sweep: an execution whose daemon stops
    /// answering two consecutive probes is failed and unregistered.
    fn spawn_stale_probe(self: &Arc<Self>) {
        let manager = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.stale_probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for execution in manager.store.all() {
                            if execution.status().is_terminal() {
                                continue;
                            }
                            let Some(client) = execution.client() else { continue };
                            if client.health().await.is_ok() {
                                continue;
                            }
                            // Confirm before acting on a single blip.
                            if client.health().await.is_ok() {
                                continue;
                            }
                            tracing::warn!(
                                execution_id = %execution.id,
                                session_id = %execution.session_id,
                                "daemon stopped answering; failing stale execution"
                            );
                            execution.set_failed(
                                "control daemon unreachable",
                                manager.clock.epoch_ms(),
                            );
                            manager.publisher.agent_failed(&execution);
                            manager
                                .cleanup_stale_execution_by_session_id(&execution.session_id);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    // ── launch ─────────────────────────────────────────────────────

    /// Create the daemon and register the execution. Daemon readiness is
    /// awaited asynchronously; `agentctl:ready` follows on the bus.
    pub async fn launch(
        self: &Arc<Self>,
        request: LaunchRequest,
    ) -> Result<Arc<Execution>, LifecycleError> {
        self.check_session_free(&request.session_id).await?;

        let (profile, spec) = self.resolve_agent(&request.profile_id).await?;
        let prepared = self.preparer.prepare(&request).await?;
        let backend = self.select_backend(request.executor)?;

        let mut env = request.env.clone();
        let model = request
            .model_override
            .clone()
            .or_else(|| profile.model.clone())
            .or_else(|| spec.default_model.clone());
        if let Some(model) = &model {
            env.insert("AGENT_MODEL".to_string(), model.clone());
        }
        if profile.auto_approve {
            env.insert(
                "AGENTCTL_AUTO_APPROVE_PERMISSIONS".to_string(),
                "true".to_string(),
            );
        }

        // Preparation metadata first; explicit request keys win.
        let mut metadata = prepared.metadata;
        for (key, value) in &request.metadata {
            metadata.insert(key.clone(), value.clone());
        }
        let mut request = request;
        request.metadata = metadata.clone();
        request.workspace_path = Some(prepared.path.clone());

        let execution_id = ExecutionId::generate();
        let create_spec = CreateInstanceSpec {
            execution_id: execution_id.clone(),
            task_id: request.task_id.clone(),
            session_id: request.session_id.clone(),
            profile_id: request.profile_id.clone(),
            agent_spec: spec.clone(),
            workspace_path: prepared.path,
            env,
            metadata,
        };
        let instance = backend
            .create_instance(&create_spec)
            .await
            .map_err(|e| match e {
                BackendError::Unavailable(m) => LifecycleError::BackendUnavailable(m),
                other => LifecycleError::BackendUnavailable(other.to_string()),
            })?;

        let execution = Execution::new(
            execution_id,
            &request,
            spec.id.clone(),
            instance,
            self.clock.epoch_ms(),
        );
        let client = self.clients.client_for(&execution.instance);
        execution.set_client(client.clone());

        if let Err(occupied) = self.store.insert(execution.clone()) {
            // Lost the check/insert race; don't leak the daemon.
            let backend = backend.clone();
            let instance = execution.instance.clone();
            tokio::spawn(async move {
                let _ = backend.stop_instance(&instance, true).await;
            });
            return Err(occupied);
        }

        tracing::info!(
            execution_id = %execution.id,
            session_id = %execution.session_id,
            backend = %execution.backend_name,
            "execution launched"
        );
        self.publisher.agent_started(&execution);
        self.publisher.daemon_starting(&execution);

        self.spawn_daemon_ready_waiter(execution.clone());
        Ok(execution)
    }

    /// Occupancy check with lazy stale cleanup: terminal leftovers and
    /// provably-dead daemons make way, live ones refuse the launch.
    async fn check_session_free(&self, session_id: &SessionId) -> Result<(), LifecycleError> {
        let Some(existing) = self.store.get_by_session(session_id) else {
            return Ok(());
        };
        if existing.status().is_terminal() {
            tracing::info!(
                session_id = %session_id,
                execution_id = %existing.id,
                "clearing terminal execution for relaunch"
            );
            self.cleanup_stale_execution_by_session_id(session_id);
            return Ok(());
        }
        let dead = match existing.client() {
            Some(client) => client.health().await.is_err(),
            None => true,
        };
        if dead {
            tracing::warn!(
                session_id = %session_id,
                execution_id = %existing.id,
                "existing execution's daemon is unreachable; cleaning up"
            );
            self.cleanup_stale_execution_by_session_id(session_id);
            return Ok(());
        }
        Err(LifecycleError::SessionOccupied(session_id.clone()))
    }

    /// Wait for the daemon's health endpoint, detached from the caller
    /// but bound to manager shutdown.
    fn spawn_daemon_ready_waiter(self: &Arc<Self>, execution: Arc<Execution>) {
        let manager = self.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let deadline =
                tokio::time::Instant::now() + manager.config.daemon_ready_timeout;
            loop {
                if *shutdown.borrow() {
                    return;
                }
                let Some(client) = execution.client() else { return };
                if client.health().await.is_ok() {
                    manager.publisher.daemon_ready(&execution);
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    let message = format!(
                        "daemon at {} not ready within {:?}",
                        execution.instance.address(),
                        manager.config.daemon_ready_timeout
                    );
                    tracing::warn!(execution_id = %execution.id, %message, "daemon never became ready");
                    execution.set_failed(&message, manager.clock.epoch_ms());
                    manager.publisher.daemon_error(&execution, &message);
                    manager.publisher.agent_failed(&execution);
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(manager.config.daemon_ready_poll) => {}
                    _ = shutdown.changed() => {}
                }
            }
        });
    }

    // ── agent process ──────────────────────────────────────────────

    /// Configure and start the agent subprocess, then run the protocol
    /// handshake. Passthrough profiles go to the PTY subsystem instead.
    pub async fn start_agent_process(
        self: &Arc<Self>,
        id: &ExecutionId,
    ) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let (profile, spec) = self.resolve_agent(&execution.profile_id).await?;

        if profile.cli_passthrough {
            return self.start_passthrough(&execution, &profile, &spec).await;
        }

        let client = execution
            .client()
            .ok_or_else(|| LifecycleError::NotConfigured(execution.id.to_string()))?;
        client
            .health()
            .await
            .map_err(|e| LifecycleError::DaemonUnreachable(e.to_string()))?;

        let options = self.command_options(&execution, &profile, &spec, None);
        let argv = build_command(&spec, &options);
        let continue_command = build_continue_command(&spec, &options);
        execution.with_protocol(|p| {
            p.agent_command = argv.clone();
            p.continue_command = continue_command.clone();
        });

        client
            .configure_agent(ConfigureAgentRequest {
                command: argv,
                env: IndexMap::new(),
                approval_policy: approval_policy(&profile),
                continue_command,
            })
            .await
            .map_err(|e| LifecycleError::StartFailed(format!("configure: {e}")))?;
        let started = client
            .start_agent()
            .await
            .map_err(|e| LifecycleError::StartFailed(format!("start: {e}")))?;
        tracing::info!(
            execution_id = %execution.id,
            full_command = %started.full_command,
            "agent process started"
        );

        execution.transition(ExecutionStatus::Running)?;

        if let Err(e) = self
            .sessions
            .run_handshake(&execution, &spec, &self.streams)
            .await
        {
            execution.set_failed(e.to_string(), self.clock.epoch_ms());
            self.publisher.agent_failed(&execution);
            return Err(e);
        }

        self.spawn_initial_prompt(&execution);
        Ok(())
    }

    async fn start_passthrough(
        self: &Arc<Self>,
        execution: &Arc<Execution>,
        profile: &ProfileInfo,
        spec: &AgentSpec,
    ) -> Result<(), LifecycleError> {
        let backend = self
            .registry
            .get(&execution.backend_name)
            .ok_or_else(|| LifecycleError::BackendUnavailable(execution.backend_name.clone()))?;
        let runner = backend.interactive_runner().ok_or_else(|| {
            LifecycleError::StartFailed(format!(
                "backend {} has no interactive runner",
                execution.backend_name
            ))
        })?;

        let metadata = execution.metadata();
        let resume = execution.with_protocol(|p| p.needs_resume_context);
        let initial_prompt = if resume {
            None
        } else {
            metadata.get(metadata_keys::TASK_DESCRIPTION).cloned()
        };

        let mut env = IndexMap::new();
        env.insert(
            "KANDEV_INSTANCE_ID".to_string(),
            execution.instance.instance_id.to_string(),
        );
        env.insert("KANDEV_TASK_ID".to_string(), execution.task_id.to_string());
        env.insert(
            "KANDEV_SESSION_ID".to_string(),
            execution.session_id.to_string(),
        );
        env.insert(
            "KANDEV_AGENT_PROFILE_ID".to_string(),
            execution.profile_id.to_string(),
        );
        if let Some(description) = metadata.get(metadata_keys::TASK_DESCRIPTION) {
            env.insert("TASK_DESCRIPTION".to_string(), description.clone());
        }

        execution.transition(ExecutionStatus::Running)?;
        self.passthrough
            .start(execution, spec, profile, runner, initial_prompt, resume, env)
            .await?;

        // Shell/git/file events still flow, protocol or not.
        if let Err(e) = self.streams.connect_workspace(execution) {
            tracing::warn!(execution_id = %execution.id, error = %e, "workspace stream unavailable");
        }
        Ok(())
    }

    /// Kick off the first turn with the task description, detached.
    fn spawn_initial_prompt(self: &Arc<Self>, execution: &Arc<Execution>) {
        let resume = execution.with_protocol(|p| p.needs_resume_context);
        if resume {
            return;
        }
        let Some(description) = execution
            .metadata()
            .get(metadata_keys::TASK_DESCRIPTION)
            .cloned()
        else {
            return;
        };
        if description.is_empty() {
            return;
        }

        let manager = self.clone();
        let id = execution.id.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.prompt_agent(&id, &description, Vec::new()).await {
                tracing::warn!(execution_id = %id, error = %e, "initial prompt failed");
            }
        });
    }

    // ── prompt ─────────────────────────────────────────────────────

    pub async fn prompt_agent(
        self: &Arc<Self>,
        id: &ExecutionId,
        prompt: &str,
        attachments: Vec<PromptAttachment>,
    ) -> Result<TurnOutcome, LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let status = execution.status();
        if !status.can_prompt() {
            return Err(LifecycleError::NotReady { status });
        }
        execution.transition(ExecutionStatus::Running)?;

        let (_, spec) = self.resolve_agent(&execution.profile_id).await?;
        self.sessions
            .prompt(
                &execution,
                &spec,
                &self.streams,
                prompt,
                attachments,
                self.shutdown_tx.subscribe(),
            )
            .await
    }

    // ── restart ────────────────────────────────────────────────────

    /// Stop, reconfigure, and restart the agent process with a fresh
    /// protocol session. Publishes `agent:context_reset` only when the
    /// whole sequence succeeds.
    pub async fn restart_agent_process(
        self: &Arc<Self>,
        id: &ExecutionId,
    ) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let (profile, spec) = self.resolve_agent(&execution.profile_id).await?;
        let client = execution
            .client()
            .ok_or_else(|| LifecycleError::NotConfigured(execution.id.to_string()))?;

        if let Err(e) = client.stop(false).await {
            tracing::warn!(
                execution_id = %execution.id,
                error = %e,
                "agent stop before restart failed; continuing"
            );
        }

        execution.reset_protocol_session();
        execution.turn.drain();
        execution.with_buffers(|b| b.clear());

        let options = self.command_options(&execution, &profile, &spec, None);
        let argv = build_command(&spec, &options);
        let continue_command = build_continue_command(&spec, &options);
        execution.with_protocol(|p| {
            p.agent_command = argv.clone();
            p.continue_command = continue_command.clone();
        });

        let configured = async {
            client
                .configure_agent(ConfigureAgentRequest {
                    command: argv,
                    env: IndexMap::new(),
                    approval_policy: approval_policy(&profile),
                    continue_command,
                })
                .await
                .map_err(|e| LifecycleError::StartFailed(format!("configure: {e}")))?;
            client
                .start_agent()
                .await
                .map_err(|e| LifecycleError::StartFailed(format!("start: {e}")))?;
            Ok::<(), LifecycleError>(())
        }
        .await;
        if let Err(e) = configured {
            execution.set_failed(e.to_string(), self.clock.epoch_ms());
            self.publisher.agent_failed(&execution);
            return Err(e);
        }

        let _ = execution.transition(ExecutionStatus::Running);

        match self
            .sessions
            .run_handshake(&execution, &spec, &self.streams)
            .await
        {
            Ok(()) => {
                self.sessions.mark_ready(&execution);
                self.publisher.context_reset(&execution);
                Ok(())
            }
            Err(e) => {
                execution.set_failed(e.to_string(), self.clock.epoch_ms());
                self.publisher.agent_failed(&execution);
                Err(LifecycleError::HandshakeFailed(e.to_string()))
            }
        }
    }

    // ── stop & cleanup ─────────────────────────────────────────────

    /// Best-effort stop: control-plane stop, then backend stop
    /// (graceful, or kill when forced). Unknown ids are a no-op.
    pub async fn stop_agent(&self, id: &ExecutionId, force: bool) -> Result<(), LifecycleError> {
        let Some(execution) = self.store.get(id) else {
            return Ok(());
        };

        if let Some(client) = execution.client() {
            if let Err(e) = client.stop(force).await {
                tracing::debug!(execution_id = %execution.id, error = %e, "control-plane stop failed");
            }
        }
        let is_passthrough = execution.with_protocol(|p| p.passthrough_pid.is_some());
        if is_passthrough {
            self.passthrough.kill(&execution.id, force);
        }
        if let Some(backend) = self.registry.get(&execution.backend_name) {
            if let Err(e) = backend.stop_instance(&execution.instance, force).await {
                tracing::warn!(execution_id = %execution.id, error = %e, "backend stop failed");
            }
        }

        execution.set_finished(ExecutionStatus::Stopped, None, self.clock.epoch_ms());
        self.publisher.agent_stopped(&execution);
        execution.detach_streams();
        self.passthrough.forget(&execution.id);
        self.store.remove(&execution.id);
        tracing::info!(execution_id = %execution.id, "execution stopped");
        Ok(())
    }

    /// Concurrent stop of every live execution; errors are joined.
    pub async fn stop_all_agents(self: &Arc<Self>, force: bool) -> Result<(), LifecycleError> {
        let mut set = JoinSet::new();
        for execution in self.store.all() {
            let manager = self.clone();
            set.spawn(async move { manager.stop_agent(&execution.id, force).await });
        }
        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(LifecycleError::StartFailed(format!("stop task: {e}"))),
            }
        }
        LifecycleError::join(errors)
    }

    /// Drop a stale execution's registration and handles. Idempotent.
    pub fn cleanup_stale_execution_by_session_id(&self, session_id: &SessionId) {
        if let Some(execution) = self.store.remove_by_session(session_id) {
            execution.detach_streams();
            execution.clear_client();
            self.passthrough.forget(&execution.id);
            tracing::info!(
                execution_id = %execution.id,
                session_id = %session_id,
                "stale execution cleaned up"
            );
        }
    }

    // ── status transitions ─────────────────────────────────────────

    pub fn mark_completed(&self, id: &ExecutionId) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        execution.transition(ExecutionStatus::Completed)?;
        execution.set_finished(ExecutionStatus::Completed, None, self.clock.epoch_ms());
        self.publisher.agent_completed(&execution);
        Ok(())
    }

    pub fn mark_ready(&self, id: &ExecutionId) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        self.sessions.mark_ready(&execution);
        Ok(())
    }

    pub fn update_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let previous = execution.transition(status)?;
        if previous == status {
            return Ok(());
        }
        match status {
            ExecutionStatus::Ready => self.publisher.agent_ready(&execution),
            ExecutionStatus::Completed => {
                execution.set_finished(status, None, self.clock.epoch_ms());
                self.publisher.agent_completed(&execution);
            }
            ExecutionStatus::Failed => {
                execution.set_finished(status, None, self.clock.epoch_ms());
                self.publisher.agent_failed(&execution);
            }
            ExecutionStatus::Stopped => {
                execution.set_finished(status, None, self.clock.epoch_ms());
                self.publisher.agent_stopped(&execution);
            }
            ExecutionStatus::Created | ExecutionStatus::Running => {}
        }
        Ok(())
    }

    // ── permissions ────────────────────────────────────────────────

    pub async fn respond_permission(
        &self,
        id: &ExecutionId,
        response: PermissionResponse,
    ) -> Result<(), LifecycleError> {
        let execution = self
            .store
            .get(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let client = execution
            .client()
            .ok_or_else(|| LifecycleError::NotConfigured(execution.id.to_string()))?;
        client
            .respond_permission(response)
            .await
            .map_err(|e| LifecycleError::DaemonUnreachable(e.to_string()))
    }

    // ── shutdown ───────────────────────────────────────────────────

    /// Flip the shutdown channel (aborting detached waits) and close
    /// resource-holding backends.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.registry.close_all().await;
    }

    // ── helpers ────────────────────────────────────────────────────

    async fn resolve_agent(
        &self,
        profile_id: &ProfileId,
    ) -> Result<(ProfileInfo, AgentSpec), LifecycleError> {
        let profile = self
            .profiles
            .resolve(profile_id)
            .await
            .ok_or_else(|| LifecycleError::AgentUnknown(profile_id.to_string()))?;
        if !profile.enabled {
            return Err(LifecycleError::AgentDisabled(profile_id.to_string()));
        }
        let spec = self
            .agents
            .get(&profile.agent_id)
            .await
            .ok_or_else(|| LifecycleError::AgentUnknown(profile.agent_id.to_string()))?;
        Ok((profile, spec))
    }

    fn command_options(
        &self,
        execution: &Arc<Execution>,
        profile: &ProfileInfo,
        spec: &AgentSpec,
        model_override: Option<String>,
    ) -> CommandOptions {
        CommandOptions {
            model: model_override
                .or_else(|| profile.model.clone())
                .or_else(|| spec.default_model.clone()),
            session_id: execution.protocol_session_id(),
            auto_approve: profile.auto_approve,
            permission_values: profile.permission_values.clone(),
        }
    }

    /// Map the requested executor to a registered backend, applying the
    /// fallback policy on a miss.
    fn select_backend(
        &self,
        kind: ExecutorKind,
    ) -> Result<Arc<dyn ExecutorBackend>, LifecycleError> {
        let name = kind.backend_name();
        if let Some(backend) = self.registry.get(name) {
            return Ok(backend);
        }
        let fallback = || {
            self.registry.get("standalone").ok_or_else(|| {
                LifecycleError::BackendUnavailable(format!(
                    "backend {name} not registered and no standalone fallback"
                ))
            })
        };
        match self.config.fallback_policy {
            FallbackPolicy::Deny => Err(LifecycleError::BackendUnavailable(format!(
                "backend {name} not registered"
            ))),
            FallbackPolicy::Warn => {
                tracing::warn!(requested = name, "backend missing; substituting standalone");
                fallback()
            }
            FallbackPolicy::Allow => fallback(),
        }
    }
}

fn approval_policy(profile: &ProfileInfo) -> String {
    let policy = if profile.auto_approve { "auto" } else { "prompt" };
    policy.to_string()
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
