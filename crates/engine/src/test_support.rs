// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake collaborators for engine and workspace-level tests.

use crate::external::{
    AgentRegistry, ControlClientFactory, EventBus, ProfileStore, Worktree, WorktreeError,
    WorktreeManager, WorktreeRequest,
};
use crate::manager::{Manager, ManagerConfig};
use async_trait::async_trait;
use kandev_agentctl::{
    AgentStream, AgentStreamDriver, ControlClient, ControlError, EventStream,
};
use kandev_backends::{ExecutorInstance, ExecutorRegistry, FakeBackend};
use kandev_core::clock::FakeClock;
use kandev_core::event::Event;
use kandev_core::id::{AgentId, ProfileId, WorktreeId};
use kandev_core::profile::{
    AgentProtocol, AgentSpec, CommandTemplate, ProfileInfo, RuntimeRequirements,
};
use kandev_wire::{
    AgentStreamEvent, ConfigureAgentRequest, Frame, FrameKind, InitializeResponse,
    PermissionResponse, PermissionStreamEvent, PromptRequest, SessionNewResponse,
    StartAgentResponse, WorkspaceStreamEvent,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// ── event bus ──────────────────────────────────────────────────────

/// Records published events in order.
#[derive(Default)]
pub struct FakeBus {
    events: Mutex<Vec<(String, Event)>>,
}

impl FakeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(String, Event)> {
        self.events.lock().clone()
    }

    /// Names of published events, in order.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|(_, e)| e.name()).collect()
    }

    /// Poll until an event with `name` shows up.
    pub async fn wait_for(&self, name: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.event_names().iter().any(|n| *n == name) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `count` events with `name` have shown up.
    pub async fn wait_for_count(&self, name: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self
                .event_names()
                .iter()
                .filter(|n| **n == name)
                .count();
            if seen >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl EventBus for FakeBus {
    fn publish(&self, topic: &str, event: &Event) {
        self.events.lock().push((topic.to_string(), event.clone()));
    }
}

// ── profile store & agent registry ─────────────────────────────────

#[derive(Default)]
pub struct FakeProfileStore {
    profiles: Mutex<HashMap<ProfileId, ProfileInfo>>,
}

impl FakeProfileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, profile: ProfileInfo) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn resolve(&self, id: &ProfileId) -> Option<ProfileInfo> {
        self.profiles.lock().get(id).cloned()
    }
}

#[derive(Default)]
pub struct FakeAgentRegistry {
    specs: Mutex<HashMap<AgentId, AgentSpec>>,
}

impl FakeAgentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, spec: AgentSpec) {
        self.specs.lock().insert(spec.id.clone(), spec);
    }
}

#[async_trait]
impl AgentRegistry for FakeAgentRegistry {
    async fn get(&self, id: &AgentId) -> Option<AgentSpec> {
        self.specs.lock().get(id).cloned()
    }
}

// ── worktree manager ───────────────────────────────────────────────

#[derive(Default)]
pub struct FakeWorktreeManager {
    requests: Mutex<Vec<WorktreeRequest>>,
    fail_with: Mutex<Option<String>>,
}

impl FakeWorktreeManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.lock() = Some(message.into());
    }

    pub fn requests(&self) -> Vec<WorktreeRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl WorktreeManager for FakeWorktreeManager {
    async fn create(&self, request: WorktreeRequest) -> Result<Worktree, WorktreeError> {
        self.requests.lock().push(request.clone());
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(WorktreeError(message));
        }
        let id = request
            .worktree_id
            .clone()
            .unwrap_or_else(|| WorktreeId::new(format!("wt-{}", request.session_id)));
        Ok(Worktree {
            path: request.repository_path.join(format!(".worktrees/{id}")),
            branch: format!(
                "{}{}",
                request.branch_prefix.as_deref().unwrap_or("kandev/"),
                request.session_id
            ),
            id,
        })
    }
}

// ── control client ─────────────────────────────────────────────────

/// Recorded client invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCall {
    Health,
    Stop { force: bool },
    Configure,
    Start,
    OpenAgentStream,
    OpenPermissionStream,
    OpenWorkspaceStream,
    RespondPermission { id: String, option_id: String },
}

/// How the scripted daemon answers `agent.session.load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadBehavior {
    Ok,
    MethodNotFound,
    Error(String),
}

/// How the scripted daemon answers the next `agent.prompt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptBehavior {
    /// Sever the stream without replying (reconnect-and-retry path).
    Disconnect,
    Error(String),
}

/// Scripted daemon state shared between the client and its stream
/// driver tasks.
#[derive(Default)]
struct DaemonScript {
    agent_name: Mutex<Option<String>>,
    load_session_capability: Mutex<Option<bool>>,
    load_behavior: Mutex<Option<LoadBehavior>>,
    session_new_error: Mutex<Option<String>>,
    next_session_ids: Mutex<Vec<String>>,
    session_counter: Mutex<u64>,
    next_prompt_behavior: Mutex<Option<PromptBehavior>>,
    prompts: Mutex<Vec<PromptRequest>>,
    initializes: Mutex<u64>,
}

impl DaemonScript {
    fn next_session_id(&self) -> String {
        if let Some(id) = self.next_session_ids.lock().pop() {
            return id;
        }
        let mut counter = self.session_counter.lock();
        *counter += 1;
        format!("acp-{}", *counter)
    }
}

/// In-process control client with a scripted daemon on the far side.
pub struct FakeControlClient {
    addr: String,
    calls: Mutex<Vec<ClientCall>>,
    healthy: Mutex<bool>,
    stop_error: Mutex<Option<String>>,
    configure_error: Mutex<Option<String>>,
    start_error: Mutex<Option<String>>,
    configured: Mutex<Vec<ConfigureAgentRequest>>,
    script: Arc<DaemonScript>,
    // live stream handles
    event_tx: Mutex<Option<mpsc::Sender<AgentStreamEvent>>>,
    permission_tx: Mutex<Option<mpsc::Sender<PermissionStreamEvent>>>,
    workspace_tx: Mutex<Option<mpsc::Sender<WorkspaceStreamEvent>>>,
}

impl FakeControlClient {
    pub fn new(addr: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            addr: addr.into(),
            calls: Mutex::new(Vec::new()),
            healthy: Mutex::new(true),
            stop_error: Mutex::new(None),
            configure_error: Mutex::new(None),
            start_error: Mutex::new(None),
            configured: Mutex::new(Vec::new()),
            script: Arc::new(DaemonScript::default()),
            event_tx: Mutex::new(None),
            permission_tx: Mutex::new(None),
            workspace_tx: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    pub fn configured_requests(&self) -> Vec<ConfigureAgentRequest> {
        self.configured.lock().clone()
    }

    /// Prompt requests the scripted daemon received.
    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.script.prompts.lock().clone()
    }

    /// How many `agent.initialize` requests the daemon answered.
    pub fn initialize_count(&self) -> u64 {
        *self.script.initializes.lock()
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock() = healthy;
    }

    pub fn fail_stop(&self, message: impl Into<String>) {
        *self.stop_error.lock() = Some(message.into());
    }

    pub fn fail_configure(&self, message: impl Into<String>) {
        *self.configure_error.lock() = Some(message.into());
    }

    pub fn set_load_behavior(&self, behavior: LoadBehavior) {
        *self.script.load_behavior.lock() = Some(behavior);
    }

    pub fn set_load_session_capability(&self, capable: bool) {
        *self.script.load_session_capability.lock() = Some(capable);
    }

    pub fn fail_session_new(&self, message: impl Into<String>) {
        *self.script.session_new_error.lock() = Some(message.into());
    }

    /// Session ids `session/new` hands out, in order. Defaults to
    /// `acp-1`, `acp-2`, ...
    pub fn queue_session_ids(&self, ids: &[&str]) {
        let mut next = self.script.next_session_ids.lock();
        *next = ids.iter().rev().map(|s| s.to_string()).collect();
    }

    pub fn set_next_prompt_behavior(&self, behavior: PromptBehavior) {
        *self.script.next_prompt_behavior.lock() = Some(behavior);
    }

    /// Inject an agent event on the currently open stream.
    pub async fn send_event(&self, event: AgentStreamEvent) {
        let tx = self.event_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn send_permission_event(&self, event: PermissionStreamEvent) {
        let tx = self.permission_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    pub async fn send_workspace_event(&self, event: WorkspaceStreamEvent) {
        let tx = self.workspace_tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Daemon side of the agent stream: answers protocol requests per the
/// shared script.
fn spawn_script_driver(script: Arc<DaemonScript>, mut driver: AgentStreamDriver) {
    tokio::spawn(async move {
        while let Some(cmd) = driver.commands.recv().await {
            let id = cmd.frame.id;
            let respond = |data: serde_json::Value| Frame {
                id,
                action: None,
                kind: FrameKind::Response,
                data,
            };
            let error_frame = |code: &str, message: &str| Frame {
                id,
                action: None,
                kind: FrameKind::Error,
                data: serde_json::json!({"code": code, "message": message}),
            };

            match cmd.frame.action {
                Some(kandev_wire::Action::Initialize) => {
                    *script.initializes.lock() += 1;
                    let response = InitializeResponse {
                        agent_name: script
                            .agent_name
                            .lock()
                            .clone()
                            .unwrap_or_else(|| "claude".to_string()),
                        agent_version: "1.0.0".to_string(),
                        capabilities: kandev_wire::AgentCapabilities {
                            load_session: script.load_session_capability.lock().unwrap_or(true),
                        },
                    };
                    let _ = cmd.reply.send(Ok(respond(
                        serde_json::to_value(response).unwrap_or_default(),
                    )));
                }
                Some(kandev_wire::Action::SessionLoad) => {
                    let behavior = script
                        .load_behavior
                        .lock()
                        .clone()
                        .unwrap_or(LoadBehavior::Ok);
                    let frame = match behavior {
                        LoadBehavior::Ok => respond(serde_json::json!({})),
                        LoadBehavior::MethodNotFound => {
                            error_frame("method_not_found", "session/load unsupported")
                        }
                        LoadBehavior::Error(message) => error_frame("internal", &message),
                    };
                    let _ = cmd.reply.send(Ok(frame));
                }
                Some(kandev_wire::Action::SessionNew) => {
                    let frame = match script.session_new_error.lock().clone() {
                        Some(message) => error_frame("internal", &message),
                        None => respond(
                            serde_json::to_value(SessionNewResponse {
                                session_id: script.next_session_id(),
                            })
                            .unwrap_or_default(),
                        ),
                    };
                    let _ = cmd.reply.send(Ok(frame));
                }
                Some(kandev_wire::Action::Prompt) => {
                    if let Ok(request) =
                        serde_json::from_value::<PromptRequest>(cmd.frame.data.clone())
                    {
                        script.prompts.lock().push(request);
                    }
                    match script.next_prompt_behavior.lock().take() {
                        Some(PromptBehavior::Disconnect) => {
                            // Sever: drop the reply and the command
                            // channel so the stream reads as dead.
                            drop(cmd.reply);
                            return;
                        }
                        Some(PromptBehavior::Error(message)) => {
                            let _ = cmd.reply.send(Ok(error_frame("internal", &message)));
                        }
                        None => {
                            let _ = cmd.reply.send(Ok(respond(serde_json::json!({}))));
                        }
                    }
                }
                Some(kandev_wire::Action::Cancel) | None => {
                    let _ = cmd.reply.send(Ok(respond(serde_json::json!({}))));
                }
            }
        }
    });
}

#[async_trait]
impl ControlClient for FakeControlClient {
    fn address(&self) -> String {
        self.addr.clone()
    }

    async fn health(&self) -> Result<(), ControlError> {
        self.calls.lock().push(ClientCall::Health);
        if *self.healthy.lock() {
            Ok(())
        } else {
            Err(ControlError::Http("daemon down".into()))
        }
    }

    async fn stop(&self, force: bool) -> Result<(), ControlError> {
        self.calls.lock().push(ClientCall::Stop { force });
        match self.stop_error.lock().clone() {
            Some(message) => Err(ControlError::Http(message)),
            None => Ok(()),
        }
    }

    async fn configure_agent(&self, request: ConfigureAgentRequest) -> Result<(), ControlError> {
        self.calls.lock().push(ClientCall::Configure);
        if let Some(message) = self.configure_error.lock().clone() {
            return Err(ControlError::Http(message));
        }
        self.configured.lock().push(request);
        Ok(())
    }

    async fn start_agent(&self) -> Result<StartAgentResponse, ControlError> {
        self.calls.lock().push(ClientCall::Start);
        match self.start_error.lock().clone() {
            Some(message) => Err(ControlError::Http(message)),
            None => Ok(StartAgentResponse {
                full_command: "claude --output-format stream-json".to_string(),
            }),
        }
    }

    async fn open_agent_stream(&self) -> Result<AgentStream, ControlError> {
        self.calls.lock().push(ClientCall::OpenAgentStream);
        let (stream, driver) = AgentStream::pair();
        *self.event_tx.lock() = Some(driver.events.clone());
        spawn_script_driver(self.script.clone(), driver);
        Ok(stream)
    }

    async fn open_permission_stream(
        &self,
    ) -> Result<EventStream<PermissionStreamEvent>, ControlError> {
        self.calls.lock().push(ClientCall::OpenPermissionStream);
        let (tx, stream) = EventStream::channel();
        *self.permission_tx.lock() = Some(tx);
        Ok(stream)
    }

    async fn open_workspace_stream(
        &self,
    ) -> Result<EventStream<WorkspaceStreamEvent>, ControlError> {
        self.calls.lock().push(ClientCall::OpenWorkspaceStream);
        let (tx, stream) = EventStream::channel();
        *self.workspace_tx.lock() = Some(tx);
        Ok(stream)
    }

    async fn respond_permission(&self, response: PermissionResponse) -> Result<(), ControlError> {
        self.calls.lock().push(ClientCall::RespondPermission {
            id: response.id,
            option_id: response.option_id,
        });
        Ok(())
    }
}

/// Factory handing out [`FakeControlClient`]s keyed by instance address.
#[derive(Default)]
pub struct FakeClientFactory {
    clients: Mutex<HashMap<String, Arc<FakeControlClient>>>,
}

impl FakeClientFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Client for an address, creating it on first use.
    pub fn client_at(&self, addr: &str) -> Arc<FakeControlClient> {
        let mut clients = self.clients.lock();
        clients
            .entry(addr.to_string())
            .or_insert_with(|| FakeControlClient::new(addr))
            .clone()
    }
}

impl ControlClientFactory for FakeClientFactory {
    fn client_for(&self, instance: &ExecutorInstance) -> Arc<dyn ControlClient> {
        self.client_at(&instance.address())
    }
}

// ── spec/profile builders ──────────────────────────────────────────

pub fn test_agent_spec() -> AgentSpec {
    AgentSpec {
        id: "claude".into(),
        display_name: "Claude Code".into(),
        default_model: Some("sonnet".into()),
        command: CommandTemplate {
            binary: "claude".into(),
            base_args: vec!["--output-format".into(), "stream-json".into()],
            model_flag: Some("--model {model}".into()),
            prompt_flag: Some("-p {prompt}".into()),
            resume_flag: Some("--continue".into()),
            session_resume_flag: Some("--resume {session_id}".into()),
        },
        permission_settings: vec![],
        passthrough: None,
        runtime: RuntimeRequirements {
            protocol: AgentProtocol::Acp,
            image: None,
            image_tag: None,
            required_env: vec![],
            native_session_resume: false,
            history_context_injection: false,
            mounts: vec![],
            memory_mb: None,
            cpu_cores: None,
            mcp_servers: vec![],
        },
    }
}

pub fn test_profile() -> ProfileInfo {
    ProfileInfo {
        id: "profile-1".into(),
        agent_id: "claude".into(),
        model: None,
        auto_approve: false,
        permission_values: indexmap::IndexMap::new(),
        native_session_resume: false,
        cli_passthrough: false,
        enabled: true,
    }
}

// ── harness ────────────────────────────────────────────────────────

/// Fully-faked manager wiring for lifecycle tests.
pub struct Harness {
    pub manager: Arc<Manager<FakeClock>>,
    pub clock: FakeClock,
    pub bus: Arc<FakeBus>,
    pub backend: Arc<FakeBackend>,
    pub registry: Arc<ExecutorRegistry>,
    pub clients: Arc<FakeClientFactory>,
    pub profiles: Arc<FakeProfileStore>,
    pub agents: Arc<FakeAgentRegistry>,
    pub worktrees: Arc<FakeWorktreeManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ManagerConfig {
            daemon_ready_timeout: Duration::from_secs(2),
            daemon_ready_poll: Duration::from_millis(10),
            ..ManagerConfig::default()
        })
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let clock = FakeClock::new();
        let bus = FakeBus::new();
        let registry = Arc::new(ExecutorRegistry::new());
        let backend = Arc::new(FakeBackend::new("standalone"));
        registry.register(backend.clone());
        let clients = FakeClientFactory::new();
        let profiles = FakeProfileStore::new();
        let agents = FakeAgentRegistry::new();
        let worktrees = FakeWorktreeManager::new();

        profiles.put(test_profile());
        agents.put(test_agent_spec());

        let manager = Manager::new(
            registry.clone(),
            profiles.clone(),
            agents.clone(),
            clients.clone(),
            bus.clone(),
            Some(worktrees.clone() as Arc<dyn WorktreeManager>),
            clock.clone(),
            config,
        );

        Self {
            manager,
            clock,
            bus,
            backend,
            registry,
            clients,
            profiles,
            agents,
            worktrees,
        }
    }

    /// The fake client serving the standalone backend's instances.
    pub fn client(&self) -> Arc<FakeControlClient> {
        self.clients.client_at("127.0.0.1:42000")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
