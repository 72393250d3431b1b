// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::execution::Execution;
use crate::publisher::EventPublisher;
use crate::session::SessionManager;
use crate::test_support::{test_agent_spec, test_profile, FakeBus};
use async_trait::async_trait;
use kandev_backends::{BackendError, FakeBackend};
use kandev_core::clock::FakeClock;
use kandev_core::history::SessionHistory;
use kandev_core::launch::LaunchRequest;
use std::time::Duration;
use tokio::sync::watch;

/// One scripted PTY session the test can drive.
struct FakePtySession {
    out_tx: mpsc::Sender<Vec<u8>>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    input_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

#[derive(Default)]
struct FakeRunner {
    started: Mutex<Vec<PtySpec>>,
    sessions: Mutex<Vec<Arc<FakePtySession>>>,
    pid_counter: std::sync::atomic::AtomicU32,
}

impl FakeRunner {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn started(&self) -> Vec<PtySpec> {
        self.started.lock().clone()
    }

    fn session(&self, index: usize) -> Arc<FakePtySession> {
        self.sessions.lock()[index].clone()
    }

    async fn wait_for_starts(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.sessions.lock().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl InteractiveRunner for FakeRunner {
    async fn start(&self, spec: PtySpec) -> Result<PtyProcess, BackendError> {
        self.started.lock().push(spec);
        let (out_tx, out_rx, exit_tx, exit_rx) = PtyProcess::fake_channels();
        let (in_tx, in_rx) = mpsc::channel(8);
        let pid = 1000
            + self
                .pid_counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let process = PtyProcess::fake(pid, out_rx, in_tx, exit_rx);
        self.sessions.lock().push(Arc::new(FakePtySession {
            out_tx,
            exit_tx,
            input_rx: Mutex::new(Some(in_rx)),
        }));
        Ok(process)
    }
}

struct Setup {
    subsystem: Arc<PassthroughSubsystem<FakeClock>>,
    bus: Arc<FakeBus>,
    execution: Arc<Execution>,
    runner: Arc<FakeRunner>,
}

fn setup() -> Setup {
    let bus = FakeBus::new();
    let clock = FakeClock::new();
    let publisher = Arc::new(EventPublisher::new(bus.clone(), clock.clone()));
    let history = Arc::new(SessionHistory::new());
    let sessions = Arc::new(SessionManager::new(publisher.clone(), history, clock.clone()));
    let subsystem = Arc::new(PassthroughSubsystem::new(publisher, sessions, clock));

    let backend = FakeBackend::new("standalone");
    let request = LaunchRequest::new("t-1", "s-1", "p-1", "fix build");
    let execution = Execution::new(
        kandev_core::id::ExecutionId::new("e-1"),
        &request,
        "claude".into(),
        backend.instance_for(&"e-1".into()),
        0,
    );
    let _ = execution.transition(ExecutionStatus::Running);

    Setup { subsystem, bus, execution, runner: FakeRunner::new() }
}

fn passthrough_spec() -> kandev_core::profile::AgentSpec {
    let mut spec = test_agent_spec();
    spec.passthrough = Some(kandev_core::profile::PassthroughConfig {
        prompt_ready_pattern: "> $".into(),
        idle_timeout_ms: 120_000,
        buffer_cap_bytes: 4096,
        stability_window_ms: 50,
        wait_for_terminal: false,
    });
    spec
}

async fn start(s: &Setup, prompt: Option<&str>, resume: bool) {
    s.subsystem
        .start(
            &s.execution,
            &passthrough_spec(),
            &test_profile(),
            s.runner.clone(),
            prompt.map(str::to_string),
            resume,
            indexmap::IndexMap::new(),
        )
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn start_records_pid_and_publishes_daemon_ready() {
    let s = setup();
    start(&s, Some("fix build"), false).await;

    let pid = s.execution.with_protocol(|p| p.passthrough_pid);
    assert_eq!(pid, Some(1000));
    assert!(s.bus.event_names().contains(&"agentctl:ready"));

    let argv = &s.runner.started()[0].argv;
    assert_eq!(argv.last().map(String::as_str), Some("fix build"));
}

#[tokio::test(start_paused = true)]
async fn missing_passthrough_config_is_start_failed() {
    let s = setup();
    let err = s
        .subsystem
        .start(
            &s.execution,
            &test_agent_spec(), // no passthrough block
            &test_profile(),
            s.runner.clone(),
            None,
            false,
            indexmap::IndexMap::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::StartFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn prompt_ready_pattern_marks_ready_after_stability() {
    let s = setup();
    start(&s, Some("fix build"), false).await;
    let session = s.runner.session(0);

    session.out_tx.send(b"working...\n".to_vec()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!s.bus.event_names().contains(&"agent:ready"));

    session.out_tx.send(b"done\n> ".to_vec()).await.unwrap();
    assert!(
        s.bus.wait_for("agent:ready", Duration::from_secs(1)).await,
        "ready after the stability window"
    );
    assert_eq!(s.execution.status(), ExecutionStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn output_reaches_attached_terminals() {
    let s = setup();
    start(&s, None, false).await;
    let mut terminal = s.subsystem.attach_terminal(&s.execution.id).unwrap();

    s.runner.session(0).out_tx.send(b"banner".to_vec()).await.unwrap();
    let bytes = terminal.output.recv().await.unwrap();
    assert_eq!(bytes, b"banner".to_vec());
}

#[tokio::test(start_paused = true)]
async fn terminal_write_reaches_the_pty() {
    let s = setup();
    start(&s, None, false).await;
    let terminal = s.subsystem.attach_terminal(&s.execution.id).unwrap();

    terminal.write(b"ls\r").await.unwrap();
    let mut input = s.runner.session(0).input_rx.lock().take().unwrap();
    assert_eq!(input.recv().await.unwrap(), b"ls\r".to_vec());
}

#[tokio::test(start_paused = true)]
async fn exit_without_terminal_settles_the_execution() {
    let s = setup();
    start(&s, None, false).await;
    let session = s.runner.session(0);

    session.exit_tx.send(Some(Some(0))).unwrap();
    drop(session); // closes the output channel
    s.runner.sessions.lock().clear();

    assert!(s.bus.wait_for("agent:completed", Duration::from_secs(1)).await);
    assert_eq!(s.execution.status(), ExecutionStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn nonzero_exit_without_terminal_fails_the_execution() {
    let s = setup();
    start(&s, None, false).await;
    let session = s.runner.session(0);

    session.exit_tx.send(Some(Some(2))).unwrap();
    drop(session);
    s.runner.sessions.lock().clear();

    assert!(s.bus.wait_for("agent:failed", Duration::from_secs(1)).await);
    assert_eq!(s.execution.status(), ExecutionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn exit_with_attached_terminal_restarts_with_resume() {
    let s = setup();
    start(&s, Some("fix build"), false).await;
    let mut terminal = s.subsystem.attach_terminal(&s.execution.id).unwrap();
    let first = s.runner.session(0);

    first.exit_tx.send(Some(Some(1))).unwrap();
    drop(first);
    {
        let mut sessions = s.runner.sessions.lock();
        sessions.remove(0);
    }

    assert!(
        s.runner.wait_for_starts(1, Duration::from_secs(5)).await,
        "a replacement process starts"
    );
    let restart_argv = &s.runner.started()[1].argv;
    assert!(
        restart_argv.contains(&"--continue".to_string()),
        "restart uses the resume command: {restart_argv:?}"
    );
    assert!(
        !restart_argv.contains(&"fix build".to_string()),
        "the prompt is not re-sent"
    );

    // the yellow notice reached the still-attached terminal
    let mut saw_notice = false;
    while let Ok(bytes) = terminal.output.try_recv() {
        if String::from_utf8_lossy(&bytes).contains("[Agent exited. Restarting...]") {
            saw_notice = true;
        }
    }
    assert!(saw_notice);

    // pid was updated to the new process
    let pid = s.execution.with_protocol(|p| p.passthrough_pid);
    assert_eq!(pid, Some(1001));
}

#[tokio::test(start_paused = true)]
async fn detached_terminal_skips_restart() {
    let s = setup();
    start(&s, None, false).await;
    let terminal = s.subsystem.attach_terminal(&s.execution.id).unwrap();
    drop(terminal); // detach before exit

    let session = s.runner.session(0);
    session.exit_tx.send(Some(Some(1))).unwrap();
    drop(session);
    s.runner.sessions.lock().clear();

    assert!(s.bus.wait_for("agent:failed", Duration::from_secs(1)).await);
    assert_eq!(s.runner.started().len(), 1, "no restart attempted");
}
