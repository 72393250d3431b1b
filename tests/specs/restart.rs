// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-process restart specs (context reset).

use super::prelude::*;
use kandev_engine::test_support::ClientCall;

async fn started(h: &Harness) -> Arc<kandev_engine::Execution> {
    auto_complete(h.client());
    let execution = h.manager.launch(request("S")).await.unwrap();
    h.manager.start_agent_process(&execution.id).await.unwrap();
    assert!(h.bus.wait_for("agent:ready", Duration::from_secs(5)).await);
    execution
}

/// S2: restart stops, reconfigures, starts, and re-handshakes with the
/// protocol session dropped.
#[tokio::test(start_paused = true)]
async fn s2_restart_success() {
    let h = Harness::new();
    let execution = started(&h).await;
    h.client().queue_session_ids(&["new-session-123"]);
    execution.with_buffers(|b| {
        b.message.push_str("leftover");
        b.current_message_id = "m-stale".into();
    });

    h.manager.restart_agent_process(&execution.id).await.unwrap();

    // control-plane order: stop, configure, start
    let calls = h.client().calls();
    let stop = calls
        .iter()
        .rposition(|c| matches!(c, ClientCall::Stop { .. }))
        .unwrap();
    let configure = calls.iter().rposition(|c| *c == ClientCall::Configure).unwrap();
    let start = calls.iter().rposition(|c| *c == ClientCall::Start).unwrap();
    assert!(stop < configure && configure < start);

    assert_eq!(
        execution.protocol_session_id().as_deref(),
        Some("new-session-123")
    );
    assert_eq!(execution.status(), ExecutionStatus::Ready);
    execution.with_buffers(|b| {
        assert!(b.message.is_empty());
        assert!(b.thinking.is_empty());
        assert!(b.current_message_id.is_empty());
        assert!(b.current_thinking_id.is_empty());
    });
    execution.with_protocol(|p| {
        assert!(!p.needs_resume_context);
        assert!(!p.resume_context_injected);
    });
    assert!(execution.turn.try_take().is_none(), "completion slot drained");

    let names = h.bus.event_names();
    assert!(names.contains(&"agent:ready"));
    assert!(names.contains(&"agent:acp_session_created"));
    assert_eq!(
        names.iter().filter(|n| **n == "agent:context_reset").count(),
        1,
        "exactly one context reset"
    );
}

/// S3: a failing daemon `/stop` is logged and the restart proceeds.
#[tokio::test(start_paused = true)]
async fn s3_restart_with_failing_stop() {
    let h = Harness::new();
    let execution = started(&h).await;
    h.client().fail_stop("stop endpoint unavailable");

    h.manager.restart_agent_process(&execution.id).await.unwrap();
    assert_eq!(execution.status(), ExecutionStatus::Ready);
    assert!(h.bus.event_names().contains(&"agent:context_reset"));
}

/// S4: a failing `session/new` during restart fails the execution and
/// publishes no context reset.
#[tokio::test(start_paused = true)]
async fn s4_restart_with_failing_session_init() {
    let h = Harness::new();
    let execution = started(&h).await;
    h.client().fail_session_new("agent rejected session");

    let err = h
        .manager
        .restart_agent_process(&execution.id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::HandshakeFailed(_)));
    assert_eq!(execution.status(), ExecutionStatus::Failed);
    assert!(execution
        .error_message()
        .unwrap()
        .contains("agent rejected session"));
    assert!(
        !h.bus.event_names().contains(&"agent:context_reset"),
        "no context reset on failure"
    );
}
