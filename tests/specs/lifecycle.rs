// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Launch, duplicate-session, stop, and failure-injection specs.

use super::prelude::*;
use kandev_core::event::{Event, StreamPayload, ToolCallStatus};

/// Happy path: launch, start, one streamed turn with a tool call.
#[tokio::test(start_paused = true)]
async fn s1_happy_path_event_order() {
    let h = Harness::new();
    let client = h.client();
    client.queue_session_ids(&["X"]);

    // Script the daemon: once the initial prompt lands, stream a turn.
    {
        let client = client.clone();
        tokio::spawn(async move {
            while client.prompts().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
                .send_event(AgentStreamEvent::MessageChunk { text: "Looking.\n".into() })
                .await;
            client
                .send_event(AgentStreamEvent::ToolCall {
                    id: "tc-1".into(),
                    name: "read_file".into(),
                    title: None,
                })
                .await;
            client
                .send_event(AgentStreamEvent::ToolUpdate {
                    id: "tc-1".into(),
                    status: ToolCallStatus::Complete,
                })
                .await;
            client
                .send_event(AgentStreamEvent::MessageChunk { text: "Done.\n".into() })
                .await;
            client
                .send_event(AgentStreamEvent::Complete { stop_reason: None, error: None })
                .await;
        });
    }

    let execution = h.manager.launch(request("S")).await.unwrap();
    assert!(h.bus.wait_for("agentctl:ready", Duration::from_secs(5)).await);
    h.manager.start_agent_process(&execution.id).await.unwrap();

    assert_eq!(execution.protocol_session_id().as_deref(), Some("X"));
    assert!(h.bus.wait_for("agent:ready", Duration::from_secs(5)).await);

    // lifecycle ordering
    let order = filtered_names(
        &h,
        &[
            "agent:started",
            "agentctl:ready",
            "agent:acp_session_created",
            "agent:ready",
        ],
    );
    assert_eq!(
        order,
        vec![
            "agent:started",
            "agentctl:ready",
            "agent:acp_session_created",
            "agent:ready",
        ]
    );

    // stream ordering and identity
    let payloads: Vec<StreamPayload> = h
        .bus
        .events()
        .into_iter()
        .filter_map(|(_, e)| match e {
            Event::AgentStream { payload, .. } => Some(payload),
            _ => None,
        })
        .collect();
    assert_eq!(payloads.len(), 5, "unexpected payloads: {payloads:?}");

    let StreamPayload::MessageStreaming {
        message_id: first_id,
        text: first_text,
        is_append: first_append,
        ..
    } = &payloads[0]
    else {
        panic!("expected streaming: {:?}", payloads[0]);
    };
    assert_eq!(first_text, "Looking.\n");
    assert!(!first_append);

    assert!(
        matches!(&payloads[1], StreamPayload::ToolCall { name, .. } if name == "read_file")
    );
    assert!(matches!(
        &payloads[2],
        StreamPayload::ToolUpdate { status: ToolCallStatus::Complete, .. }
    ));

    let StreamPayload::MessageStreaming {
        message_id: second_id,
        text: second_text,
        is_append: second_append,
        ..
    } = &payloads[3]
    else {
        panic!("expected streaming: {:?}", payloads[3]);
    };
    assert_eq!(second_text, "Done.\n");
    assert!(!second_append, "a tool call starts a new message");
    assert_ne!(first_id, second_id);

    let StreamPayload::Complete { text, stop_reason, is_error, .. } = &payloads[4] else {
        panic!("expected complete: {:?}", payloads[4]);
    };
    assert_eq!(text, "", "streamed turns complete with empty text");
    assert_eq!(stop_reason, "end_turn");
    assert!(!is_error);

    assert_eq!(execution.status(), ExecutionStatus::Ready);
}

/// S5: a second launch for an occupied session fails and leaves the
/// existing execution untouched.
#[tokio::test(start_paused = true)]
async fn s5_duplicate_session_is_rejected() {
    let h = Harness::new();
    let first = h.manager.launch(request("S")).await.unwrap();

    let err = h.manager.launch(request("S")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::SessionOccupied(s) if s == "S"));

    let still = h.manager.get_execution(&first.id).unwrap();
    assert_eq!(still.id, first.id);
    assert!(!still.status().is_terminal());
    assert_eq!(h.manager.store().len(), 1);
}

/// Launch → Stop leaves the store with no executions for the session.
#[tokio::test(start_paused = true)]
async fn launch_then_stop_clears_the_session() {
    let h = Harness::new();
    let execution = h.manager.launch(request("S")).await.unwrap();

    h.manager.stop_agent(&execution.id, false).await.unwrap();

    assert!(h.manager.store().is_empty());
    assert!(h
        .manager
        .store()
        .get_by_session(&"S".into())
        .is_none());
    assert!(h.bus.event_names().contains(&"agent:stopped"));

    // the session is reusable immediately
    h.manager.launch(request("S")).await.unwrap();
}

/// Stop on a non-existent id returns cleanly.
#[tokio::test(start_paused = true)]
async fn stop_unknown_execution_is_idempotent() {
    let h = Harness::new();
    assert!(h.manager.stop_agent(&"ghost".into(), false).await.is_ok());
    assert!(h.manager.stop_agent(&"ghost".into(), true).await.is_ok());
}

/// Failure injection: backend create failure publishes nothing and
/// registers nothing.
#[tokio::test(start_paused = true)]
async fn backend_create_failure_leaves_no_trace() {
    let h = Harness::new();
    h.backend.fail_next_create(kandev_backends::BackendError::CreateFailed(
        "no daemon slots".into(),
    ));

    let err = h.manager.launch(request("S")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::BackendUnavailable(_)));
    assert!(h.manager.store().is_empty());
    assert!(h.bus.events().is_empty(), "no events published");
}
