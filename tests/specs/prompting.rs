// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt round-trip and streaming-identity specs.

use super::prelude::*;
use kandev_core::event::{Event, StreamPayload};
use kandev_engine::test_support::PromptBehavior;

/// Launch and start, answering only the initial prompt so later turns
/// stay under the test's control.
async fn ready_execution(h: &Harness) -> Arc<kandev_engine::Execution> {
    let client = h.client();
    tokio::spawn(async move {
        while client.prompts().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client
            .send_event(AgentStreamEvent::Complete { stop_reason: None, error: None })
            .await;
    });
    let execution = h.manager.launch(request("S")).await.unwrap();
    h.manager.start_agent_process(&execution.id).await.unwrap();
    assert!(h.bus.wait_for("agent:ready", Duration::from_secs(5)).await);
    execution
}

fn streaming_payloads(h: &Harness) -> Vec<StreamPayload> {
    h.bus
        .events()
        .into_iter()
        .filter_map(|(_, e)| match e {
            Event::AgentStream { payload, .. } => Some(payload),
            _ => None,
        })
        .collect()
}

/// Two newline-carrying chunks append to the same message.
#[tokio::test(start_paused = true)]
async fn chunks_share_one_message_bubble() {
    let h = Harness::new();
    let execution = ready_execution(&h).await;
    let client = h.client();

    // Drive a turn by hand: chunk, chunk, complete.
    {
        let client = client.clone();
        tokio::spawn(async move {
            while client.prompts().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
                .send_event(AgentStreamEvent::MessageChunk { text: "part one\n".into() })
                .await;
            client
                .send_event(AgentStreamEvent::MessageChunk { text: "part two\n".into() })
                .await;
            client
                .send_event(AgentStreamEvent::Complete { stop_reason: None, error: None })
                .await;
        });
    }

    h.manager
        .prompt_agent(&execution.id, "stream please", Vec::new())
        .await
        .unwrap();

    let streams: Vec<(String, bool)> = streaming_payloads(&h)
        .into_iter()
        .filter_map(|p| match p {
            StreamPayload::MessageStreaming { message_id, is_append, thinking: false, .. } => {
                Some((message_id, is_append))
            }
            _ => None,
        })
        .collect();

    // skip the initial-prompt turn (completed with no streaming)
    assert_eq!(streams.len(), 2, "streams: {streams:?}");
    assert!(!streams[0].1);
    assert!(streams[1].1, "second publish is an append");
    assert_eq!(streams[0].0, streams[1].0, "same message id");
}

/// S6: a prompt that hits a dead stream reconnects, retries exactly
/// once, and does not repeat the handshake.
#[tokio::test(start_paused = true)]
async fn s6_prompt_after_stream_disconnect() {
    let h = Harness::new();
    let execution = ready_execution(&h).await;
    let client = h.client();
    assert_eq!(client.initialize_count(), 1);

    client.set_next_prompt_behavior(PromptBehavior::Disconnect);

    // Answer the retried dispatch (prompt #3, on the fresh stream).
    {
        let client = client.clone();
        tokio::spawn(async move {
            while client.prompts().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
                .send_event(AgentStreamEvent::Complete { stop_reason: None, error: None })
                .await;
        });
    }

    let outcome = h
        .manager
        .prompt_agent(&execution.id, "survive the drop", Vec::new())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, "end_turn");
    // initial prompt + severed dispatch + retry
    assert_eq!(client.prompts().len(), 3);
    assert_eq!(
        client.initialize_count(),
        1,
        "reconnect does not re-run the handshake"
    );
    assert_eq!(execution.status(), ExecutionStatus::Ready);
}

/// The prompt gate rejects busy and terminal executions.
#[tokio::test(start_paused = true)]
async fn prompt_gate_enforces_status() {
    let h = Harness::new();
    let execution = ready_execution(&h).await;

    h.manager.stop_agent(&execution.id, false).await.unwrap();
    let err = h
        .manager
        .prompt_agent(&execution.id, "too late", Vec::new())
        .await
        .unwrap_err();
    // stopped executions are unregistered: lookup misses
    assert!(matches!(err, LifecycleError::NotFound(_)));
}

/// An error completion surfaces as PromptFailed and still leaves the
/// agent Ready for a retry.
#[tokio::test(start_paused = true)]
async fn error_completion_fails_the_prompt() {
    let h = Harness::new();
    let execution = ready_execution(&h).await;
    let client = h.client();

    {
        let client = client.clone();
        tokio::spawn(async move {
            while client.prompts().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
                .send_event(AgentStreamEvent::Complete {
                    stop_reason: None,
                    error: Some("model overloaded".into()),
                })
                .await;
        });
    }

    let err = h
        .manager
        .prompt_agent(&execution.id, "doomed", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PromptFailed(m) if m.contains("overloaded")));
    assert_eq!(execution.status(), ExecutionStatus::Ready);
}

/// Permission requests flow from the daemon stream onto the bus.
#[tokio::test(start_paused = true)]
async fn permission_requests_reach_subscribers() {
    let h = Harness::new();
    let _execution = ready_execution(&h).await;

    h.client()
        .send_permission_event(kandev_wire::PermissionStreamEvent::PermissionRequested {
            id: "perm-1".into(),
            tool_call_id: "tc-1".into(),
            title: "Write to src/main.rs?".into(),
            options: vec![
                kandev_core::event::PermissionOption {
                    id: "allow".into(),
                    name: "Allow".into(),
                    kind: "allow_once".into(),
                },
                kandev_core::event::PermissionOption {
                    id: "deny".into(),
                    name: "Deny".into(),
                    kind: "reject_once".into(),
                },
            ],
        })
        .await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    loop {
        let found = streaming_payloads(&h).into_iter().any(|p| {
            matches!(p, StreamPayload::PermissionRequest { ref id, ref options, .. }
                if id == "perm-1" && options.len() == 2)
        });
        if found {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "permission request never published"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Workspace stream events are normalized onto the bus.
#[tokio::test(start_paused = true)]
async fn workspace_stream_events_are_published() {
    let h = Harness::new();
    let _execution = ready_execution(&h).await;

    h.client()
        .send_workspace_event(kandev_wire::WorkspaceStreamEvent::GitStatus {
            branch: Some("kandev/S".into()),
            changed_files: vec!["src/lib.rs".into()],
        })
        .await;
    h.client()
        .send_workspace_event(kandev_wire::WorkspaceStreamEvent::ShellOutput {
            data: "$ cargo test\n".into(),
            stderr: false,
        })
        .await;

    assert!(h.bus.wait_for("git:status", Duration::from_secs(1)).await);
    assert!(h.bus.wait_for("shell:output", Duration::from_secs(1)).await);
}
