// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::status::ExecutionStatus;

fn payload() -> LifecyclePayload {
    LifecyclePayload {
        execution_id: "e-1".into(),
        task_id: "t-1".into(),
        session_id: "s-1".into(),
        profile_id: "p-1".into(),
        container_id: None,
        status: ExecutionStatus::Running,
        started_at_ms: 1_000,
        finished_at_ms: None,
        exit_code: None,
        error_message: None,
        timestamp_ms: 2_000,
    }
}

#[test]
fn lifecycle_event_serializes_with_type_tag() {
    let event = Event::AgentStarted { payload: payload() };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:started");
    assert_eq!(json["execution_id"], "e-1");
    assert_eq!(json["status"], "running");
    // skipped optional fields stay off the wire
    assert!(json.get("finished_at_ms").is_none());
}

#[test]
fn event_round_trips() {
    let event = Event::AcpSessionCreated {
        session_id: "s-1".into(),
        protocol_session_id: "acp-9".into(),
        timestamp_ms: 5,
    };
    let json = serde_json::to_string(&event).unwrap();
    let parsed: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, event);
}

#[test]
fn stream_payload_kind_tag() {
    let event = Event::AgentStream {
        session_id: "s-1".into(),
        timestamp_ms: 5,
        payload: StreamPayload::MessageStreaming {
            message_id: "m-1".into(),
            text: "hello\n".into(),
            is_append: false,
            thinking: false,
        },
    };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "agent:stream");
    assert_eq!(json["payload"]["kind"], "message_streaming");
    assert_eq!(json["payload"]["is_append"], false);
}

#[test]
fn topic_derives_from_session() {
    let event = Event::DaemonReady {
        execution_id: "e-1".into(),
        session_id: "s-42".into(),
        timestamp_ms: 0,
    };
    assert_eq!(event.topic(), "session.s-42");
    assert_eq!(event.session_id(), "s-42");
}

#[test]
fn names_match_serde_tags() {
    let event = Event::AgentFailed { payload: payload() };
    let json: serde_json::Value = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], event.name());
}

#[test]
fn log_summary_mentions_ids() {
    let event = Event::AgentReady { payload: payload() };
    let summary = event.log_summary();
    assert!(summary.contains("agent:ready"));
    assert!(summary.contains("e-1"));
    assert!(summary.contains("s-1"));
}

#[test]
fn tool_call_status_settled() {
    assert!(ToolCallStatus::Complete.is_settled());
    assert!(ToolCallStatus::Error.is_settled());
    assert!(ToolCallStatus::Failed.is_settled());
    assert!(!ToolCallStatus::InProgress.is_settled());
    assert!(!ToolCallStatus::Pending.is_settled());
}
