// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn message_chunk_round_trip() {
    let event = AgentStreamEvent::MessageChunk { text: "hello\n".into() };
    let json = serde_json::to_string(&event).unwrap();
    assert!(json.contains("\"message_chunk\""));
    let parsed: AgentStreamEvent = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, event);
}

#[test]
fn complete_with_missing_fields() {
    let event: AgentStreamEvent = serde_json::from_str(r#"{"type": "complete"}"#).unwrap();
    assert_eq!(
        event,
        AgentStreamEvent::Complete { stop_reason: None, error: None }
    );
}

#[test]
fn tool_update_status_parses() {
    let event: AgentStreamEvent = serde_json::from_str(
        r#"{"type": "tool_update", "id": "tc-1", "status": "complete"}"#,
    )
    .unwrap();
    let AgentStreamEvent::ToolUpdate { status, .. } = event else {
        panic!("wrong variant");
    };
    assert!(status.is_settled());
}

#[test]
fn permission_request_parses_options() {
    let event: PermissionStreamEvent = serde_json::from_str(
        r#"{
            "type": "permission_requested",
            "id": "perm-1",
            "tool_call_id": "tc-1",
            "title": "Run tests?",
            "options": [
                {"id": "allow", "name": "Allow", "kind": "allow_once"},
                {"id": "deny", "name": "Deny", "kind": "reject_once"}
            ]
        }"#,
    )
    .unwrap();
    let PermissionStreamEvent::PermissionRequested { options, .. } = event else {
        panic!("wrong variant");
    };
    assert_eq!(options.len(), 2);
    assert_eq!(options[0].kind, "allow_once");
}

#[test]
fn workspace_events_round_trip() {
    let events = vec![
        WorkspaceStreamEvent::ShellOutput { data: "ok\n".into(), stderr: false },
        WorkspaceStreamEvent::ShellExit { exit_code: Some(0) },
        WorkspaceStreamEvent::GitStatus {
            branch: Some("main".into()),
            changed_files: vec!["src/lib.rs".into()],
        },
        WorkspaceStreamEvent::FileChange { paths: vec!["src/main.rs".into()] },
    ];
    for event in events {
        let json = serde_json::to_string(&event).unwrap();
        let parsed: WorkspaceStreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}

#[test]
fn shell_output_stderr_defaults_false() {
    let event: WorkspaceStreamEvent =
        serde_json::from_str(r#"{"type": "shell_output", "data": "x"}"#).unwrap();
    assert_eq!(
        event,
        WorkspaceStreamEvent::ShellOutput { data: "x".into(), stderr: false }
    );
}
