// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::profile::{
    AgentProtocol, AgentSpec, CommandTemplate, PermissionKind, PermissionSetting,
    RuntimeRequirements,
};
use yare::parameterized;

fn spec() -> AgentSpec {
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
        permission_settings: vec![
            PermissionSetting {
                name: AUTO_APPROVE_SETTING.into(),
                flag: "--dangerously-skip-permissions".into(),
                kind: PermissionKind::Toggle,
            },
            PermissionSetting {
                name: "permission_mode".into(),
                flag: "--permission-mode {value}".into(),
                kind: PermissionKind::Value,
            },
        ],
        passthrough: None,
        runtime: RuntimeRequirements {
            protocol: AgentProtocol::Acp,
            image: None,
            image_tag: None,
            required_env: vec![],
            native_session_resume: true,
            history_context_injection: false,
            mounts: vec![],
            memory_mb: None,
            cpu_cores: None,
            mcp_servers: vec![],
        },
    }
}

#[test]
fn build_command_uses_default_model() {
    let argv = build_command(&spec(), &CommandOptions::default());
    assert_eq!(
        argv,
        vec!["claude", "--output-format", "stream-json", "--model", "sonnet"]
    );
}

#[test]
fn build_command_model_override() {
    let opts = CommandOptions::default().model("opus");
    let argv = build_command(&spec(), &opts);
    assert!(argv.contains(&"opus".to_string()));
    assert!(!argv.contains(&"sonnet".to_string()));
}

#[test]
fn build_command_session_resume() {
    let opts = CommandOptions::default().session_id("sess-9");
    let argv = build_command(&spec(), &opts);
    assert_eq!(&argv[argv.len() - 2..], ["--resume", "sess-9"]);
}

#[test]
fn build_command_auto_approve_toggle() {
    let opts = CommandOptions::default().auto_approve(true);
    let argv = build_command(&spec(), &opts);
    assert!(argv.contains(&"--dangerously-skip-permissions".to_string()));
}

#[test]
fn build_command_permission_value() {
    let mut values = indexmap::IndexMap::new();
    values.insert("permission_mode".to_string(), "plan".to_string());
    let opts = CommandOptions::default().permission_values(values);
    let argv = build_command(&spec(), &opts);
    assert_eq!(&argv[argv.len() - 2..], ["--permission-mode", "plan"]);
}

#[test]
fn toggle_omitted_when_false() {
    let mut values = indexmap::IndexMap::new();
    values.insert(AUTO_APPROVE_SETTING.to_string(), "false".to_string());
    let opts = CommandOptions::default().permission_values(values);
    let argv = build_command(&spec(), &opts);
    assert!(!argv.contains(&"--dangerously-skip-permissions".to_string()));
}

#[test]
fn build_continue_command_appends_resume_flag() {
    let argv = build_continue_command(&spec(), &CommandOptions::default()).unwrap();
    assert_eq!(argv.last().map(String::as_str), Some("--continue"));
}

#[test]
fn build_continue_command_none_without_resume_flag() {
    let mut spec = spec();
    spec.command.resume_flag = None;
    assert!(build_continue_command(&spec, &CommandOptions::default()).is_none());
}

#[parameterized(
    resume_wins = { true, Some("sess-1"), Some("do it"), "--continue" },
    session_resume_next = { false, Some("sess-1"), Some("do it"), "sess-1" },
    prompt_last = { false, None, Some("do it"), "do it" },
)]
fn passthrough_flags_are_mutually_exclusive(
    resume: bool,
    session_id: Option<&str>,
    prompt: Option<&str>,
    expected_last: &str,
) {
    let mut opts = PassthroughOptions::default().resume(resume);
    if let Some(sid) = session_id {
        opts = opts.session_id(sid);
    }
    if let Some(p) = prompt {
        opts = opts.prompt(p);
    }
    let argv = build_passthrough_command(&spec(), &opts);
    assert_eq!(argv.last().map(String::as_str), Some(expected_last));

    // never more than one of the three surfaces
    let has_resume = argv.contains(&"--continue".to_string());
    let has_session = argv.contains(&"sess-1".to_string());
    let has_prompt = argv.contains(&"do it".to_string());
    assert_eq!(
        [has_resume, has_session, has_prompt].iter().filter(|b| **b).count(),
        1
    );
}

#[test]
fn passthrough_positional_prompt_without_flag() {
    let mut spec = spec();
    spec.command.prompt_flag = None;
    let opts = PassthroughOptions::default().prompt("fix the build");
    let argv = build_passthrough_command(&spec, &opts);
    assert_eq!(argv.last().map(String::as_str), Some("fix the build"));
}

#[test]
fn prompt_with_spaces_stays_one_argument() {
    let opts = PassthroughOptions::default().prompt("fix the build");
    let argv = build_passthrough_command(&spec(), &opts);
    assert!(argv.contains(&"fix the build".to_string()));
    assert_eq!(argv.iter().filter(|a| *a == "-p").count(), 1);
}
