// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use kandev_core::profile::{
    AgentProtocol, AgentSpec, CommandTemplate, RuntimeRequirements,
};
use yare::parameterized;

fn spec_with_metadata(pairs: &[(&str, &str)]) -> CreateInstanceSpec {
    let metadata = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    CreateInstanceSpec {
        execution_id: "e-1".into(),
        task_id: "t-1".into(),
        session_id: "s-1".into(),
        profile_id: "p-1".into(),
        agent_spec: AgentSpec {
            id: "claude".into(),
            display_name: "Claude Code".into(),
            default_model: None,
            command: CommandTemplate {
                binary: "claude".into(),
                base_args: vec![],
                model_flag: None,
                prompt_flag: None,
                resume_flag: None,
                session_resume_flag: None,
            },
            permission_settings: vec![],
            passthrough: None,
            runtime: RuntimeRequirements {
                protocol: AgentProtocol::Acp,
                image: Some("kandev/agent".into()),
                image_tag: Some("latest".into()),
                required_env: vec![],
                native_session_resume: false,
                history_context_injection: false,
                mounts: vec![],
                memory_mb: None,
                cpu_cores: None,
                mcp_servers: vec![],
            },
        },
        workspace_path: "/work/ws".into(),
        env: IndexMap::new(),
        metadata,
    }
}

#[parameterized(
    with_tag = { Some("kandev/agent"), Some("v2"), Some("kandev/agent:v2") },
    without_tag = { Some("kandev/agent"), None, Some("kandev/agent") },
    no_image = { None, Some("v2"), None },
)]
fn image_ref_composition(image: Option<&str>, tag: Option<&str>, expected: Option<&str>) {
    assert_eq!(image_ref(image, tag).as_deref(), expected);
}

#[test]
fn standard_env_includes_kandev_vars() {
    let spec = spec_with_metadata(&[(metadata_keys::TASK_DESCRIPTION, "fix build")]);
    let instance_id = InstanceId::new("inst-1");
    let env = standard_env(&spec, Some(&instance_id));

    assert_eq!(env.get("KANDEV_INSTANCE_ID").map(String::as_str), Some("inst-1"));
    assert_eq!(env.get("KANDEV_TASK_ID").map(String::as_str), Some("t-1"));
    assert_eq!(env.get("KANDEV_SESSION_ID").map(String::as_str), Some("s-1"));
    assert_eq!(env.get("KANDEV_AGENT_PROFILE_ID").map(String::as_str), Some("p-1"));
    assert_eq!(env.get("TASK_DESCRIPTION").map(String::as_str), Some("fix build"));
}

#[test]
fn standard_env_without_instance_id() {
    let spec = spec_with_metadata(&[]);
    let env = standard_env(&spec, None);
    assert!(env.get("KANDEV_INSTANCE_ID").is_none());
    assert!(env.get("TASK_DESCRIPTION").is_none());
}

#[test]
fn request_env_wins_over_standard() {
    let mut spec = spec_with_metadata(&[]);
    spec.env.insert("KANDEV_TASK_ID".to_string(), "override".to_string());
    let env = standard_env(&spec, None);
    assert_eq!(env.get("KANDEV_TASK_ID").map(String::as_str), Some("override"));
}

#[test]
fn mounts_expand_placeholders() {
    let mounts = vec![
        MountTemplate {
            source: "{workspace}".into(),
            target: "/workspace".into(),
            read_only: false,
        },
        MountTemplate {
            source: "{home}/.config/agent".into(),
            target: "/root/.config/agent".into(),
            read_only: true,
        },
    ];
    let expanded = expand_mounts(
        &mounts,
        Path::new("/work/ws"),
        Path::new("/home/dev"),
    );
    assert_eq!(
        expanded,
        vec![
            "/work/ws:/workspace",
            "/home/dev/.config/agent:/root/.config/agent:ro",
        ]
    );
}

#[test]
fn labels_mark_managed_containers() {
    let spec = spec_with_metadata(&[]);
    let labels = build_labels(&spec, &InstanceId::new("inst-1"));
    let keys: Vec<&str> = labels.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "kandev.managed",
            "kandev.instance_id",
            "kandev.task_id",
            "kandev.agent_profile_id",
        ]
    );
    assert_eq!(labels[0].1, "true");
}

#[tokio::test]
async fn recover_is_lazy() {
    let backend = DockerBackend::new(std::sync::Arc::new(crate::EnvCredentialStore));
    assert!(backend.recover_instances().await.unwrap().is_empty());
    assert!(backend.health_check().await.is_ok(), "health check is a no-op");
}
