// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data-driven agent CLI command construction.
//!
//! Every builder is a pure function from `AgentSpec × options` to an argv
//! vector. Flag templates are split on whitespace and each token has its
//! placeholders (`{model}`, `{session_id}`, `{prompt}`, `{value}`)
//! substituted, so values containing spaces stay single arguments.

use crate::profile::{AgentSpec, PermissionKind};
use indexmap::IndexMap;

/// Name of the permission setting implied by `auto_approve`.
pub const AUTO_APPROVE_SETTING: &str = "auto_approve";

/// Options for building a protocol-mode agent command.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    pub model: Option<String>,
    /// Protocol session id to resume by id, when the CLI supports it.
    pub session_id: Option<String>,
    pub auto_approve: bool,
    pub permission_values: IndexMap<String, String>,
}

impl CommandOptions {
    crate::setters! {
        set {
            auto_approve: bool,
            permission_values: IndexMap<String, String>,
        }
        option {
            model: String,
            session_id: String,
        }
    }
}

/// Options for building a passthrough (PTY) agent command.
///
/// The resume / session-resume / prompt flags are mutually exclusive:
/// `resume` wins, then a session id, then the prompt.
#[derive(Debug, Clone, Default)]
pub struct PassthroughOptions {
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub prompt: Option<String>,
    pub resume: bool,
    pub auto_approve: bool,
    pub permission_values: IndexMap<String, String>,
}

impl PassthroughOptions {
    crate::setters! {
        set {
            resume: bool,
            auto_approve: bool,
            permission_values: IndexMap<String, String>,
        }
        option {
            model: String,
            session_id: String,
            prompt: String,
        }
    }
}

/// Build the argv for starting an agent under the control daemon.
pub fn build_command(spec: &AgentSpec, opts: &CommandOptions) -> Vec<String> {
    let tpl = &spec.command;
    let mut argv = Vec::with_capacity(2 + tpl.base_args.len());
    argv.push(tpl.binary.clone());
    argv.extend(tpl.base_args.iter().cloned());

    let model = opts.model.as_deref().or(spec.default_model.as_deref());
    if let (Some(flag), Some(model)) = (&tpl.model_flag, model) {
        argv.extend(render(flag, "{model}", model));
    }

    if let (Some(flag), Some(session_id)) = (&tpl.session_resume_flag, &opts.session_id) {
        argv.extend(render(flag, "{session_id}", session_id));
    }

    push_permission_flags(
        spec,
        &mut argv,
        opts.auto_approve,
        &opts.permission_values,
    );
    argv
}

/// Build the per-turn argv for one-shot CLIs that take a fresh invocation
/// per prompt. Returns `None` when the CLI has no continue flag.
pub fn build_continue_command(spec: &AgentSpec, opts: &CommandOptions) -> Option<Vec<String>> {
    let resume_flag = spec.command.resume_flag.as_ref()?;
    let mut argv = build_command(spec, opts);
    argv.extend(resume_flag.split_whitespace().map(str::to_string));
    Some(argv)
}

/// Build the argv for a PTY-driven agent.
pub fn build_passthrough_command(spec: &AgentSpec, opts: &PassthroughOptions) -> Vec<String> {
    let tpl = &spec.command;
    let mut argv = Vec::with_capacity(2 + tpl.base_args.len());
    argv.push(tpl.binary.clone());
    argv.extend(tpl.base_args.iter().cloned());

    let model = opts.model.as_deref().or(spec.default_model.as_deref());
    if let (Some(flag), Some(model)) = (&tpl.model_flag, model) {
        argv.extend(render(flag, "{model}", model));
    }

    push_permission_flags(
        spec,
        &mut argv,
        opts.auto_approve,
        &opts.permission_values,
    );

    // Mutually exclusive: resume > session resume > prompt.
    if opts.resume {
        if let Some(flag) = &tpl.resume_flag {
            argv.extend(flag.split_whitespace().map(str::to_string));
        }
    } else if let (Some(flag), Some(session_id)) = (&tpl.session_resume_flag, &opts.session_id) {
        argv.extend(render(flag, "{session_id}", session_id));
    } else if let Some(prompt) = &opts.prompt {
        match &tpl.prompt_flag {
            Some(flag) => argv.extend(render(flag, "{prompt}", prompt)),
            None => argv.push(prompt.clone()),
        }
    }
    argv
}

/// Render a flag template into argv tokens, substituting one placeholder.
fn render(template: &str, placeholder: &str, value: &str) -> Vec<String> {
    template
        .split_whitespace()
        .map(|tok| tok.replace(placeholder, value))
        .collect()
}

fn push_permission_flags(
    spec: &AgentSpec,
    argv: &mut Vec<String>,
    auto_approve: bool,
    values: &IndexMap<String, String>,
) {
    for setting in &spec.permission_settings {
        let value = if setting.name == AUTO_APPROVE_SETTING && auto_approve {
            Some("true")
        } else {
            values.get(&setting.name).map(String::as_str)
        };
        let Some(value) = value else { continue };
        match setting.kind {
            PermissionKind::Toggle => {
                if value == "true" {
                    argv.extend(setting.flag.split_whitespace().map(str::to_string));
                }
            }
            PermissionKind::Value => {
                argv.extend(render(&setting.flag, "{value}", value));
            }
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
