// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the control daemon (`agentctl`).
//!
//! HTTP bodies for configure/start/stop/instance-create, the framed
//! WebSocket message `{id, action, type, data}` used on the agent stream,
//! and the tagged event unions carried on the agent, permission, and
//! workspace streams.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod frame;
mod http;
mod stream;

pub use frame::{
    Action, AgentCapabilities, Frame, FrameKind, InitializeRequest, InitializeResponse,
    PromptAttachment, PromptRequest, SessionLoadRequest, SessionNewRequest, SessionNewResponse,
    WireError, ERROR_CODE_METHOD_NOT_FOUND,
};
pub use http::{
    ConfigureAgentRequest, CreateInstanceRequest, CreateInstanceResponse, HealthResponse,
    StartAgentResponse, StopRequest, AGENT_STREAM_PATH, CONFIGURE_PATH, CREATE_INSTANCE_PATH,
    HEALTH_PATH, PERMISSION_RESPOND_PATH, PERMISSION_STREAM_PATH, START_PATH, STOP_PATH,
    WORKSPACE_STREAM_PATH,
};
pub use stream::{AgentStreamEvent, PermissionResponse, PermissionStreamEvent, WorkspaceStreamEvent};
