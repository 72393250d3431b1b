// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client for the per-session control daemon (`agentctl`).
//!
//! The daemon exposes a small HTTP API (health, configure, start, stop)
//! and three WebSocket streams (agent events, permissions, workspace).
//! The engine consumes everything through the [`ControlClient`] trait so
//! tests can substitute an in-process fake.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
pub mod http;
mod stream;
mod ws;

pub use client::{ControlClient, HttpControlClient};
pub use stream::{AgentStream, AgentStreamDriver, EventStream, StreamCommand};

use thiserror::Error;

/// Errors from control-daemon operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("http error: {0}")]
    Http(String),
    #[error("request timed out")]
    Timeout,
    #[error("agent stream not connected")]
    StreamNotConnected,
    #[error("method not found")]
    MethodNotFound,
    #[error("daemon error: {0}")]
    Remote(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error(transparent)]
    Wire(#[from] kandev_wire::WireError),
}

impl ControlError {
    /// Whether a retry through stream reconnection could help.
    pub fn is_stream_disconnect(&self) -> bool {
        matches!(self, Self::StreamNotConnected)
    }
}
