// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-turn streaming state: message buffers, the completion slot, and
//! the shapes shared between stream events and bus payloads.
//!
//! The streaming-identity discipline lives here: `current_message_id` and
//! `current_thinking_id` keep chunks appending to the same message bubble
//! until a tool call or completion flushes the buffers, at which point
//! both ids are cleared so the next chunk starts a new message.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// A slash command advertised by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Outcome of one prompt turn, delivered through the completion slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCompletion {
    pub stop_reason: String,
    pub is_error: bool,
    pub error: Option<String>,
    /// Final buffered text for turns that never streamed; empty otherwise.
    pub message: String,
}

impl TurnCompletion {
    /// Non-error completion; a missing stop reason defaults to `end_turn`.
    pub fn finished(stop_reason: Option<String>) -> Self {
        Self {
            stop_reason: stop_reason.unwrap_or_else(|| "end_turn".to_string()),
            is_error: false,
            error: None,
            message: String::new(),
        }
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            stop_reason: "error".to_string(),
            is_error: true,
            error: Some(message.into()),
            message: String::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Capacity-1 completion signal.
///
/// `signal` never blocks: a pending undelivered value is overwritten. The
/// prompt round-trip calls `drain` before dispatch and `wait` after, so a
/// stale completion from a cancelled turn can never satisfy a new prompt.
#[derive(Debug, Default)]
pub struct CompletionSlot {
    value: Mutex<Option<TurnCompletion>>,
    notify: Notify,
}

impl CompletionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a completion, discarding any undelivered prior value.
    pub fn signal(&self, completion: TurnCompletion) {
        *self.value.lock() = Some(completion);
        self.notify.notify_one();
    }

    /// Discard any pending value.
    pub fn drain(&self) {
        *self.value.lock() = None;
    }

    /// Wait for the next completion.
    pub async fn wait(&self) -> TurnCompletion {
        loop {
            if let Some(value) = self.value.lock().take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Take a pending value without waiting.
    pub fn try_take(&self) -> Option<TurnCompletion> {
        self.value.lock().take()
    }
}

/// Streaming text buffers for one execution.
///
/// Mutated only under the execution's message lock. `last_activity_ms`
/// advances on every incoming agent event, streaming or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBuffers {
    pub message: String,
    pub thinking: String,
    pub current_message_id: String,
    pub current_thinking_id: String,
    pub last_activity_ms: u64,
}

impl MessageBuffers {
    /// Reset for a new prompt turn.
    pub fn clear(&mut self) {
        self.message.clear();
        self.thinking.clear();
        self.current_message_id.clear();
        self.current_thinking_id.clear();
    }

    /// Clear the streaming identities so the next chunk opens a new message.
    pub fn clear_stream_ids(&mut self) {
        self.current_message_id.clear();
        self.current_thinking_id.clear();
    }
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
