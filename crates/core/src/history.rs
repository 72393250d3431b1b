// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session prompt history used for resume-context injection.
//!
//! Agents without native session loading get a synthetic prefix on the
//! first prompt after a resume: a system preamble, the rolling summary
//! (when one was recorded), and the prior user prompts.

use crate::id::{SessionId, TaskId};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct HistoryEntry {
    prompts: Vec<String>,
    summary: Option<String>,
}

/// Thread-safe store of per-session user prompts plus a rolling
/// assistant-produced summary.
#[derive(Debug, Default)]
pub struct SessionHistory {
    entries: Mutex<HashMap<SessionId, HistoryEntry>>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user prompt to a session's history.
    pub fn record_prompt(&self, session_id: &SessionId, prompt: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries
            .entry(session_id.clone())
            .or_default()
            .prompts
            .push(prompt.into());
    }

    /// Replace the rolling summary for a session.
    pub fn set_summary(&self, session_id: &SessionId, summary: impl Into<String>) {
        let mut entries = self.entries.lock();
        entries.entry(session_id.clone()).or_default().summary = Some(summary.into());
    }

    /// Whether any history exists for a session.
    pub fn has_history(&self, session_id: &SessionId) -> bool {
        let entries = self.entries.lock();
        entries
            .get(session_id)
            .is_some_and(|e| !e.prompts.is_empty() || e.summary.is_some())
    }

    /// Render a session's history for prompt injection. `None` when no
    /// history was recorded.
    pub fn render(&self, session_id: &SessionId) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(session_id)?;
        if entry.prompts.is_empty() && entry.summary.is_none() {
            return None;
        }

        let mut out = String::new();
        if let Some(summary) = &entry.summary {
            out.push_str("## Conversation summary\n");
            out.push_str(summary);
            out.push('\n');
        }
        if !entry.prompts.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("## Prior user prompts\n");
            for prompt in &entry.prompts {
                out.push_str("- ");
                out.push_str(prompt);
                out.push('\n');
            }
        }
        Some(out)
    }

    /// Drop a session's history.
    pub fn clear(&self, session_id: &SessionId) {
        self.entries.lock().remove(session_id);
    }
}

/// System preamble prepended to the first prompt after a resume.
pub fn system_preamble(task_id: &TaskId, session_id: &SessionId) -> String {
    format!(
        "You are resuming work on Kandev task {task_id} (session {session_id}). \
         The context below summarizes the conversation so far. Continue from it \
         without repeating completed work.\n\n"
    )
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
