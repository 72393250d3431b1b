// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the lifecycle specs.

pub use kandev_core::launch::LaunchRequest;
pub use kandev_core::status::ExecutionStatus;
pub use kandev_engine::test_support::{FakeControlClient, Harness};
pub use kandev_engine::LifecycleError;
pub use kandev_wire::AgentStreamEvent;
pub use std::sync::Arc;
pub use std::time::Duration;

pub fn request(session: &str) -> LaunchRequest {
    LaunchRequest::new("T", session, "profile-1", "fix build").workspace_path("/tmp/ws")
}

/// Answer every prompt the scripted daemon sees with a completion.
pub fn auto_complete(client: Arc<FakeControlClient>) {
    tokio::spawn(async move {
        let mut answered = 0;
        loop {
            let seen = client.prompts().len();
            if seen > answered {
                client
                    .send_event(AgentStreamEvent::Complete { stop_reason: None, error: None })
                    .await;
                answered = seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
}

/// Keep only the event names in `interesting`, in publish order.
pub fn filtered_names(harness: &Harness, interesting: &[&str]) -> Vec<String> {
    harness
        .bus
        .event_names()
        .into_iter()
        .filter(|name| interesting.contains(name))
        .map(str::to_string)
        .collect()
}
