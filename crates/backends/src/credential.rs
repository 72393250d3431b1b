// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store seam.
//!
//! The real store lives outside the core; backends only need
//! `get(key) → value | missing` to resolve an agent's required env.

use indexmap::IndexMap;

/// External credential store: `get(key) → value | missing`.
pub trait CredentialStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
}

/// Store backed by the orchestrator's own process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore;

impl CredentialStore for EnvCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Resolve an agent's required env var names through the store.
///
/// Missing keys are logged and skipped; the agent surfaces its own error
/// if it genuinely cannot run without one.
pub fn resolve_required_env(
    store: &dyn CredentialStore,
    required: &[String],
) -> IndexMap<String, String> {
    let mut resolved = IndexMap::new();
    for key in required {
        match store.get(key) {
            Some(value) => {
                resolved.insert(key.clone(), value);
            }
            None => {
                tracing::warn!(%key, "required credential missing; not injecting");
            }
        }
    }
    resolved
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
