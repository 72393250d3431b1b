// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named registry of executor backends.

use crate::{BackendError, ExecutorBackend, ExecutorInstance};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Registry of backend implementations keyed by name.
///
/// Backends are registered once at startup; lookups are lock-cheap. No
/// backend method is ever invoked while the registry lock is held.
#[derive(Default)]
pub struct ExecutorRegistry {
    backends: RwLock<IndexMap<String, Arc<dyn ExecutorBackend>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name. Re-registration replaces.
    pub fn register(&self, backend: Arc<dyn ExecutorBackend>) {
        let name = backend.name().to_string();
        self.backends.write().insert(name, backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutorBackend>> {
        self.backends.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.read().keys().cloned().collect()
    }

    fn all(&self) -> Vec<Arc<dyn ExecutorBackend>> {
        self.backends.read().values().cloned().collect()
    }

    /// Health-check every backend concurrently.
    pub async fn health_check_all(&self) -> Vec<(String, Result<(), BackendError>)> {
        let mut set = JoinSet::new();
        for backend in self.all() {
            set.spawn(async move {
                let name = backend.name().to_string();
                let result = backend.health_check().await;
                (name, result)
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(entry) = joined {
                results.push(entry);
            }
        }
        results
    }

    /// Ask every backend for instances it can prove are still alive.
    ///
    /// Per-backend failures are logged and skipped so one broken backend
    /// cannot block recovery of the others.
    pub async fn recover_all(&self) -> Vec<ExecutorInstance> {
        let mut recovered = Vec::new();
        for backend in self.all() {
            match backend.recover_instances().await {
                Ok(instances) => {
                    if !instances.is_empty() {
                        tracing::info!(
                            backend = backend.name(),
                            count = instances.len(),
                            "recovered live instances"
                        );
                    }
                    recovered.extend(instances);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "recover failed");
                }
            }
        }
        recovered
    }

    /// Close every backend that holds resources.
    pub async fn close_all(&self) {
        for backend in self.all() {
            backend.close().await;
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
