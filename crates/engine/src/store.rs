// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thread-safe index of live executions.
//!
//! One map keyed by execution id plus two secondary indexes (session,
//! container). Writers take the write lock, lookups the read lock, and
//! no external code ever runs while either is held. The store enforces
//! the one-execution-per-session invariant at insert time.

use crate::execution::Execution;
use crate::LifecycleError;
use kandev_core::id::{ExecutionId, SessionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    by_id: HashMap<ExecutionId, Arc<Execution>>,
    by_session: HashMap<SessionId, ExecutionId>,
    by_container: HashMap<String, ExecutionId>,
}

#[derive(Default)]
pub struct ExecutionStore {
    inner: RwLock<Inner>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution. Fails when its session already has one.
    pub fn insert(&self, execution: Arc<Execution>) -> Result<(), LifecycleError> {
        let mut inner = self.inner.write();
        if inner.by_session.contains_key(&execution.session_id) {
            return Err(LifecycleError::SessionOccupied(execution.session_id.clone()));
        }
        inner
            .by_session
            .insert(execution.session_id.clone(), execution.id.clone());
        if let Some(container_id) = execution.instance.container_id() {
            inner
                .by_container
                .insert(container_id.to_string(), execution.id.clone());
        }
        inner.by_id.insert(execution.id.clone(), execution);
        Ok(())
    }

    pub fn get(&self, id: &ExecutionId) -> Option<Arc<Execution>> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn get_by_session(&self, session_id: &SessionId) -> Option<Arc<Execution>> {
        let inner = self.inner.read();
        let id = inner.by_session.get(session_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn get_by_container(&self, container_id: &str) -> Option<Arc<Execution>> {
        let inner = self.inner.read();
        let id = inner.by_container.get(container_id)?;
        inner.by_id.get(id).cloned()
    }

    /// Remove by id, cleaning both indexes. Idempotent.
    pub fn remove(&self, id: &ExecutionId) -> Option<Arc<Execution>> {
        let mut inner = self.inner.write();
        let execution = inner.by_id.remove(id)?;
        inner.by_session.remove(&execution.session_id);
        if let Some(container_id) = execution.instance.container_id() {
            inner.by_container.remove(container_id);
        }
        Some(execution)
    }

    /// Remove by session. Idempotent.
    pub fn remove_by_session(&self, session_id: &SessionId) -> Option<Arc<Execution>> {
        let id = self.inner.read().by_session.get(session_id).cloned()?;
        self.remove(&id)
    }

    pub fn all(&self) -> Vec<Arc<Execution>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
