// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use kandev_backends::{FakeBackend, InstanceTransport};
use kandev_core::launch::LaunchRequest;

fn execution(id: &str, session: &str) -> Arc<Execution> {
    let backend = FakeBackend::new("standalone");
    let request = LaunchRequest::new("t-1", session, "p-1", "fix build");
    Execution::new(
        ExecutionId::new(id),
        &request,
        "claude".into(),
        backend.instance_for(&id.into()),
        0,
    )
}

fn container_execution(id: &str, session: &str, container_id: &str) -> Arc<Execution> {
    let request = LaunchRequest::new("t-1", session, "p-1", "fix build");
    let instance = kandev_backends::ExecutorInstance {
        instance_id: format!("inst-{id}").into(),
        backend_name: "docker".into(),
        transport: InstanceTransport::Container {
            container_id: container_id.to_string(),
            ip: "127.0.0.1".into(),
            port: 8080,
        },
        workspace_path: "/tmp/ws".into(),
        metadata: indexmap::IndexMap::new(),
    };
    Execution::new(ExecutionId::new(id), &request, "claude".into(), instance, 0)
}

#[test]
fn insert_and_lookup_by_all_indexes() {
    let store = ExecutionStore::new();
    let execution = container_execution("e-1", "s-1", "c-1");
    store.insert(execution.clone()).unwrap();

    assert_eq!(store.len(), 1);
    assert!(store.get(&"e-1".into()).is_some());
    assert!(store.get_by_session(&"s-1".into()).is_some());
    assert!(store.get_by_container("c-1").is_some());
    assert!(store.get(&"other".into()).is_none());
}

#[test]
fn second_execution_for_session_is_rejected() {
    let store = ExecutionStore::new();
    store.insert(execution("e-1", "s-1")).unwrap();

    let err = store.insert(execution("e-2", "s-1")).unwrap_err();
    assert!(matches!(err, LifecycleError::SessionOccupied(s) if s == "s-1"));
    // the original is untouched
    assert_eq!(store.get_by_session(&"s-1".into()).unwrap().id, "e-1");
    assert_eq!(store.len(), 1);
}

#[test]
fn remove_cleans_every_index() {
    let store = ExecutionStore::new();
    let execution = container_execution("e-1", "s-1", "c-1");
    store.insert(execution).unwrap();

    let removed = store.remove(&"e-1".into()).unwrap();
    assert_eq!(removed.id, "e-1");
    assert!(store.is_empty());
    assert!(store.get_by_session(&"s-1".into()).is_none());
    assert!(store.get_by_container("c-1").is_none());

    // removal is idempotent
    assert!(store.remove(&"e-1".into()).is_none());
}

#[test]
fn remove_frees_the_session_for_reuse() {
    let store = ExecutionStore::new();
    store.insert(execution("e-1", "s-1")).unwrap();
    store.remove_by_session(&"s-1".into()).unwrap();
    store.insert(execution("e-2", "s-1")).unwrap();
    assert_eq!(store.get_by_session(&"s-1".into()).unwrap().id, "e-2");
}

#[test]
fn all_returns_every_execution() {
    let store = ExecutionStore::new();
    store.insert(execution("e-1", "s-1")).unwrap();
    store.insert(execution("e-2", "s-2")).unwrap();
    let mut ids: Vec<String> = store.all().iter().map(|e| e.id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["e-1", "e-2"]);
}
