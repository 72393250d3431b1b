// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn execution_id_display() {
    let id = ExecutionId::new("exec-1");
    assert_eq!(id.to_string(), "exec-1");
}

#[test]
fn session_id_equality() {
    let a = SessionId::new("s-1");
    let b = SessionId::new("s-1");
    let c = SessionId::new("s-2");

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, "s-1");
}

#[test]
fn id_from_str() {
    let id: TaskId = "task".into();
    assert_eq!(id.as_str(), "task");
}

#[test]
fn id_serde_transparent() {
    let id = ProfileId::new("profile-x");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"profile-x\"");

    let parsed: ProfileId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, id);
}

#[test]
fn generated_ids_are_unique() {
    let a = ExecutionId::generate();
    let b = ExecutionId::generate();
    assert_ne!(a, b);
    assert_eq!(a.as_str().len(), 32);
}

#[test]
fn empty_id() {
    let id = WorktreeId::new("");
    assert!(id.is_empty());
    assert!(!InstanceId::generate().is_empty());
}

#[test]
fn borrow_str_lookup() {
    use std::collections::HashMap;

    let mut map: HashMap<SessionId, u32> = HashMap::new();
    map.insert(SessionId::new("s-1"), 7);
    assert_eq!(map.get("s-1"), Some(&7));
}
