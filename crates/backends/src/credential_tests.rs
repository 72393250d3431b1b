// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use parking_lot::Mutex;
use std::collections::HashMap;

struct MapStore(Mutex<HashMap<String, String>>);

impl MapStore {
    fn with(pairs: &[(&str, &str)]) -> Self {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self(Mutex::new(map))
    }
}

impl CredentialStore for MapStore {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().get(key).cloned()
    }
}

#[test]
fn resolves_present_keys_in_order() {
    let store = MapStore::with(&[("API_KEY", "sk-1"), ("OTHER", "x")]);
    let resolved = resolve_required_env(
        &store,
        &["API_KEY".to_string(), "OTHER".to_string()],
    );
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved.get_index(0), Some((&"API_KEY".to_string(), &"sk-1".to_string())));
}

#[test]
fn missing_keys_are_skipped() {
    let store = MapStore::with(&[("API_KEY", "sk-1")]);
    let resolved = resolve_required_env(
        &store,
        &["API_KEY".to_string(), "MISSING".to_string()],
    );
    assert_eq!(resolved.len(), 1);
    assert!(resolved.get("MISSING").is_none());
}

#[test]
fn empty_requirements_resolve_empty() {
    let store = MapStore::with(&[]);
    assert!(resolve_required_env(&store, &[]).is_empty());
}

#[test]
#[serial_test::serial]
fn env_store_reads_process_env() {
    std::env::set_var("KANDEV_CREDENTIAL_TEST_KEY", "value-1");
    let store = EnvCredentialStore;
    assert_eq!(
        store.get("KANDEV_CREDENTIAL_TEST_KEY").as_deref(),
        Some("value-1")
    );
    std::env::remove_var("KANDEV_CREDENTIAL_TEST_KEY");
    assert!(store.get("KANDEV_CREDENTIAL_TEST_KEY").is_none());
}
