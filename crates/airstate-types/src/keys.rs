// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use blake2::{Blake2b, Digest, digest::consts::U32};

use crate::ids::{AppId, StateKey};

type Blake2b256 = Blake2b<U32>;

/// `"{appId}:server-state:{key}:state"`.
pub fn storage_key(app_id: &AppId, key: &StateKey) -> String {
    format!("{app_id}:server-state:{key}:state")
}

/// `"{storageKey}:update-count"`.
pub fn counter_key(storage_key: &str) -> String {
    format!("{storage_key}:update-count")
}

/// `"server-state.{appId}_{blake2b256hex(key)}"`. The hash exists
/// so subjects never leak user-supplied characters onto the bus.
pub fn subject_for(app_id: &AppId, key: &StateKey) -> String {
    let mut hasher = Blake2b256::new();
    hasher.update(key.as_str().as_bytes());
    let digest = hasher.finalize();
    format!("server-state.{app_id}_{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_counter_keys_match_layout() {
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let storage = storage_key(&app, &key);
        assert_eq!(storage, "appA:server-state:k1:state");
        assert_eq!(counter_key(&storage), "appA:server-state:k1:state:update-count");
    }

    #[test]
    fn subject_is_stable_and_hashes_the_key() {
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let subject = subject_for(&app, &key);
        assert!(subject.starts_with("server-state.appA_"));
        assert_eq!(subject, subject_for(&app, &key));
        assert!(!subject.contains(' '));
    }

    #[test]
    fn subject_isolates_distinct_keys_and_apps() {
        let key1 = StateKey::new("k1").unwrap();
        let key2 = StateKey::new("k2").unwrap();
        let app_a = AppId::new("appA").unwrap();
        let app_b = AppId::new("appB").unwrap();

        assert_ne!(subject_for(&app_a, &key1), subject_for(&app_a, &key2));
        assert_ne!(subject_for(&app_a, &key1), subject_for(&app_b, &key1));
    }
}
