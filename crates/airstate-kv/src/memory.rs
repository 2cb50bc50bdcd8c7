// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use airstate_types::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::{Digest, KvError, ScriptBody, ScriptEffect, ScriptName};

struct StoredScript {
    name: ScriptName,
    body: ScriptBody,
}

/// In-process reference implementation of [`crate::ScriptedKv`]. Per-key
/// atomicity is enforced with one lazily created `tokio::sync::Mutex` per
/// storage key, which is the in-process analogue of the atomic server-side
/// script execution a real backend is required to provide.
#[derive(Default)]
pub struct MemoryKv {
    documents: RwLock<HashMap<String, Bytes>>,
    counters: RwLock<HashMap<String, u64>>,
    key_locks: RwLock<HashMap<String, Arc<AsyncMutex<()>>>>,
    scripts: RwLock<HashMap<String, StoredScript>>,
    next_digest: AtomicU64,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, storage_key: &str) -> Arc<AsyncMutex<()>> {
        if let Some(lock) = self.key_locks.read().get(storage_key) {
            return lock.clone();
        }
        self.key_locks
            .write()
            .entry(storage_key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Test-only hook simulating a backend evicting a cached script, which
    /// is what a real KV's `NOSCRIPT` error represents.
    #[doc(hidden)]
    pub fn evict_script_for_test(&self, name: ScriptName) {
        self.scripts.write().retain(|_, s| s.name != name);
    }
}

#[async_trait::async_trait]
impl crate::ScriptedKv for MemoryKv {
    async fn load_script(&self, name: ScriptName, body: ScriptBody) -> Result<Digest> {
        let id = self.next_digest.fetch_add(1, Ordering::Relaxed);
        let digest = Digest(format!("{name}-{id}"));
        self.scripts.write().insert(digest.0.clone(), StoredScript { name, body });
        Ok(digest)
    }

    async fn eval_script(
        &self,
        digest: &Digest,
        storage_key: &str,
        counter_key: &str,
        args: Vec<Bytes>,
    ) -> std::result::Result<ScriptEffect, KvError> {
        // Clone the body out from under the registry lock before awaiting
        // the per-key mutex, so script execution never holds the scripts
        // table lock.
        let body = {
            let scripts = self.scripts.read();
            match scripts.get(&digest.0) {
                Some(stored) => stored.body.clone(),
                None => return Err(KvError::NoScript),
            }
        };

        let lock = self.lock_for(storage_key);
        let _guard = lock.lock().await;

        let current = self.documents.read().get(storage_key).cloned();
        let counter = self.counters.read().get(counter_key).copied().unwrap_or(0);

        let effect = body(current, counter, &args).map_err(KvError::Script)?;

        match &effect.new_value {
            Some(bytes) => {
                self.documents.write().insert(storage_key.to_string(), bytes.clone());
            }
            None => {
                self.documents.write().remove(storage_key);
            }
        }
        self.counters.write().insert(counter_key.to_string(), effect.new_counter);

        Ok(effect)
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.documents.read().get(key).cloned())
    }
}
