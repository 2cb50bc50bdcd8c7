// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;
use std::sync::Arc;

use airstate_types::{AirStateError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::{Digest, KvError, ScriptBody, ScriptEffect, ScriptName, ScriptedKv};

/// Process-wide singleton: holds each script's body and its
/// currently-cached digest, uploading once at construction and reloading on
/// a `NOSCRIPT`-equivalent miss. Construction failure is fatal at boot —
/// the service cannot serve mutations without it.
pub struct ScriptRuntime<K: ScriptedKv> {
    kv: Arc<K>,
    bodies: HashMap<ScriptName, ScriptBody>,
    digests: RwLock<HashMap<ScriptName, Digest>>,
    /// Serializes the reload-on-miss path per script: the digest map is
    /// read-only thereafter, except on this retry path.
    reload_locks: HashMap<ScriptName, AsyncMutex<()>>,
}

impl<K: ScriptedKv> ScriptRuntime<K> {
    /// Uploads all four scripts once. Any upload failure is returned to the
    /// caller, who is expected to treat it as fatal at boot.
    pub async fn init(kv: Arc<K>, bodies: HashMap<ScriptName, ScriptBody>) -> Result<Self> {
        let mut digests = HashMap::with_capacity(bodies.len());
        let mut reload_locks = HashMap::with_capacity(bodies.len());
        for (name, body) in &bodies {
            let digest = kv.load_script(*name, body.clone()).await.map_err(|e| {
                AirStateError::Internal(format!("failed to upload script '{name}' at boot: {e}"))
            })?;
            info!(script = %name, digest = %digest, "uploaded script");
            digests.insert(*name, digest);
            reload_locks.insert(*name, AsyncMutex::new(()));
        }
        Ok(Self { kv, bodies, digests: RwLock::new(digests), reload_locks })
    }

    /// Evaluates the named script against `storage_key`/`counter_key` with
    /// `args`, reloading and retrying exactly once on a cache miss.
    pub async fn execute(
        &self,
        name: ScriptName,
        storage_key: &str,
        counter_key: &str,
        args: Vec<Bytes>,
    ) -> Result<ScriptEffect> {
        let digest = self.current_digest(name);
        match self.kv.eval_script(&digest, storage_key, counter_key, args.clone()).await {
            Ok(effect) => Ok(effect),
            Err(KvError::NoScript) => self.reload_and_retry(name, storage_key, counter_key, args).await,
            Err(KvError::Backend(msg)) => Err(AirStateError::Internal(msg)),
            Err(KvError::Script(e)) => Err(e),
        }
    }

    fn current_digest(&self, name: ScriptName) -> Digest {
        self.digests
            .read()
            .get(&name)
            .cloned()
            .unwrap_or_else(|| unreachable!("script '{name}' registered at init"))
    }

    async fn reload_and_retry(
        &self,
        name: ScriptName,
        storage_key: &str,
        counter_key: &str,
        args: Vec<Bytes>,
    ) -> Result<ScriptEffect> {
        let _guard = self.reload_locks.get(&name).expect("script registered at init").lock().await;

        // Another caller may have already reloaded while we waited.
        let stale = self.current_digest(name);
        let digest = match self
            .kv
            .eval_script(&stale, storage_key, counter_key, args.clone())
            .await
        {
            Ok(effect) => return Ok(effect),
            Err(KvError::NoScript) => {
                warn!(script = %name, "script cache miss, reloading");
                let body = self.bodies.get(&name).expect("script registered at init");
                let fresh = self
                    .kv
                    .load_script(name, body.clone())
                    .await
                    .map_err(|e| AirStateError::Internal(format!("failed to reload script '{name}': {e}")))?;
                self.digests.write().insert(name, fresh.clone());
                fresh
            }
            Err(KvError::Backend(msg)) => return Err(AirStateError::Internal(msg)),
            Err(KvError::Script(e)) => return Err(e),
        };

        match self.kv.eval_script(&digest, storage_key, counter_key, args).await {
            Ok(effect) => Ok(effect),
            Err(KvError::NoScript) => {
                Err(AirStateError::Internal(format!("script '{name}' missing immediately after reload")))
            }
            Err(KvError::Backend(msg)) => Err(AirStateError::Internal(msg)),
            Err(KvError::Script(e)) => Err(e),
        }
    }

    pub async fn get_raw(&self, key: &str) -> Result<Option<Bytes>> {
        self.kv.get_raw(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKv;

    fn noop_body() -> ScriptBody {
        Arc::new(|current, counter, _args| {
            Ok(ScriptEffect { new_value: current, new_counter: counter, result: serde_json::Value::Null })
        })
    }

    #[tokio::test]
    async fn retries_exactly_once_after_cache_miss() {
        let kv = Arc::new(MemoryKv::new());
        let mut bodies = HashMap::new();
        bodies.insert(ScriptName::Replace, noop_body());
        bodies.insert(ScriptName::Remove, noop_body());
        bodies.insert(ScriptName::DeepMerge, noop_body());
        bodies.insert(ScriptName::AtomicOps, noop_body());
        let runtime = ScriptRuntime::init(kv.clone(), bodies).await.unwrap();

        kv.evict_script_for_test(ScriptName::Replace);

        let result = runtime.execute(ScriptName::Replace, "app:server-state:k:state", "app:server-state:k:state:update-count", vec![]).await;
        assert!(result.is_ok());
    }
}
