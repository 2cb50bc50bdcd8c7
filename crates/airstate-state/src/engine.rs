// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;
use std::sync::Arc;

use airstate_bus::{EventBus, MutationEvent, NULL_PAYLOAD};
use airstate_kv::{ScriptBody, ScriptEffect, ScriptName, ScriptRuntime, ScriptedKv};
use airstate_types::{AirStateError, AppId, Document, Result, StateKey, counter_key, storage_key};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::pure::{AtomicOpFailure, apply_atomic_ops, deep_merge, serialize_replace_value, validate_atomic_ops_shape};

/// Exposes Replace / Remove / DeepMerge / AtomicOps. Generic over the KV
/// and bus trait boundaries so the binary can wire either the in-memory
/// reference backends or a production implementation.
pub struct StateEngine<K: ScriptedKv, B: EventBus> {
    runtime: ScriptRuntime<K>,
    bus: Arc<B>,
}

impl<K: ScriptedKv, B: EventBus> StateEngine<K, B> {
    /// Uploads the four scripts once. Failure here is fatal at boot: the
    /// service cannot serve mutations without them.
    pub async fn new(kv: Arc<K>, bus: Arc<B>) -> Result<Self> {
        let mut bodies: HashMap<ScriptName, ScriptBody> = HashMap::with_capacity(4);
        bodies.insert(ScriptName::Replace, replace_body());
        bodies.insert(ScriptName::Remove, remove_body());
        bodies.insert(ScriptName::DeepMerge, deep_merge_body());
        bodies.insert(ScriptName::AtomicOps, atomic_ops_body());
        let runtime = ScriptRuntime::init(kv, bodies).await?;
        Ok(Self { runtime, bus })
    }

    #[instrument(name = "state::replace", level = "debug", skip(self, value))]
    pub async fn replace(&self, app_id: &AppId, key: &StateKey, value: Document) -> Result<u64> {
        let storage_key = storage_key(app_id, key);
        let counter_key = counter_key(&storage_key);
        let arg = serialize_replace_value(&value);

        let effect = self
            .runtime
            .execute(ScriptName::Replace, &storage_key, &counter_key, vec![arg])
            .await?;

        let payload = encode(&value)?;
        self.publish(app_id, key, payload, effect.new_counter).await;
        Ok(effect.new_counter)
    }

    #[instrument(name = "state::remove", level = "debug", skip(self))]
    pub async fn remove(&self, app_id: &AppId, key: &StateKey) -> Result<u64> {
        let storage_key = storage_key(app_id, key);
        let counter_key = counter_key(&storage_key);

        let effect = self
            .runtime
            .execute(ScriptName::Remove, &storage_key, &counter_key, vec![])
            .await?;

        self.publish(app_id, key, Bytes::from_static(NULL_PAYLOAD), effect.new_counter).await;
        Ok(effect.new_counter)
    }

    #[instrument(name = "state::deep_merge", level = "debug", skip(self, value))]
    pub async fn deep_merge(&self, app_id: &AppId, key: &StateKey, value: Document) -> Result<(u64, Document)> {
        let storage_key = storage_key(app_id, key);
        let counter_key = counter_key(&storage_key);
        let arg = encode(&value)?;

        let effect = self
            .runtime
            .execute(ScriptName::DeepMerge, &storage_key, &counter_key, vec![arg])
            .await?;

        let (counter, merged) = parse_deep_merge_result(&effect.result)?;
        let payload = encode(&merged)?;
        self.publish(app_id, key, payload, counter).await;
        Ok((counter, merged))
    }

    #[instrument(name = "state::atomic_ops", level = "debug", skip(self, ops))]
    pub async fn atomic_ops(&self, app_id: &AppId, key: &StateKey, ops: Document) -> Result<(u64, Document)> {
        validate_atomic_ops_shape(&ops).map_err(shape_to_error)?;

        let storage_key = storage_key(app_id, key);
        let counter_key = counter_key(&storage_key);
        let arg = encode(&ops)?;

        let effect = self
            .runtime
            .execute(ScriptName::AtomicOps, &storage_key, &counter_key, vec![arg])
            .await?;

        match parse_atomic_ops_result(&effect.result)? {
            AtomicOpsOutcome::Success { update_count, value } => {
                let payload = encode(&value)?;
                self.publish(app_id, key, payload, update_count).await;
                Ok((update_count, value))
            }
            AtomicOpsOutcome::Failure { error } => Err(AirStateError::Conflict(error)),
        }
    }

    /// Raw, script-bypassing read used by a subscription's snapshot.
    pub async fn get_raw(&self, app_id: &AppId, key: &StateKey) -> Result<Option<Document>> {
        let storage_key = storage_key(app_id, key);
        match self.runtime.get_raw(&storage_key).await? {
            None => Ok(None),
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| AirStateError::Internal(format!("stored document is not valid JSON: {e}"))),
        }
    }

    async fn publish(&self, app_id: &AppId, key: &StateKey, payload: Bytes, update_count: u64) {
        let event = MutationEvent::for_key(app_id, key, payload, update_count);
        // Bus publish failures are logged and swallowed: the mutation has
        // already committed to the KV.
        if let Err(err) = self.bus.publish(&event).await {
            warn!(subject = %event.subject, %err, "failed to publish mutation event");
        }
    }
}

fn shape_to_error(failure: AtomicOpFailure) -> AirStateError {
    match failure {
        AtomicOpFailure::Shape(m) => AirStateError::BadRequest(m),
        AtomicOpFailure::Conflict(m) => AirStateError::Conflict(m),
    }
}

fn encode(value: &Document) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| AirStateError::Internal(format!("failed to serialize document: {e}")))
}

/// Parses the `deep_merge` script's `[updateCount, mergedDocumentJson]`
/// heterogeneous tuple defensively, tolerating a backend that only hands
/// back loosely-typed values.
fn parse_deep_merge_result(result: &Value) -> Result<(u64, Document)> {
    let arr = result
        .as_array()
        .filter(|a| a.len() == 2)
        .ok_or_else(|| AirStateError::Internal("deep_merge script returned an unexpected shape".into()))?;

    let counter = arr[0]
        .as_u64()
        .ok_or_else(|| AirStateError::Internal("deep_merge script returned a non-integer update_count".into()))?;

    let merged_json = arr[1]
        .as_str()
        .ok_or_else(|| AirStateError::Internal("deep_merge script returned a non-string document".into()))?;

    let merged = serde_json::from_str(merged_json)
        .map_err(|e| AirStateError::Internal(format!("deep_merge script returned invalid JSON: {e}")))?;

    Ok((counter, merged))
}

enum AtomicOpsOutcome {
    Success { update_count: u64, value: Document },
    Failure { error: String },
}

/// Parses the `atomic_ops` script's `{success, value?, update_count?,
/// error?}` object defensively, tolerating a backend that only hands back
/// loosely-typed values.
fn parse_atomic_ops_result(result: &Value) -> Result<AtomicOpsOutcome> {
    let obj = result
        .as_object()
        .ok_or_else(|| AirStateError::Internal("atomic_ops script returned a non-object result".into()))?;

    match obj.get("success").and_then(Value::as_bool) {
        Some(true) => {
            let update_count = obj
                .get("update_count")
                .and_then(Value::as_u64)
                .ok_or_else(|| AirStateError::Internal("atomic_ops success result missing update_count".into()))?;
            let value = obj
                .get("value")
                .cloned()
                .ok_or_else(|| AirStateError::Internal("atomic_ops success result missing value".into()))?;
            Ok(AtomicOpsOutcome::Success { update_count, value })
        }
        Some(false) => {
            let error = obj
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("atomic-ops failed")
                .to_string();
            Ok(AtomicOpsOutcome::Failure { error })
        }
        None => Err(AirStateError::Internal("atomic_ops script result missing success flag".into())),
    }
}

fn replace_body() -> ScriptBody {
    Arc::new(|_current: Option<Bytes>, counter: u64, args: &[Bytes]| {
        let new_counter = counter + 1;
        Ok(ScriptEffect { new_value: args.first().cloned(), new_counter, result: json!(new_counter) })
    })
}

fn remove_body() -> ScriptBody {
    Arc::new(|_current: Option<Bytes>, counter: u64, _args: &[Bytes]| {
        let new_counter = counter + 1;
        Ok(ScriptEffect { new_value: None, new_counter, result: json!(new_counter) })
    })
}

fn deep_merge_body() -> ScriptBody {
    Arc::new(|current: Option<Bytes>, counter: u64, args: &[Bytes]| {
        let input: Document = serde_json::from_slice(&args[0])
            .map_err(|e| AirStateError::Internal(format!("deep_merge: invalid input: {e}")))?;
        let merged = deep_merge(current.as_deref(), &input);
        let new_counter = counter + 1;
        let merged_bytes = serde_json::to_vec(&merged)
            .map_err(|e| AirStateError::Internal(format!("deep_merge: failed to encode merged document: {e}")))?;
        let result = json!([new_counter, merged.to_string()]);
        Ok(ScriptEffect { new_value: Some(Bytes::from(merged_bytes)), new_counter, result })
    })
}

fn atomic_ops_body() -> ScriptBody {
    Arc::new(|current: Option<Bytes>, counter: u64, args: &[Bytes]| {
        let ops: Document = serde_json::from_slice(&args[0])
            .map_err(|e| AirStateError::Internal(format!("atomic_ops: invalid input: {e}")))?;

        let current_doc: Document = match &current {
            Some(bytes) if !bytes.is_empty() => {
                serde_json::from_slice(bytes).unwrap_or(Value::Object(Default::default()))
            }
            _ => Value::Object(Default::default()),
        };

        match apply_atomic_ops(&current_doc, &ops) {
            Ok(new_doc) => {
                let new_counter = counter + 1;
                let bytes = serde_json::to_vec(&new_doc).map_err(|e| {
                    AirStateError::Internal(format!("atomic_ops: failed to encode new document: {e}"))
                })?;
                let result = json!({"success": true, "value": new_doc, "update_count": new_counter});
                Ok(ScriptEffect { new_value: Some(Bytes::from(bytes)), new_counter, result })
            }
            Err(failure) => {
                let message = match failure {
                    AtomicOpFailure::Shape(m) => m,
                    AtomicOpFailure::Conflict(m) => m,
                };
                let result = json!({"success": false, "error": message});
                Ok(ScriptEffect { new_value: current, new_counter: counter, result })
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use airstate_bus::MemoryBus;
    use airstate_kv::MemoryKv;
    use serde_json::json;

    async fn engine() -> StateEngine<MemoryKv, MemoryBus> {
        let kv = Arc::new(MemoryKv::new());
        let bus = Arc::new(MemoryBus::new());
        StateEngine::new(kv, bus).await.unwrap()
    }

    #[tokio::test]
    async fn replace_then_get_raw_round_trips() {
        let engine = engine().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let counter = engine.replace(&app, &key, json!({"a": 1})).await.unwrap();
        assert_eq!(counter, 1);
        assert_eq!(engine.get_raw(&app, &key).await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn counter_monotonicity_across_mutations() {
        let engine = engine().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();

        let c1 = engine.replace(&app, &key, json!({"a": 1})).await.unwrap();
        let (c2, _) = engine.deep_merge(&app, &key, json!({"b": 2})).await.unwrap();
        let (c3, _) = engine.atomic_ops(&app, &key, json!({"$set": {"c": 3}})).await.unwrap();
        let c4 = engine.remove(&app, &key).await.unwrap();

        assert!(c1 < c2);
        assert!(c2 < c3);
        assert!(c3 < c4);
    }

    #[tokio::test]
    async fn atomicity_on_failure_leaves_document_and_counter_unchanged() {
        let engine = engine().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let c1 = engine.replace(&app, &key, json!({"xs": "not-array"})).await.unwrap();

        let err = engine.atomic_ops(&app, &key, json!({"$push": {"xs": 1}})).await.unwrap_err();
        assert!(matches!(err, AirStateError::Conflict(_)));

        assert_eq!(engine.get_raw(&app, &key).await.unwrap(), Some(json!({"xs": "not-array"})));
        // The only way to observe the counter is via another mutation's
        // delta; re-replacing should report the next counter after c1.
        let c2 = engine.replace(&app, &key, json!({"xs": "not-array"})).await.unwrap();
        assert_eq!(c2, c1 + 1);
    }

    #[tokio::test]
    async fn remove_emits_null_payload() {
        let engine = engine().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        engine.replace(&app, &key, json!({"a": 1})).await.unwrap();
        engine.remove(&app, &key).await.unwrap();
        assert_eq!(engine.get_raw(&app, &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn atomic_ops_bad_request_never_touches_the_script() {
        let engine = engine().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let err = engine.atomic_ops(&app, &key, json!({})).await.unwrap_err();
        assert!(matches!(err, AirStateError::BadRequest(_)));
    }
}
