// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! The four admin mutation endpoints. Each computes `{appId, key}` from the
//! path, delegates to the matching [`StateEngine`] operation, and renders
//! `{"message", "value"?}` on success or defers to [`ApiError`] on failure.

use std::sync::Arc;

use airstate_bus::EventBus;
use airstate_kv::ScriptedKv;
use airstate_types::{AirStateError, AppId, StateKey};
use axum::extract::{Path, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use crate::AdminServices;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct ValueBody {
    value: Value,
}

fn parse_ids(app_id: String, key: String) -> Result<(AppId, StateKey), ApiError> {
    let app_id = AppId::new(app_id)?;
    let key = StateKey::new(key)?;
    Ok((app_id, key))
}

#[instrument(name = "http::replace", level = "debug", skip(services, body))]
pub async fn replace<K: ScriptedKv, B: EventBus>(
    State(services): State<Arc<AdminServices<K, B>>>,
    Path((app_id, key)): Path<(String, String)>,
    Json(body): Json<ValueBody>,
) -> Result<Json<Value>, ApiError> {
    let (app_id, key) = parse_ids(app_id, key)?;
    services.engine.replace(&app_id, &key, body.value.clone()).await?;
    Ok(Json(json!({"message": "replaced", "value": body.value})))
}

#[instrument(name = "http::remove", level = "debug", skip(services))]
pub async fn remove<K: ScriptedKv, B: EventBus>(
    State(services): State<Arc<AdminServices<K, B>>>,
    Path((app_id, key)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let (app_id, key) = parse_ids(app_id, key)?;
    services.engine.remove(&app_id, &key).await?;
    Ok(Json(json!({"message": "removed"})))
}

#[instrument(name = "http::deep_merge", level = "debug", skip(services, body))]
pub async fn deep_merge<K: ScriptedKv, B: EventBus>(
    State(services): State<Arc<AdminServices<K, B>>>,
    Path((app_id, key)): Path<(String, String)>,
    Json(body): Json<ValueBody>,
) -> Result<Json<Value>, ApiError> {
    let (app_id, key) = parse_ids(app_id, key)?;
    let (_, merged) = services.engine.deep_merge(&app_id, &key, body.value).await?;
    Ok(Json(json!({"message": "merged", "value": merged})))
}

#[instrument(name = "http::atomic_ops", level = "debug", skip(services, ops))]
pub async fn atomic_ops<K: ScriptedKv, B: EventBus>(
    State(services): State<Arc<AdminServices<K, B>>>,
    Path((app_id, key)): Path<(String, String)>,
    Json(ops): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (app_id, key) = parse_ids(app_id, key)?;
    if !ops.is_object() {
        return Err(AirStateError::BadRequest("atomic-ops body must be a JSON object".into()).into());
    }
    let (_, value) = services.engine.atomic_ops(&app_id, &key, ops).await?;
    Ok(Json(json!({"message": "updated", "value": value})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use airstate_bus::MemoryBus;
    use airstate_kv::MemoryKv;
    use airstate_state::StateEngine;
    use axum::response::IntoResponse;

    async fn services() -> State<Arc<AdminServices<MemoryKv, MemoryBus>>> {
        let kv = Arc::new(MemoryKv::new());
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(StateEngine::new(kv, bus.clone()).await.unwrap());
        State(Arc::new(AdminServices { engine, bus }))
    }

    fn path(app_id: &str, key: &str) -> Path<(String, String)> {
        Path((app_id.to_string(), key.to_string()))
    }

    #[tokio::test]
    async fn replace_echoes_the_written_value() {
        let services = services().await;
        let Json(body) = replace(services, path("appA", "k1"), Json(ValueBody { value: json!({"a": 1}) })).await.unwrap();
        assert_eq!(body["message"], "replaced");
        assert_eq!(body["value"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn remove_reports_no_value() {
        let services = services().await;
        replace(services.clone(), path("appA", "k1"), Json(ValueBody { value: json!({"a": 1}) })).await.unwrap();
        let Json(body) = remove(services, path("appA", "k1")).await.unwrap();
        assert_eq!(body["message"], "removed");
        assert!(body.get("value").is_none());
    }

    #[tokio::test]
    async fn deep_merge_returns_the_merged_document() {
        let services = services().await;
        replace(services.clone(), path("appA", "k1"), Json(ValueBody { value: json!({"a": {"b": 1, "c": 2}}) }))
            .await
            .unwrap();
        let Json(body) =
            deep_merge(services, path("appA", "k1"), Json(ValueBody { value: json!({"a": {"b": 9}}) })).await.unwrap();
        assert_eq!(body["value"], json!({"a": {"b": 9, "c": 2}}));
    }

    #[tokio::test]
    async fn atomic_ops_rejects_a_non_object_body() {
        let services = services().await;
        let err = atomic_ops(services, path("appA", "k1"), Json(json!([1, 2]))).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn atomic_ops_applies_operators_and_returns_update_count() {
        let services = services().await;
        replace(services.clone(), path("appA", "k1"), Json(ValueBody { value: json!({"xs": []}) })).await.unwrap();
        let Json(body) = atomic_ops(services, path("appA", "k1"), Json(json!({"$push": {"xs": 1}}))).await.unwrap();
        assert_eq!(body["value"], json!({"xs": [1]}));
    }

    #[tokio::test]
    async fn empty_path_segment_is_a_bad_request() {
        let services = services().await;
        let err = remove(services, path("", "k1")).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }
}
