// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! The two built-in procedures bound to the transport: a subscription that
//! streams session updates, and a mutation that registers interest in a
//! set of keys and returns their current snapshot.

use std::sync::Arc;

use airstate_bus::{BusMessage, EventBus};
use airstate_kv::ScriptedKv;
use airstate_session::SessionRegistry;
use airstate_types::{AirStateError, AppId, Document, Result, SessionId, StateKey, subject_for};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::instrument;

use crate::router::{Context, Emit, ProcedureRouter, Services};

pub const SERVER_STATE: &str = "serverState.serverState";
pub const WATCH_KEYS: &str = "serverState.watchKeys";

/// Registers both built-in procedures on `router`.
pub fn register<K: ScriptedKv, B: EventBus>(router: ProcedureRouter<K, B>) -> ProcedureRouter<K, B> {
    router
        .subscription(SERVER_STATE, |ctx, emit| Box::pin(server_state(ctx, emit)))
        .mutation(WATCH_KEYS, |ctx, input| Box::pin(watch_keys(ctx, input)))
}

/// Drops a session and cancels every bus subscription it holds, regardless
/// of why the owning task exited: normal return, procedure error, or the
/// connection layer dropping the future on cancellation.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<airstate_session::Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.cancel_all();
        self.registry.delete(self.session.id());
    }
}

#[instrument(name = "rpc::server_state", level = "debug", skip_all)]
async fn server_state<K: ScriptedKv, B: EventBus>(ctx: Context<K, B>, emit: Emit) -> Result<()> {
    let (session, mut updates) = ctx.services.sessions.create();
    let _guard = SessionGuard { registry: ctx.services.sessions.clone(), session: session.clone() };

    emit.data(json!({"type": "session-info", "session_id": session.id().as_str()})).await;
    emit.data(json!({"type": "init"})).await;

    while let Some(update) = updates.recv().await {
        emit.data(json!({
            "type": "updates",
            "updates": [{"key": update.key.as_str(), "value": update.value}],
        }))
        .await;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchKeysInput {
    app_id: String,
    session_id: String,
    keys: Vec<String>,
}

#[instrument(name = "rpc::watch_keys", level = "debug", skip(ctx))]
async fn watch_keys<K: ScriptedKv, B: EventBus>(ctx: Context<K, B>, input: Value) -> Result<Value> {
    let input: WatchKeysInput = serde_json::from_value(input)
        .map_err(|e| AirStateError::BadRequest(format!("invalid watchKeys input: {e}")))?;

    let app_id = AppId::new(input.app_id)?;
    let session_id = SessionId::from(input.session_id);
    let session = ctx
        .services
        .sessions
        .get(&session_id)
        .ok_or_else(|| AirStateError::NotFound(format!("no session '{session_id}'")))?;

    let mut results = Map::with_capacity(input.keys.len());
    for raw_key in input.keys {
        let key = StateKey::new(raw_key)?;
        let subject = subject_for(&app_id, &key);

        if !session.has_subscription(&subject) {
            let handler_session = session.clone();
            let handler_key = key.clone();
            let handle = ctx
                .services
                .bus
                .subscribe(
                    &subject,
                    Box::new(move |message: BusMessage| {
                        let value = parse_payload(&message.payload);
                        handler_session.deliver(handler_key.clone(), value);
                    }),
                )
                .await?;
            session.watch(app_id.clone(), key.clone(), subject, handle);
        }

        let snapshot = ctx.services.engine.get_raw(&app_id, &key).await?.unwrap_or(Value::Null);
        session.deliver(key.clone(), snapshot.clone());
        results.insert(key.to_string(), json!({"key": key.as_str(), "value": snapshot}));
    }

    Ok(Value::Object(results))
}

fn parse_payload(payload: &Bytes) -> Document {
    if payload.is_empty() || payload.as_ref() == b"null" {
        return Value::Null;
    }
    serde_json::from_slice(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airstate_bus::MemoryBus;
    use airstate_kv::MemoryKv;
    use airstate_state::StateEngine;
    use std::collections::HashMap;

    async fn services() -> Arc<Services<MemoryKv, MemoryBus>> {
        let kv = Arc::new(MemoryKv::new());
        let bus = Arc::new(MemoryBus::new());
        let engine = Arc::new(StateEngine::new(kv, bus.clone()).await.unwrap());
        Arc::new(Services { engine, bus, sessions: Arc::new(SessionRegistry::new()) })
    }

    fn ctx(services: Arc<Services<MemoryKv, MemoryBus>>) -> Context<MemoryKv, MemoryBus> {
        Context { services, connection_params: Arc::new(HashMap::new()) }
    }

    #[tokio::test]
    async fn watch_keys_returns_current_snapshot_and_subscribes_for_deltas() {
        let services = services().await;
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        services.engine.replace(&app, &key, json!({"a": 1})).await.unwrap();

        let (session, mut updates) = services.sessions.create();
        let input = json!({"appId": "appA", "sessionId": session.id().as_str(), "keys": ["k1"]});
        let result = watch_keys(ctx(services.clone()), input).await.unwrap();
        assert_eq!(result["k1"]["value"], json!({"a": 1}));

        // The subscribe-before-snapshot ordering always redelivers the
        // snapshot itself as the first queued update.
        let first = updates.recv().await.unwrap();
        assert_eq!(first.value, json!({"a": 1}));

        services.engine.replace(&app, &key, json!({"a": 2})).await.unwrap();
        let delta = updates.recv().await.unwrap();
        assert_eq!(delta.value, json!({"a": 2}));
    }

    #[tokio::test]
    async fn watch_keys_unknown_session_is_not_found() {
        let services = services().await;
        let input = json!({"appId": "appA", "sessionId": "bogus", "keys": ["k1"]});
        let err = watch_keys(ctx(services), input).await.unwrap_err();
        assert!(matches!(err, AirStateError::NotFound(_)));
    }

    #[tokio::test]
    async fn watch_keys_does_not_double_subscribe_the_same_key() {
        let services = services().await;
        let (session, _updates) = services.sessions.create();
        let input = json!({"appId": "appA", "sessionId": session.id().as_str(), "keys": ["k1"]});
        watch_keys(ctx(services.clone()), input.clone()).await.unwrap();
        watch_keys(ctx(services.clone()), input).await.unwrap();
        assert_eq!(session.subscription_count(), 1);
    }

    #[tokio::test]
    async fn watch_keys_is_isolated_per_key() {
        let services = services().await;
        let app = AppId::new("appA").unwrap();
        let key_a = StateKey::new("k1").unwrap();
        let key_b = StateKey::new("k2").unwrap();

        let (session, mut updates) = services.sessions.create();
        let input = json!({"appId": "appA", "sessionId": session.id().as_str(), "keys": ["k1", "k2"]});
        watch_keys(ctx(services.clone()), input).await.unwrap();
        updates.recv().await.unwrap();
        updates.recv().await.unwrap();

        services.engine.replace(&app, &key_a, json!({"a": 1})).await.unwrap();
        let delta = updates.recv().await.unwrap();
        assert_eq!(delta.key, key_a);
        assert_ne!(delta.key, key_b);
    }

    #[tokio::test]
    async fn session_guard_cancels_subscriptions_and_removes_session_on_drop() {
        let services = services().await;
        let (session, _updates) = services.sessions.create();
        let input = json!({"appId": "appA", "sessionId": session.id().as_str(), "keys": ["k1"]});
        watch_keys(ctx(services.clone()), input).await.unwrap();
        assert_eq!(session.subscription_count(), 1);

        let id = session.id().clone();
        {
            let _guard = SessionGuard { registry: services.sessions.clone(), session: session.clone() };
        }
        assert_eq!(session.subscription_count(), 0);
        assert!(services.sessions.get(&id).is_none());
    }
}
