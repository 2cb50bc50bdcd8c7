// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Four mutation endpoints that wrap the state mutation engine, plus an SSE
//! fan-out endpoint offered as an alternative to the RPC subscription.

mod error;
mod handlers;
mod sse;

use std::sync::Arc;

use airstate_bus::EventBus;
use airstate_kv::ScriptedKv;
use airstate_state::StateEngine;
use axum::Router;
use axum::routing::{get, put};

/// Services shared by every admin-surface handler.
pub struct AdminServices<K: ScriptedKv, B: EventBus> {
    pub engine: Arc<StateEngine<K, B>>,
    pub bus: Arc<B>,
}

impl<K: ScriptedKv, B: EventBus> Clone for AdminServices<K, B> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), bus: self.bus.clone() }
    }
}

/// Builds the admin-plane router: the four mutation endpoints, the SSE
/// fan-out endpoint, and a liveness probe.
pub fn router<K: ScriptedKv, B: EventBus>(services: Arc<AdminServices<K, B>>) -> Router {
    Router::new()
        .route(
            "/:app_id/server-state/:key",
            put(handlers::replace::<K, B>)
                .delete(handlers::remove::<K, B>)
                .patch(handlers::deep_merge::<K, B>)
                .post(handlers::atomic_ops::<K, B>),
        )
        .route("/:app_id/server-state/keys", get(sse::fan_out::<K, B>))
        .route("/healthz", get(healthz))
        .with_state(services)
}

async fn healthz() -> &'static str {
    "ok"
}
