// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Per-connection lifecycle: a single reader task dispatches inbound
//! frames to a round-robin worker pool (query/mutation) or spawns a
//! subscription task; a single writer task owns the outbound socket.

use std::collections::HashMap;
use std::sync::Arc;

use airstate_bus::EventBus;
use airstate_kv::ScriptedKv;
use airstate_types::Result;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::frame::{
    ClientFrame, METHOD_CONNECTION_PARAMS, METHOD_MUTATION, METHOD_NOT_FOUND, METHOD_QUERY,
    METHOD_SUBSCRIPTION, METHOD_SUBSCRIPTION_STOP, ResultPayload, ServerFrame,
};
use crate::router::{Context, Emit, Procedure, ProcedureRouter, Services};

/// Worker pool size and channel bounds for a connection. Defaults mirror a
/// 4-worker pool with a response channel sized to match.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub worker_pool_size: usize,
    pub response_channel_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { worker_pool_size: 4, response_channel_capacity: 4 }
    }
}

struct WsState<K: ScriptedKv, B: EventBus> {
    services: Arc<Services<K, B>>,
    procedures: Arc<ProcedureRouter<K, B>>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
}

impl<K: ScriptedKv, B: EventBus> Clone for WsState<K, B> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
            procedures: self.procedures.clone(),
            config: self.config,
            shutdown: self.shutdown.clone(),
        }
    }
}

/// Builds the `/trpc` route. Mount the returned router under the
/// service-plane `axum::Router`.
pub fn router<K: ScriptedKv, B: EventBus>(
    services: Arc<Services<K, B>>,
    procedures: Arc<ProcedureRouter<K, B>>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
) -> Router {
    let state = WsState { services, procedures, config, shutdown };
    Router::new().route("/trpc", get(upgrade_handler::<K, B>)).with_state(state)
}

async fn upgrade_handler<K: ScriptedKv, B: EventBus>(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<WsState<K, B>>,
) -> impl IntoResponse {
    let gate_connection_params = query.get("connectionParams").map(String::as_str) == Some("1");
    ws.on_upgrade(move |socket| async move {
        serve(socket, state.services, state.procedures, state.config, gate_connection_params, state.shutdown).await;
    })
}

async fn serve<K: ScriptedKv, B: EventBus>(
    socket: WebSocket,
    services: Arc<Services<K, B>>,
    procedures: Arc<ProcedureRouter<K, B>>,
    config: ConnectionConfig,
    gate_connection_params: bool,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let conn_token = shutdown.child_token();
    let (response_tx, mut response_rx) = mpsc::channel::<ServerFrame>(config.response_channel_capacity);

    let writer_token = conn_token.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer_token.cancelled() => break,
                frame = response_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                    if sink.send(Message::Text(text)).await.is_err() {
                        writer_token.cancel();
                        break;
                    }
                }
            }
        }
    });

    let connection_params = if gate_connection_params {
        match read_connection_params(&mut stream).await {
            Some(params) => params,
            None => {
                conn_token.cancel();
                return;
            }
        }
    } else {
        HashMap::new()
    };
    let connection_params = Arc::new(connection_params);

    let worker_txs = spawn_workers(&procedures, &services, &connection_params, &response_tx, config);
    let subscriptions: Arc<Mutex<HashMap<i64, CancellationToken>>> = Arc::new(Mutex::new(HashMap::new()));

    let mut next_worker = 0usize;
    loop {
        tokio::select! {
            biased;
            _ = conn_token.cancelled() => break,
            message = stream.next() => {
                let Some(message) = message else { break };
                let Ok(message) = message else { break };
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
                };
                let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else { break };

                match frame.method.as_str() {
                    METHOD_QUERY | METHOD_MUTATION => {
                        let (Some(id), Some(params)) = (frame.id, frame.params) else { continue };
                        let worker = next_worker % worker_txs.len();
                        next_worker = next_worker.wrapping_add(1);
                        let _ = worker_txs[worker].send((id, params.path, params.input)).await;
                    }
                    METHOD_SUBSCRIPTION => {
                        let (Some(id), Some(params)) = (frame.id, frame.params) else { continue };
                        spawn_subscription(
                            id,
                            params.path,
                            procedures.clone(),
                            services.clone(),
                            connection_params.clone(),
                            response_tx.clone(),
                            subscriptions.clone(),
                            conn_token.clone(),
                        );
                    }
                    METHOD_SUBSCRIPTION_STOP => {
                        if let Some(id) = frame.id {
                            if let Some(token) = subscriptions.lock().remove(&id) {
                                token.cancel();
                            }
                        }
                    }
                    other => {
                        if let Some(id) = frame.id {
                            let message = format!("unknown method '{other}'");
                            let _ = response_tx.send(ServerFrame::error(id, METHOD_NOT_FOUND, message)).await;
                        }
                    }
                }
            }
        }
    }

    conn_token.cancel();
    debug!("connection closed");
}

async fn read_connection_params(
    stream: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<HashMap<String, String>> {
    let message = stream.next().await?.ok()?;
    let Message::Text(text) = message else { return None };
    let frame: ClientFrame = serde_json::from_str(&text).ok()?;
    if frame.method != METHOD_CONNECTION_PARAMS {
        return None;
    }
    Some(frame.data.unwrap_or_default())
}

type WorkItem = (i64, String, Value);

fn spawn_workers<K: ScriptedKv, B: EventBus>(
    procedures: &Arc<ProcedureRouter<K, B>>,
    services: &Arc<Services<K, B>>,
    connection_params: &Arc<HashMap<String, String>>,
    response_tx: &mpsc::Sender<ServerFrame>,
    config: ConnectionConfig,
) -> Vec<mpsc::Sender<WorkItem>> {
    let mut senders = Vec::with_capacity(config.worker_pool_size);
    for _ in 0..config.worker_pool_size {
        let (tx, mut rx) = mpsc::channel::<WorkItem>(config.response_channel_capacity);
        let procedures = procedures.clone();
        let services = services.clone();
        let connection_params = connection_params.clone();
        let response_tx = response_tx.clone();

        tokio::spawn(async move {
            while let Some((id, path, input)) = rx.recv().await {
                let ctx = Context { services: services.clone(), connection_params: connection_params.clone() };
                let frame = dispatch_transactional(&procedures, ctx, id, &path, input).await;
                let _ = response_tx.send(frame).await;
            }
        });
        senders.push(tx);
    }
    senders
}

async fn dispatch_transactional<K: ScriptedKv, B: EventBus>(
    procedures: &ProcedureRouter<K, B>,
    ctx: Context<K, B>,
    id: i64,
    path: &str,
    input: Value,
) -> ServerFrame {
    let handler = match procedures.get(path) {
        Some(Procedure::Query(f)) => f.clone(),
        Some(Procedure::Mutation(f)) => f.clone(),
        Some(Procedure::Subscription(_)) => {
            let message = format!("'{path}' is a subscription, call it with method:\"subscription\"");
            return ServerFrame::error(id, METHOD_NOT_FOUND, message);
        }
        None => return ServerFrame::error(id, METHOD_NOT_FOUND, format!("unknown procedure '{path}'")),
    };

    match handler(ctx, input).await {
        Ok(value) => ServerFrame::result(id, ResultPayload::Data { data: value }),
        Err(err) => ServerFrame::error(id, err.rpc_code(), err.message()),
    }
}

#[allow(clippy::too_many_arguments)]
fn spawn_subscription<K: ScriptedKv, B: EventBus>(
    id: i64,
    path: String,
    procedures: Arc<ProcedureRouter<K, B>>,
    services: Arc<Services<K, B>>,
    connection_params: Arc<HashMap<String, String>>,
    response_tx: mpsc::Sender<ServerFrame>,
    subscriptions: Arc<Mutex<HashMap<i64, CancellationToken>>>,
    conn_token: CancellationToken,
) {
    let handler = match procedures.get(&path) {
        Some(Procedure::Subscription(f)) => f.clone(),
        _ => {
            let response_tx = response_tx.clone();
            tokio::spawn(async move {
                let message = format!("unknown procedure '{path}'");
                let _ = response_tx.send(ServerFrame::error(id, METHOD_NOT_FOUND, message)).await;
            });
            return;
        }
    };

    let token = conn_token.child_token();
    subscriptions.lock().insert(id, token.clone());

    tokio::spawn(async move {
        let _ = response_tx.send(ServerFrame::result(id, ResultPayload::Started)).await;

        let ctx = Context { services, connection_params };
        let emit = Emit::new(id, response_tx.clone());
        let result: Result<()> = tokio::select! {
            biased;
            _ = token.cancelled() => Ok(()),
            r = handler(ctx, emit) => r,
        };

        if let Err(err) = result {
            warn!(subscription_id = id, %err, "subscription procedure returned an error");
            let _ = response_tx.send(ServerFrame::error(id, err.rpc_code(), err.message())).await;
        }
        let _ = response_tx.send(ServerFrame::result(id, ResultPayload::Stopped)).await;
        subscriptions.lock().remove(&id);
    });
}

