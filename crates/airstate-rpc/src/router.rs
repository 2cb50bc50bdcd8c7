// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use airstate_bus::EventBus;
use airstate_kv::ScriptedKv;
use airstate_session::SessionRegistry;
use airstate_state::StateEngine;
use airstate_types::Result;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::frame::{ResultPayload, ServerFrame};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Services shared by every connection and every procedure handler.
pub struct Services<K: ScriptedKv, B: EventBus> {
    pub engine: Arc<StateEngine<K, B>>,
    pub bus: Arc<B>,
    pub sessions: Arc<SessionRegistry>,
}

/// Per-connection context handed to a procedure: the shared services plus
/// the string map attached by a gated `connectionParams` frame, if any.
pub struct Context<K: ScriptedKv, B: EventBus> {
    pub services: Arc<Services<K, B>>,
    pub connection_params: Arc<HashMap<String, String>>,
}

impl<K: ScriptedKv, B: EventBus> Clone for Context<K, B> {
    fn clone(&self) -> Self {
        Self { services: self.services.clone(), connection_params: self.connection_params.clone() }
    }
}

/// Handle a subscription procedure uses to push `data` frames to its
/// connection. `started` and `stopped` are emitted by the connection
/// itself, never by the procedure body.
#[derive(Clone)]
pub struct Emit {
    id: i64,
    tx: mpsc::Sender<ServerFrame>,
}

impl Emit {
    pub(crate) fn new(id: i64, tx: mpsc::Sender<ServerFrame>) -> Self {
        Self { id, tx }
    }

    pub async fn data(&self, data: Value) {
        let _ = self.tx.send(ServerFrame::result(self.id, ResultPayload::Data { data })).await;
    }
}

type QueryFn<K, B> = Arc<dyn Fn(Context<K, B>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type MutationFn<K, B> = Arc<dyn Fn(Context<K, B>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type SubscriptionFn<K, B> = Arc<dyn Fn(Context<K, B>, Emit) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub enum Procedure<K: ScriptedKv, B: EventBus> {
    Query(QueryFn<K, B>),
    Mutation(MutationFn<K, B>),
    Subscription(SubscriptionFn<K, B>),
}

/// `path -> Procedure` dispatch table, built once at boot and shared by
/// every connection.
pub struct ProcedureRouter<K: ScriptedKv, B: EventBus> {
    procedures: HashMap<&'static str, Procedure<K, B>>,
}

impl<K: ScriptedKv, B: EventBus> Default for ProcedureRouter<K, B> {
    fn default() -> Self {
        Self { procedures: HashMap::new() }
    }
}

impl<K: ScriptedKv, B: EventBus> ProcedureRouter<K, B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query<F>(mut self, path: &'static str, handler: F) -> Self
    where
        F: Fn(Context<K, B>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        self.procedures.insert(path, Procedure::Query(Arc::new(handler)));
        self
    }

    pub fn mutation<F>(mut self, path: &'static str, handler: F) -> Self
    where
        F: Fn(Context<K, B>, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        self.procedures.insert(path, Procedure::Mutation(Arc::new(handler)));
        self
    }

    pub fn subscription<F>(mut self, path: &'static str, handler: F) -> Self
    where
        F: Fn(Context<K, B>, Emit) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.procedures.insert(path, Procedure::Subscription(Arc::new(handler)));
        self
    }

    pub fn get(&self, path: &str) -> Option<&Procedure<K, B>> {
        self.procedures.get(path)
    }
}
