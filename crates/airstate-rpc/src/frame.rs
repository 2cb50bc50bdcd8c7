// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A client→server frame. `method` is one of `query`, `mutation`,
/// `subscription`, `subscription.stop`, `connectionParams`. `id` is absent
/// only for `connectionParams`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub id: Option<i64>,
    pub method: String,
    #[serde(default)]
    pub params: Option<ClientParams>,
    /// Only populated on the gated `connectionParams` frame.
    #[serde(default)]
    pub data: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientParams {
    pub path: String,
    #[serde(default)]
    pub input: Value,
}

pub const METHOD_QUERY: &str = "query";
pub const METHOD_MUTATION: &str = "mutation";
pub const METHOD_SUBSCRIPTION: &str = "subscription";
pub const METHOD_SUBSCRIPTION_STOP: &str = "subscription.stop";
pub const METHOD_CONNECTION_PARAMS: &str = "connectionParams";

/// RPC error code for an unrecognized procedure path. Raised by the
/// dispatch table itself; no procedure body ever returns it.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// A server→client frame: either `{id, result}` or `{id, error}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Result { id: i64, result: ResultPayload },
    Error { id: i64, error: ErrorPayload },
}

impl ServerFrame {
    pub fn result(id: i64, result: ResultPayload) -> Self {
        Self::Result { id, result }
    }

    pub fn error(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self::Error { id, error: ErrorPayload { code, message: message.into() } }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultPayload {
    Started,
    Data { data: Value },
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}
