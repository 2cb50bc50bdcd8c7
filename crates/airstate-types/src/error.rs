// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

/// The error taxonomy shared by every AirState subsystem. Kinds, not names:
/// transport and admin-surface layers translate these into HTTP statuses or
/// RPC error codes, they never invent new kinds of their own.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AirStateError {
    /// Missing path param, missing body, unparseable JSON, no atomic-ops
    /// operator supplied.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Atomic-ops type mismatch, deep-merge against corrupt storage.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The referenced session/key/route does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// KV call failure, script execution failure, or any other backend
    /// fault that the caller cannot recover from.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AirStateError>;

impl AirStateError {
    /// Maps this error kind to the HTTP status the admin surface responds
    /// with.
    pub fn http_status(&self) -> u16 {
        match self {
            AirStateError::BadRequest(_) => 400,
            AirStateError::Conflict(_) => 400,
            AirStateError::NotFound(_) => 404,
            AirStateError::Internal(_) => 500,
        }
    }

    /// Maps this error kind to the RPC error code the transport responds
    /// with. `-32601` (method not found) is deliberately not representable
    /// here: it is raised by the transport dispatch table itself, never by
    /// a procedure body.
    pub fn rpc_code(&self) -> i32 {
        match self {
            AirStateError::BadRequest(_) => -32600,
            AirStateError::Conflict(_) => -32001,
            AirStateError::NotFound(_) => -32004,
            AirStateError::Internal(_) => -32603,
        }
    }

    pub fn message(&self) -> String {
        match self {
            AirStateError::BadRequest(m)
            | AirStateError::Conflict(m)
            | AirStateError::NotFound(m)
            | AirStateError::Internal(m) => m.clone(),
        }
    }
}
