// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use airstate_types::AirStateError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wraps [`AirStateError`] so admin-surface handlers can return it directly
/// from a `Result` and have it render as `{"error": "…"}` with the right
/// status code.
#[derive(Debug)]
pub struct ApiError(AirStateError);

impl From<AirStateError> for ApiError {
    fn from(err: AirStateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": self.0.message()}))).into_response()
    }
}
