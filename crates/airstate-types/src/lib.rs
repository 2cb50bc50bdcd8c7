// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

#![cfg_attr(not(debug_assertions), deny(warnings))]

//! Identifiers, KV/bus key layout, and the shared error taxonomy used by
//! every other AirState crate.

mod error;
mod ids;
mod keys;

pub use error::{AirStateError, Result};
pub use ids::{AppId, SessionId, StateKey};
pub use keys::{storage_key, counter_key, subject_for};

/// A state document. Non-goal: AirState does not validate documents against
/// a schema; any JSON value may be stored via Replace, but the merge and
/// atomic-ops primitives require an object once a document exists.
pub type Document = serde_json::Value;
