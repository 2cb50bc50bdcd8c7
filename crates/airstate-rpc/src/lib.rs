// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Frame codec, connection lifecycle, worker-pool dispatch for
//! transactional calls, subscription lifecycle, and ordered response
//! writer, wired to the two built-in server-state procedures.

mod connection;
mod frame;
mod procedures;
mod router;

pub use connection::{ConnectionConfig, router as ws_router};
pub use frame::{ClientFrame, ClientParams, ErrorPayload, ResultPayload, ServerFrame};
pub use procedures::{SERVER_STATE, WATCH_KEYS, register as register_server_state_procedures};
pub use router::{Context, Emit, Procedure, ProcedureRouter, Services};

/// A [`ProcedureRouter`] with the built-in server-state procedures already
/// registered; the starting point for a binary that wants to add more.
pub fn default_router<K, B>() -> ProcedureRouter<K, B>
where
    K: airstate_kv::ScriptedKv,
    B: airstate_bus::EventBus,
{
    register_server_state_procedures(ProcedureRouter::new())
}
