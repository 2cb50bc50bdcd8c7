// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Replace / Remove / DeepMerge / AtomicOps, each computing
//! `storageKey`/`counterKey`, dispatching to a named script in the
//! [`airstate_kv`] runtime, and handing the result to the [`airstate_bus`]
//! event bus.

mod engine;
pub mod pure;

pub use engine::StateEngine;
pub use pure::{AtomicOpFailure, apply_atomic_ops, deep_merge, validate_atomic_ops_shape};
