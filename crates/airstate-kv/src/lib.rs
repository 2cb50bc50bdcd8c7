// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Holds a fixed set of named scripts, uploads each to the KV store once at
//! boot to obtain a content digest, executes by digest, and reloads-then-
//! retries exactly once on the distinguished "script not cached" error.
//!
//! The concrete KV engine is outside this crate; [`ScriptedKv`] is the
//! trait boundary it implements. [`MemoryKv`] is the in-process reference
//! backend used by the default binary and the test suite.

mod memory;
mod runtime;

use std::fmt;
use std::sync::Arc;

use airstate_types::Result;
use bytes::Bytes;

pub use memory::MemoryKv;
pub use runtime::ScriptRuntime;

/// The four server-side scripts the mutation engine depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptName {
    Replace,
    Remove,
    DeepMerge,
    AtomicOps,
}

impl ScriptName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptName::Replace => "replace",
            ScriptName::Remove => "remove",
            ScriptName::DeepMerge => "deep_merge",
            ScriptName::AtomicOps => "atomic_ops",
        }
    }
}

impl fmt::Display for ScriptName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque content digest returned by a successful script upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(pub String);

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a script run produces: the (possibly unchanged) new storage value,
/// and the script's own JSON return value, which the state mutation engine
/// parses.
#[derive(Debug, Clone)]
pub struct ScriptEffect {
    /// `None` means the storage key is deleted.
    pub new_value: Option<Bytes>,
    pub new_counter: u64,
    pub result: serde_json::Value,
}

/// A script body: given the key's current raw value (if any), the current
/// counter, and the caller-supplied args, computes the new value/counter and
/// the script's JSON return value. Scripts never partially apply: returning
/// `Err` leaves the stored document and counter untouched.
pub type ScriptBody = Arc<
    dyn Fn(Option<Bytes>, u64, &[Bytes]) -> Result<ScriptEffect> + Send + Sync + 'static,
>;

/// Error surfaced by a [`ScriptedKv`] at the eval step. Distinguishes the
/// "script not cached" condition (e.g. Redis's `NOSCRIPT`) from every other
/// backend fault, since only the former triggers the runtime's reload-and-
/// retry path.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("script not cached")]
    NoScript,
    #[error("kv backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Script(#[from] airstate_types::AirStateError),
}

/// Trait boundary for a KV store supporting atomic scripted execution.
#[async_trait::async_trait]
pub trait ScriptedKv: Send + Sync + 'static {
    /// Uploads `body` under `name`, returning a content digest. Idempotent:
    /// uploading the same name again replaces the cached body and yields a
    /// fresh digest, modelling a backend that evicted the old one.
    async fn load_script(&self, name: ScriptName, body: ScriptBody) -> Result<Digest>;

    /// Evaluates the script identified by `digest` atomically against
    /// `storage_key`/`counter_key`. Returns [`KvError::NoScript`] if the
    /// backend no longer recognizes `digest`.
    async fn eval_script(
        &self,
        digest: &Digest,
        storage_key: &str,
        counter_key: &str,
        args: Vec<Bytes>,
    ) -> std::result::Result<ScriptEffect, KvError>;

    /// Raw, script-bypassing read used by a subscription's snapshot read.
    async fn get_raw(&self, key: &str) -> Result<Option<Bytes>>;
}
