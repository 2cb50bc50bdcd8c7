// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Maps `(appId, key)` to a subject, publishes mutation events with an
//! `update_count` header, and hands out cancellable subscription handles.
//!
//! The concrete message bus (NATS, Redis Streams, ...) is outside this
//! crate; [`EventBus`] is the trait boundary a production binary implements
//! against. [`MemoryBus`] is the in-process reference implementation used
//! by the default binary and the test suite.

mod memory;

use airstate_types::{AirStateError, AppId, Result, StateKey, subject_for};
use bytes::Bytes;
use std::fmt;

/// The literal bytes written as an emitted event's payload on removal.
pub const NULL_PAYLOAD: &[u8] = b"null";

/// `{ subject, payload, header.update_count }`.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    pub subject: String,
    pub payload: Bytes,
    pub update_count: u64,
}

impl MutationEvent {
    pub fn for_key(app_id: &AppId, key: &StateKey, payload: Bytes, update_count: u64) -> Self {
        Self { subject: subject_for(app_id, key), payload, update_count }
    }
}

/// A received bus message, decimal `update_count` header intact.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub payload: Bytes,
    pub update_count: u64,
}

/// A cancellable handle to an active subscription. Dropping it cancels the
/// subscription as a safety net, but callers should call [`cancel`] once the
/// corresponding `Session` bookkeeping is also cleaned up: every bus
/// subscription opened by a session must be cancelled before the session
/// record is removed.
///
/// [`cancel`]: BusSubscription::cancel
pub struct BusSubscription {
    cancel_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl BusSubscription {
    fn new(cancel_tx: tokio::sync::oneshot::Sender<()>, task: tokio::task::JoinHandle<()>) -> Self {
        Self { cancel_tx: Some(cancel_tx), task: Some(task) }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSubscription").finish_non_exhaustive()
    }
}

/// A per-message callback invoked in subject-FIFO order as delivered by the
/// bus. Handlers run on the subscription's own task, so a slow handler only
/// ever backs up its own subject.
pub type Handler = Box<dyn Fn(BusMessage) + Send + Sync + 'static>;

/// Trait boundary for a subject-addressed in-process pub/sub.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync + 'static {
    async fn publish(&self, event: &MutationEvent) -> Result<()>;

    /// Subscribes to `subject`, invoking `handler` once per message. The
    /// returned handle must be cancelled by the caller.
    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<BusSubscription>;
}

pub use memory::MemoryBus;

pub(crate) fn publish_error(subject: &str, cause: impl fmt::Display) -> AirStateError {
    AirStateError::Internal(format!("failed to publish to subject '{subject}': {cause}"))
}
