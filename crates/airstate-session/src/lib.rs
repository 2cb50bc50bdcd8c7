// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Process-wide registry mapping a session id to its `Session` aggregate:
//! the set of watched keys, the active bus subscription handles keyed by
//! subject, and the bounded channel a subscription procedure drains to
//! push updates to its connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use airstate_bus::BusSubscription;
use airstate_types::{AppId, Document, SessionId, StateKey};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

/// Channel depth for a session's delivery queue. Exceeding it drops the
/// oldest-pending update rather than blocking the publisher; this is the
/// sole source of gap-producing loss in the system.
pub const SESSION_CHANNEL_CAPACITY: usize = 128;

/// A single `(key, value)` update materialized from a bus message, ready
/// for a subscription procedure to forward to its connection.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub key: StateKey,
    pub value: Document,
}

struct SessionState {
    watched: HashSet<(AppId, StateKey)>,
    subscriptions: HashMap<String, BusSubscription>,
}

/// Per-session record. Mutated only by its owning subscription procedure;
/// the registry just arbitrates lookup by id.
pub struct Session {
    id: SessionId,
    state: RwLock<SessionState>,
    sender: mpsc::Sender<SessionUpdate>,
}

impl Session {
    fn new(id: SessionId, channel_capacity: usize) -> (Arc<Self>, mpsc::Receiver<SessionUpdate>) {
        let (sender, receiver) = mpsc::channel(channel_capacity);
        let session = Arc::new(Self {
            id,
            state: RwLock::new(SessionState { watched: HashSet::new(), subscriptions: HashMap::new() }),
            sender,
        });
        (session, receiver)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// True if this session already holds a live subscription for
    /// `subject`; callers use this to avoid double-subscribing the same
    /// key.
    pub fn has_subscription(&self, subject: &str) -> bool {
        self.state.read().subscriptions.contains_key(subject)
    }

    pub fn watch(&self, app_id: AppId, key: StateKey, subject: String, handle: BusSubscription) {
        let mut state = self.state.write();
        state.watched.insert((app_id, key));
        state.subscriptions.insert(subject, handle);
    }

    /// Invoked by a subscription's bus callback. Drops the update with a
    /// warning if the delivery channel is full: the producer never blocks
    /// and the consumer never observes an error, only a gap.
    pub fn deliver(&self, key: StateKey, value: Document) {
        match self.sender.try_send(SessionUpdate { key, value }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %self.id, "session delivery channel full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // The owning subscription procedure has already exited and
                // stopped draining; nothing left to do.
            }
        }
    }

    /// Cancels every bus subscription held by this session. Called on exit
    /// of the owning subscription procedure, before the session is removed
    /// from the registry.
    pub fn cancel_all(&self) {
        let subscriptions = std::mem::take(&mut self.state.write().subscriptions);
        for (_, handle) in subscriptions {
            handle.cancel();
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }
}

/// Process-wide `sessionId -> Session` map. Reads take the read lock only;
/// upsert/delete take the write lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    channel_capacity: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_capacity(SESSION_CHANNEL_CAPACITY)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry whose sessions use `channel_capacity` for their
    /// delivery channel, overriding the default.
    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), channel_capacity }
    }

    /// Creates a fresh session under a freshly generated id and inserts it.
    pub fn create(&self) -> (Arc<Session>, mpsc::Receiver<SessionUpdate>) {
        let id = SessionId::generate();
        let (session, receiver) = Session::new(id.clone(), self.channel_capacity);
        self.sessions.write().insert(id, session.clone());
        (session, receiver)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn delete(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.write().remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_round_trips() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.create();
        let found = registry.get(session.id()).expect("session present");
        assert_eq!(found.id(), session.id());
    }

    #[test]
    fn delete_removes_session() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.create();
        let id = session.id().clone();
        assert!(registry.delete(&id).is_some());
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn get_on_unknown_id_is_miss() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&SessionId::generate()).is_none());
    }

    #[tokio::test]
    async fn deliver_forwards_updates_to_the_channel() {
        let registry = SessionRegistry::new();
        let (session, mut rx) = registry.create();
        let key = StateKey::new("k1").unwrap();
        session.deliver(key.clone(), serde_json::json!({"a": 1}));

        let update = rx.recv().await.expect("update delivered");
        assert_eq!(update.key, key);
        assert_eq!(update.value, serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn deliver_drops_silently_once_channel_is_full() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.create();
        let key = StateKey::new("k1").unwrap();
        for _ in 0..(SESSION_CHANNEL_CAPACITY + 10) {
            session.deliver(key.clone(), serde_json::Value::Null);
        }
        // No panic, no error surfaced: overflow is silently dropped.
    }

    #[test]
    fn cancel_all_empties_subscription_count() {
        let registry = SessionRegistry::new();
        let (session, _rx) = registry.create();
        assert_eq!(session.subscription_count(), 0);
        session.cancel_all();
        assert_eq!(session.subscription_count(), 0);
    }
}
