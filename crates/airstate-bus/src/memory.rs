// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

use std::collections::HashMap;
use std::sync::Arc;

use airstate_types::Result;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::{BusMessage, BusSubscription, EventBus, Handler, MutationEvent};

/// Channel depth per subject. A slow in-process handler can fall behind and
/// start losing the oldest unread messages (`broadcast::error::Lagged`);
/// this is the bus-level analogue of a real backend's own backpressure and
/// is intentionally generous relative to the session delivery channel,
/// which is where drop-on-overflow should actually become observable.
const SUBJECT_CHANNEL_CAPACITY: usize = 1024;

/// In-process reference implementation of [`EventBus`], backed by one
/// `tokio::sync::broadcast` channel per subject.
#[derive(Default, Clone)]
pub struct MemoryBus {
    subjects: Arc<RwLock<HashMap<String, broadcast::Sender<BusMessage>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, subject: &str) -> broadcast::Sender<BusMessage> {
        if let Some(tx) = self.subjects.read().get(subject) {
            return tx.clone();
        }
        let mut subjects = self.subjects.write();
        subjects
            .entry(subject.to_string())
            .or_insert_with(|| broadcast::channel(SUBJECT_CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait::async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, event: &MutationEvent) -> Result<()> {
        let tx = self.sender_for(&event.subject);
        let message = BusMessage { payload: event.payload.clone(), update_count: event.update_count };
        // No receivers is not a publish failure: a mutation with zero live
        // subscribers still committed successfully.
        let _ = tx.send(message);
        trace!(subject = %event.subject, update_count = event.update_count, "published mutation event");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, handler: Handler) -> Result<BusSubscription> {
        let tx = self.sender_for(subject);
        let mut rx = tx.subscribe();
        let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel();
        let subject = subject.to_string();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    received = rx.recv() => match received {
                        Ok(message) => handler(message),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(subject = %subject, skipped, "subscriber lagged, dropping skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(BusSubscription::new(cancel_tx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airstate_types::{AppId, StateKey};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = MemoryBus::new();
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let subject = airstate_types::subject_for(&app, &key);

        let received = Arc::new(RwLock::new(Vec::new()));
        let received_clone = received.clone();
        let handle = bus
            .subscribe(&subject, Box::new(move |msg: BusMessage| {
                received_clone.write().push(msg.update_count);
            }))
            .await
            .unwrap();

        for i in 1..=3u64 {
            bus.publish(&MutationEvent::for_key(&app, &key, "{}".into(), i)).await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(*received.read(), vec![1, 2, 3]);
        handle.cancel();
    }

    #[tokio::test]
    async fn distinct_subjects_are_isolated() {
        let bus = MemoryBus::new();
        let app = AppId::new("appA").unwrap();
        let key_x = StateKey::new("X").unwrap();
        let key_y = StateKey::new("Y").unwrap();
        let subject_x = airstate_types::subject_for(&app, &key_x);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        let handle = bus
            .subscribe(&subject_x, Box::new(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        bus.publish(&MutationEvent::for_key(&app, &key_y, "{}".into(), 1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        handle.cancel();
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivering() {
        let bus = MemoryBus::new();
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let subject = airstate_types::subject_for(&app, &key);

        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();
        let handle = bus
            .subscribe(&subject, Box::new(move |_| {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();

        handle.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        bus.publish(&MutationEvent::for_key(&app, &key, "{}".into(), 1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
