// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! The SSE fan-out endpoint: an alternative to the RPC subscription that
//! skips session bookkeeping and the initial snapshot, streaming only
//! deltas for as long as the HTTP connection stays open.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use airstate_bus::{BusMessage, BusSubscription, EventBus};
use airstate_kv::ScriptedKv;
use airstate_types::{AppId, Document, StateKey, subject_for};
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, Sse};
use bytes::Bytes;
use futures_util::Stream;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

use crate::AdminServices;
use crate::error::ApiError;

const CHANNEL_CAPACITY: usize = 128;

/// Owns the bus subscriptions backing an SSE stream; dropping it (when the
/// client disconnects and axum drops the response body) cancels every one.
pub(crate) struct SseStream {
    inner: ReceiverStream<Result<Event, Infallible>>,
    _subscriptions: Vec<BusSubscription>,
}

impl Stream for SseStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

#[instrument(name = "http::fan_out", level = "debug", skip(services))]
pub async fn fan_out<K: ScriptedKv, B: EventBus>(
    State(services): State<Arc<AdminServices<K, B>>>,
    Path(app_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Sse<SseStream>, ApiError> {
    let app_id = AppId::new(app_id)?;
    let keys: Vec<String> =
        query.get("keys").map(|raw| raw.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect()).unwrap_or_default();

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(CHANNEL_CAPACITY);
    let _ = tx.send(Ok(Event::default().comment("connected"))).await;

    let mut subscriptions = Vec::with_capacity(keys.len());
    for raw_key in keys {
        let key = StateKey::new(raw_key)?;
        let subject = subject_for(&app_id, &key);
        let event_tx = tx.clone();
        let handler_key = key.clone();

        let handle = services
            .bus
            .subscribe(
                &subject,
                Box::new(move |message: BusMessage| {
                    let value = parse_payload(&message.payload);
                    let payload = json!({
                        "key": handler_key.as_str(),
                        "value": value,
                        "update_count": message.update_count.to_string(),
                    });
                    if let Ok(text) = serde_json::to_string(&payload) {
                        let _ = event_tx.try_send(Ok(Event::default().data(text)));
                    }
                }),
            )
            .await?;
        subscriptions.push(handle);
    }

    let stream = SseStream { inner: ReceiverStream::new(rx), _subscriptions: subscriptions };
    Ok(Sse::new(stream))
}

fn parse_payload(payload: &Bytes) -> Document {
    if payload.is_empty() || payload.as_ref() == b"null" {
        return Value::Null;
    }
    serde_json::from_slice(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use airstate_bus::{MemoryBus, MutationEvent};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn dropping_the_stream_cancels_every_subscription() {
        let bus = MemoryBus::new();
        let app = AppId::new("appA").unwrap();
        let key = StateKey::new("k1").unwrap();
        let subject = subject_for(&app, &key);

        let fired = Arc::new(AtomicBool::new(false));
        let handler_fired = fired.clone();
        let handle = bus
            .subscribe(&subject, Box::new(move |_| handler_fired.store(true, Ordering::SeqCst)))
            .await
            .unwrap();

        let (_tx, rx) = mpsc::channel::<Result<Event, Infallible>>(1);
        let stream = SseStream { inner: ReceiverStream::new(rx), _subscriptions: vec![handle] };
        drop(stream);

        bus.publish(&MutationEvent::for_key(&app, &key, Bytes::from_static(b"1"), 1)).await.unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
