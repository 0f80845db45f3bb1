//! Server-Sent Events support

use crate::engine::TurnEvent;
use crate::graph::{ConversationSnapshot, FeedEvent};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use tokio_stream::StreamExt;

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("ping")
}

/// Realtime feed of one conversation: an `init` event carrying the current
/// view, then every change event
pub fn feed_stream(
    snapshot: &ConversationSnapshot,
    broadcast_rx: broadcast::Receiver<FeedEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init_event = init_to_axum(snapshot);
    let init = futures::stream::once(async move { Ok(init_event) });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(event) => Some(Ok(feed_event_to_axum(&event))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(init.chain(broadcasts)).keep_alive(keep_alive())
}

/// Events of a single chat turn as unnamed `data:` frames
pub fn turn_stream(
    rx: mpsc::Receiver<TurnEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = ReceiverStream::new(rx).map(|event| Ok(turn_event_to_axum(&event)));
    Sse::new(events).keep_alive(keep_alive())
}

fn init_to_axum(snapshot: &ConversationSnapshot) -> Event {
    let mut data = serde_json::to_value(snapshot.view()).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut data {
        map.insert("type".to_string(), json!("init"));
    }
    Event::default().event("init").data(data.to_string())
}

fn feed_event_to_axum(event: &FeedEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.name()).data(data)
}

fn turn_event_to_axum(event: &TurnEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().data(data)
}
