//! SSE (Server-Sent Events) streaming of store change events.
//!
//! Converts a broadcast receiver of [`StoreEvent`]s into an SSE stream. Each
//! event is named after its `type` tag and carries the JSON-encoded event as
//! data. A subscriber that falls behind gets a `lagged` event with the number
//! of skipped events instead of being disconnected.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::store::StoreEvent;

/// Convert a store event receiver into an SSE stream.
pub fn events_to_sse_stream(
    rx: broadcast::Receiver<StoreEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).map(|item| {
        let event = match item {
            Ok(event) => {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Event::default().event(event.kind()).data(data)
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "SSE subscriber lagged");
                Event::default().event("lagged").data(skipped.to_string())
            }
        };
        Ok(event)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_yields_one_event_per_store_event() {
        let (tx, rx) = broadcast::channel(8);
        let stream = events_to_sse_stream(rx);
        tx.send(StoreEvent::CacheCleared { cleared_blocks: 2 }).unwrap();
        drop(tx);

        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_ok());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_streaming() {
        let (tx, rx) = broadcast::channel(1);
        let stream = events_to_sse_stream(rx);
        for n in 0..3 {
            tx.send(StoreEvent::CacheCleared { cleared_blocks: n }).unwrap();
        }
        drop(tx);

        // One `lagged` marker followed by the newest event.
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
    }
}
