use crate::types::{EventRecord, EventSource};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use ulid::Ulid;

/// Fan-out of workflow and refresh events to any number of subscribers.
///
/// Publishing never fails the caller: with no subscribers the record is dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
    seq: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    pub fn publish(
        &self,
        event: EventRecord,
    ) -> Result<(), broadcast::error::SendError<EventRecord>> {
        self.sender.send(event).map(|_| ())
    }

    /// Wraps `body` in a fresh envelope (ULID id, next sequence number) and publishes it.
    pub fn emit(
        &self,
        source: EventSource,
        correlation_id: Option<String>,
        body: Value,
    ) -> EventRecord {
        let record = EventRecord {
            id: Ulid::new().to_string(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            at: Utc::now(),
            correlation_id,
            source,
            body,
        };
        let _ = self.publish(record.clone());
        record
    }
}
