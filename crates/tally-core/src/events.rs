use crate::types::EventBody;
use tally_events::bus::EventBus;
use tally_events::types::{EventRecord, EventSource};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(source: EventSource, correlation_id: Option<String>) -> Self {
        Self {
            source,
            correlation_id,
        }
    }
}

/// Serializes `body` and publishes it on `bus`. Returns `None` if the body
/// could not be encoded.
pub fn publish(bus: &EventBus, ctx: &RequestContext, body: &EventBody) -> Option<EventRecord> {
    match serde_json::to_value(body) {
        Ok(value) => Some(bus.emit(ctx.source, ctx.correlation_id.clone(), value)),
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode event body");
            None
        }
    }
}
