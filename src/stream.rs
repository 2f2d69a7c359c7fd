//! Stream Multiplexer (C8): a single-writer ordered channel of
//! [`StreamEvent`]s consumed by an SSE serializer.
//!
//! The channel itself is the multiplexer: every producer (classifier,
//! planner, executor, aggregator) holds a cloned [`EventSink`] and calls
//! `send`, and the bounded `mpsc` channel is what gives callers "a single
//! ordered channel" and backpressure rather than a dropped-event behavior
//! when the consumer is slow.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Default bounded channel capacity. Chosen so a burst of per-operation
/// events from a wide cross-source plan does not immediately block
/// producers, while still exerting backpressure on a genuinely stuck
/// consumer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// The envelope every event carries, matching §6.2.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Classifying,
    DatabasesSelected,
    Planning,
    PlanValidated,
    PlanOptimization,
    SchemaLoading,
    SchemaChunks,
    QueryGenerating,
    QueryValidating,
    QueryExecuting,
    PartialResults,
    ResultsReady,
    Aggregating,
    AggregationComplete,
    AnalysisGenerating,
    AnalysisChunk,
    AnalysisComplete,
    Error,
    Complete,
}

impl StreamEvent {
    #[must_use]
    pub fn new(event_type: EventType, session_id: Uuid, payload: Value) -> Self {
        Self { event_type, session_id, timestamp: Utc::now(), payload }
    }

    /// Render as one SSE `data:` line of JSON, per §4.8: a single UTF-8
    /// text message per event.
    #[must_use]
    pub fn to_sse(&self) -> String {
        let body = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {body}\n\n")
    }
}

/// Producer handle. Cheap to clone; every component that emits events
/// holds one.
#[derive(Clone)]
pub struct EventSink {
    session_id: Uuid,
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(session_id: Uuid, tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { session_id, tx }
    }

    /// Build a bounded channel and the matching sink/receiver pair.
    #[must_use]
    pub fn channel(session_id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(session_id, tx), rx)
    }

    /// Emit an event. Backpressures the caller if the consumer is behind,
    /// per §5: producers wait rather than events being dropped.
    pub async fn emit(&self, event_type: EventType, payload: Value) {
        let event = StreamEvent::new(event_type, self.session_id, payload);
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event sink closed; dropping event (consumer gone)");
        }
    }
}

/// Adapts the raw `mpsc::Receiver` side of a channel into a [`Stream`],
/// for callers whose front door (an SSE body, a websocket forwarder) wants
/// a `Stream<Item = StreamEvent>` rather than a bare receiver to poll.
pub fn into_stream(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = StreamEvent> {
    ReceiverStream::new(rx)
}

/// Enforces the ordering invariants from §4.8 as events are observed,
/// independent of the emitting components. Used by tests and by callers
/// that want to assert the contract holds for a captured event sequence.
pub struct OrderingValidator {
    seen_databases_selected: bool,
    seen_aggregation_complete: bool,
    complete_seen: bool,
}

impl Default for OrderingValidator {
    fn default() -> Self {
        Self { seen_databases_selected: false, seen_aggregation_complete: false, complete_seen: false }
    }
}

impl OrderingValidator {
    pub fn observe(&mut self, event: &StreamEvent) -> Result<(), String> {
        if self.complete_seen {
            return Err(format!("event {:?} observed after complete", event.event_type));
        }
        match event.event_type {
            EventType::DatabasesSelected => self.seen_databases_selected = true,
            EventType::QueryExecuting if !self.seen_databases_selected => {
                return Err("query_executing observed before databases_selected".to_string());
            }
            EventType::AggregationComplete => self.seen_aggregation_complete = true,
            EventType::Complete => self.complete_seen = true,
            _ => {}
        }
        Ok(())
    }

    #[must_use]
    pub fn exactly_one_complete_and_last(&self) -> bool {
        self.complete_seen
    }
}
