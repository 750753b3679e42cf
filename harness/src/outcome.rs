//! Results handed back to scenarios. Immutable once produced.

use std::time::Duration;

use serde_json::Value;

/// Result of a single query or mutation.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// The decoded `data` object.
    pub response: Value,
    pub elapsed_ms: u64,
}

impl RequestOutcome {
    /// Name of the first top-level field in the response.
    pub fn event_name(&self) -> Option<&str> {
        event_name(&self.response)
    }

    /// The value of the first top-level field.
    pub fn body(&self) -> &Value {
        match self.event_name() {
            Some(name) => &self.response[name],
            None => &Value::Null,
        }
    }
}

/// One payload received on a subscription.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    /// Milliseconds between subscription start and this event's arrival.
    pub elapsed_ms: u64,
}

impl Event {
    pub fn body(&self) -> &Value {
        &self.payload[self.name.as_str()]
    }
}

/// Why a subscription listener stopped consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    TargetReached,
    StreamEnded,
    StreamFailed(String),
}

#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    /// Events in arrival order.
    pub events: Vec<Event>,
    /// Elapsed milliseconds up to the last captured event.
    pub elapsed_ms: Option<u64>,
    pub termination: Termination,
}

impl SubscriptionOutcome {
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }
}

/// Outcomes of one dual-session run, keyed by the task that produced them.
#[derive(Debug, Clone)]
pub struct DualOutcome {
    pub subscription: SubscriptionOutcome,
    pub trigger: RequestOutcome,
}

/// Rounds a duration to the nearest whole millisecond.
pub fn round_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}

pub(crate) fn event_name(data: &Value) -> Option<&str> {
    data.as_object()?.keys().next().map(String::as_str)
}
