use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// An application-level event produced by a bridge.
///
/// Events are immutable once built and are handed to the dispatcher by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Logical name of the signal (e.g., "conveyor_sensor_check").
    pub name: String,

    /// Observed value, forwarded to consumers as-is.
    pub value: serde_json::Value,

    /// Webhook path (or absolute URL) the event is delivered to.
    pub destination_path: String,

    /// Unix epoch milliseconds when the event was observed.
    pub timestamp: i64,
}

impl Event {
    /// Create a new event stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<serde_json::Value>,
        destination_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            destination_path: destination_path.into(),
            timestamp: current_timestamp_millis(),
        }
    }

    /// Override the observation timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Body posted to the webhook: `{"event": <name>, "value": <value>}`.
    pub fn payload(&self) -> WebhookPayload<'_> {
        WebhookPayload {
            event: &self.name,
            value: &self.value,
        }
    }
}

/// Wire body of a webhook delivery.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub event: &'a str,
    pub value: &'a serde_json::Value,
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch (should never happen in practice).
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
