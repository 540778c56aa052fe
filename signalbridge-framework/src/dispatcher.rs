//! Best-effort webhook delivery of bridge events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use signalbridge_common::{Event, WebhookConfig};

use crate::error::Result;

/// Delivers [`Event`]s to HTTP webhooks.
///
/// Each event is posted once as `{"event": <name>, "value": <value>}` to the
/// webhook base URL joined with the event's destination path. Delivery is
/// at-most-once: failures (connection errors, timeouts, non-2xx answers) are
/// logged, counted and dropped. Nothing here ever returns an error to the
/// emitting component.
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    client: reqwest::Client,
    webhook: WebhookConfig,
    counters: Arc<DispatchCounters>,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The webhook answered with a 2xx status.
    Delivered { status: u16 },
    /// The event was dropped.
    Failed(DeliveryFailure),
}

impl DeliveryOutcome {
    /// Whether the event reached the webhook.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Why a delivery was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The destination could not be turned into a URL.
    InvalidUrl(String),
    /// No response within the configured timeout.
    Timeout,
    /// The endpoint could not be reached.
    Connect(String),
    /// The endpoint answered with a non-2xx status.
    Status(u16),
    /// Any other transport failure.
    Request(String),
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::InvalidUrl(e) => write!(f, "invalid url: {}", e),
            DeliveryFailure::Timeout => write!(f, "timed out"),
            DeliveryFailure::Connect(e) => write!(f, "connection failed: {}", e),
            DeliveryFailure::Status(code) => write!(f, "HTTP status {}", code),
            DeliveryFailure::Request(e) => write!(f, "request failed: {}", e),
        }
    }
}

impl EventDispatcher {
    /// Create a dispatcher for the given webhook settings.
    pub fn new(webhook: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(webhook.timeout())
            .build()?;

        Ok(Self {
            client,
            webhook,
            counters: Arc::new(DispatchCounters::default()),
        })
    }

    /// Get the webhook configuration.
    pub fn webhook(&self) -> &WebhookConfig {
        &self.webhook
    }

    /// Deliver one event, waiting at most the configured timeout.
    ///
    /// Always resolves; the outcome is informational only.
    pub async fn dispatch(&self, event: Event) -> DeliveryOutcome {
        let url = match self.webhook.resolve_url(&event.destination_path) {
            Ok(url) => url,
            Err(e) => {
                let outcome = DeliveryOutcome::Failed(DeliveryFailure::InvalidUrl(e.to_string()));
                return self.record(&event, &event.destination_path, outcome);
            }
        };

        let outcome = match self.client.post(&url).json(&event.payload()).send().await {
            Ok(response) if response.status().is_success() => DeliveryOutcome::Delivered {
                status: response.status().as_u16(),
            },
            Ok(response) => {
                DeliveryOutcome::Failed(DeliveryFailure::Status(response.status().as_u16()))
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::Failed(DeliveryFailure::Timeout),
            Err(e) if e.is_connect() => {
                DeliveryOutcome::Failed(DeliveryFailure::Connect(e.to_string()))
            }
            Err(e) => DeliveryOutcome::Failed(DeliveryFailure::Request(e.to_string())),
        };

        self.record(&event, &url, outcome)
    }

    /// Deliver an event on the current tokio runtime without waiting for it.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn_dispatch(&self, event: Event) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(event).await })
    }

    /// Deliver an event on the given runtime; usable from plain threads.
    pub fn spawn_dispatch_on(&self, handle: &Handle, event: Event) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = self.clone();
        handle.spawn(async move { dispatcher.dispatch(event).await })
    }

    /// Snapshot of delivery counters.
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    fn record(&self, event: &Event, url: &str, outcome: DeliveryOutcome) -> DeliveryOutcome {
        match &outcome {
            DeliveryOutcome::Delivered { status } => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(event = %event.name, url = %url, status, "Webhook delivered");
            }
            DeliveryOutcome::Failed(reason) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event = %event.name,
                    url = %url,
                    error = %reason,
                    "Webhook delivery failed, event dropped"
                );
            }
        }
        outcome
    }
}

/// Delivery counters of a dispatcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Number of delivered events.
    pub delivered: u64,
    /// Number of dropped events.
    pub failed: u64,
}

impl DispatchStats {
    /// Total number of attempted deliveries.
    pub fn total(&self) -> u64 {
        self.delivered + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            100.0
        } else {
            (self.delivered as f64 / self.total() as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_stats() {
        let mut stats = DispatchStats::default();
        assert_eq!(stats.total(), 0);
        assert_eq!(stats.success_rate(), 100.0);

        stats.delivered = 8;
        stats.failed = 2;
        assert_eq!(stats.total(), 10);
        assert_eq!(stats.success_rate(), 80.0);
    }

    #[test]
    fn test_failure_display() {
        assert_eq!(DeliveryFailure::Status(503).to_string(), "HTTP status 503");
        assert_eq!(DeliveryFailure::Timeout.to_string(), "timed out");
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_dropped() {
        let dispatcher = EventDispatcher::new(WebhookConfig {
            base_url: "not-a-url".to_string(),
            timeout_ms: 100,
        })
        .unwrap();

        let outcome = dispatcher.dispatch(Event::new("x", 1, "/x")).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed(DeliveryFailure::InvalidUrl(_))
        ));
        assert_eq!(dispatcher.stats().failed, 1);
    }
}
