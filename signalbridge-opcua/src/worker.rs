//! Self-healing subscription worker.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> ESTABLISHED -> SUBSCRIBING -> ACTIVE
//!       ^                                                      |
//!       +------------------------ TEARDOWN <-------------------+
//! ```
//!
//! Any failure before ACTIVE, and any status-change notification while
//! ACTIVE, leads to TEARDOWN: the session is closed and the worker waits a
//! fixed delay before connecting again. Node identities are resolved anew for
//! every session.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use signalbridge_framework::{Event, EventDispatcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::browse::{BrowsePath, BrowsePathError};
use crate::config::{OpcuaConfig, SubscribedPoint};
use crate::transport::{
    NodeOf, PubSubConnector, PubSubSession, SessionNotification, TransportError,
};

/// Wait between teardown and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Notification interval of the subscription.
pub const PUBLISHING_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on closing a session during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`SubscriptionWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Established,
    Subscribing,
    Active,
    Teardown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Disconnected => "disconnected",
            WorkerState::Connecting => "connecting",
            WorkerState::Established => "established",
            WorkerState::Subscribing => "subscribing",
            WorkerState::Active => "active",
            WorkerState::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// A configured point with its parsed browse path.
#[derive(Debug, Clone)]
struct Subscription {
    point: SubscribedPoint,
    path: BrowsePath,
}

/// Keeps a subscription alive and forwards every change to its webhook.
pub struct SubscriptionWorker<C: PubSubConnector> {
    connector: C,
    endpoint: String,
    namespace_uri: String,
    subscriptions: Vec<Subscription>,
    dispatcher: EventDispatcher,
    state: watch::Sender<WorkerState>,
}

impl<C: PubSubConnector> SubscriptionWorker<C> {
    pub fn new(
        connector: C,
        config: &OpcuaConfig,
        dispatcher: EventDispatcher,
    ) -> Result<Self, BrowsePathError> {
        let subscriptions = config
            .points
            .iter()
            .map(|point| {
                Ok(Subscription {
                    path: point.parsed_path()?,
                    point: point.clone(),
                })
            })
            .collect::<Result<Vec<_>, BrowsePathError>>()?;

        let (state, _) = watch::channel(WorkerState::Disconnected);

        Ok(Self {
            connector,
            endpoint: config.endpoint.clone(),
            namespace_uri: config.namespace_uri.clone(),
            subscriptions,
            dispatcher,
            state,
        })
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Never returns an error: every session failure is logged and retried.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            endpoint = %self.endpoint,
            points = self.subscriptions.len(),
            "OPC UA worker started"
        );

        loop {
            let mut session: Option<C::Session> = None;

            let outcome = tokio::select! {
                result = self.run_session(&mut session) => Some(result),
                _ = shutdown_requested(&mut shutdown) => None,
            };

            match &outcome {
                Some(Ok(reason)) => {
                    info!(endpoint = %self.endpoint, %reason, "Session invalidated")
                }
                Some(Err(e)) => warn!(endpoint = %self.endpoint, error = %e, "Session failed"),
                None => info!(endpoint = %self.endpoint, "Shutdown requested"),
            }

            self.teardown(session.take()).await;

            if outcome.is_none() {
                break;
            }

            info!(delay = ?RECONNECT_DELAY, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(endpoint = %self.endpoint, "OPC UA worker stopped");
    }

    /// One session from connect to invalidation.
    ///
    /// Returns the invalidation reason; the session handle is left in `slot`
    /// for teardown.
    async fn run_session(
        &self,
        slot: &mut Option<C::Session>,
    ) -> Result<String, TransportError> {
        self.set_state(WorkerState::Connecting);
        debug!(endpoint = %self.endpoint, "Connecting");

        let (tx, mut notifications) = mpsc::unbounded_channel();
        let session = slot.insert(self.connector.connect(&self.endpoint, tx).await?);
        self.set_state(WorkerState::Established);

        let index = session.namespace_index(&self.namespace_uri).await?;
        debug!(namespace = %self.namespace_uri, index, "Namespace resolved");

        self.set_state(WorkerState::Subscribing);
        let mut points: HashMap<NodeOf<C>, &SubscribedPoint> = HashMap::new();
        let mut nodes = Vec::with_capacity(self.subscriptions.len());
        for sub in &self.subscriptions {
            let node = session.resolve(&sub.path.qualify(index)).await?;
            debug!(point = %sub.point.name, node = ?node, "Resolved");
            points.insert(node.clone(), &sub.point);
            nodes.push(node);
        }

        session.subscribe(PUBLISHING_INTERVAL, &nodes).await?;
        self.set_state(WorkerState::Active);
        info!(endpoint = %self.endpoint, nodes = nodes.len(), "Subscription active");

        while let Some(notification) = notifications.recv().await {
            match notification {
                SessionNotification::DataChange { node, value } => {
                    self.forward(&points, &node, value);
                }
                SessionNotification::StatusChange { reason } => return Ok(reason),
            }
        }

        Ok("notification channel closed".to_string())
    }

    fn forward(
        &self,
        points: &HashMap<NodeOf<C>, &SubscribedPoint>,
        node: &NodeOf<C>,
        value: serde_json::Value,
    ) {
        let Some(point) = points.get(node) else {
            warn!(node = ?node, %value, "Data change for unknown node, ignoring");
            return;
        };

        info!(point = %point.name, %value, webhook = %point.webhook, "Data change");
        self.dispatcher
            .spawn_dispatch(Event::new(&point.name, value, &point.webhook));
    }

    async fn teardown(&self, session: Option<C::Session>) {
        self.set_state(WorkerState::Teardown);

        if let Some(mut session) = session {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, session.disconnect()).await {
                Ok(Ok(())) => debug!(endpoint = %self.endpoint, "Session closed"),
                Ok(Err(e)) => debug!(endpoint = %self.endpoint, error = %e, "Disconnect failed"),
                Err(_) => debug!(endpoint = %self.endpoint, "Disconnect timed out"),
            }
        }

        self.set_state(WorkerState::Disconnected);
    }

    fn set_state(&self, state: WorkerState) {
        debug!(%state, "Worker state");
        self.state.send_replace(state);
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
