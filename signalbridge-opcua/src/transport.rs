//! Publish/subscribe transport seam.
//!
//! The worker and the actuation client only talk to a server through these
//! traits. The OPC UA implementation lives in `opcua_client` (feature `opcua`);
//! tests plug in scripted servers.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::browse::QualifiedName;

/// Transport-level failures. The worker answers all of them with a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Namespace '{0}' not found on server")]
    NamespaceNotFound(String),

    #[error("Failed to resolve '{path}': {reason}")]
    Browse { path: String, reason: String },

    #[error("Subscription failed: {0}")]
    Subscribe(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Disconnect failed: {0}")]
    Disconnect(String),

    #[error("Session closed")]
    Closed,
}

/// Something the server pushed to an open session.
///
/// Sent from whatever thread the transport runs its callbacks on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotification<N> {
    /// A subscribed node changed value.
    DataChange { node: N, value: serde_json::Value },
    /// The session or its subscription is no longer valid.
    StatusChange { reason: String },
}

/// Sending half handed to the transport at connect time.
pub type NotificationSender<N> = mpsc::UnboundedSender<SessionNotification<N>>;

/// Node identity type of a connector's sessions.
pub type NodeOf<C> = <<C as PubSubConnector>::Session as PubSubSession>::Node;

/// Opens sessions to a publish/subscribe server.
pub trait PubSubConnector: Send + Sync + 'static {
    type Session: PubSubSession;

    /// Open a session. Notifications for its lifetime go to `notifications`.
    fn connect(
        &self,
        endpoint: &str,
        notifications: NotificationSender<<Self::Session as PubSubSession>::Node>,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// One live session. Node identities are only valid within it.
pub trait PubSubSession: Send + 'static {
    type Node: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Numeric index of a namespace URI on this server.
    fn namespace_index(
        &mut self,
        namespace_uri: &str,
    ) -> impl Future<Output = Result<u16, TransportError>> + Send;

    /// Walk the hierarchy from the root folder along `path`.
    fn resolve(
        &mut self,
        path: &[QualifiedName],
    ) -> impl Future<Output = Result<Self::Node, TransportError>> + Send;

    /// Create one subscription covering `nodes`.
    fn subscribe(
        &mut self,
        publishing_interval: Duration,
        nodes: &[Self::Node],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Write a value to a node.
    fn write_value(
        &mut self,
        node: &Self::Node,
        value: serde_json::Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Close the session. Closing an already-closed session is not an error.
    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
