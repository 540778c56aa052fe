//! One-shot writes back to equipment.
//!
//! Every call opens its own session and closes it again; nothing is kept
//! between calls.

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::browse::{BrowsePath, BrowsePathError};
use crate::transport::{PubSubConnector, PubSubSession, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActuationError {
    #[error("Invalid browse path: {0}")]
    Path(#[from] BrowsePathError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Connect, write, disconnect.
pub struct ActuationClient<C: PubSubConnector> {
    connector: C,
    endpoint: String,
    namespace_uri: String,
}

impl<C: PubSubConnector> ActuationClient<C> {
    pub fn new(
        connector: C,
        endpoint: impl Into<String>,
        namespace_uri: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            namespace_uri: namespace_uri.into(),
        }
    }

    /// Write `value` to `Objects/<folder>/<node>`.
    pub async fn write_point(
        &self,
        folder: &str,
        node: &str,
        value: impl Into<Value>,
    ) -> Result<(), ActuationError> {
        let path = BrowsePath::object(folder, node)?;
        self.write(&path, value.into()).await
    }

    /// Write `value` to the node at `path`.
    ///
    /// The session is closed whether or not the write succeeded; a failed
    /// close is not reported.
    pub async fn write(&self, path: &BrowsePath, value: Value) -> Result<(), ActuationError> {
        // Nothing is subscribed, so notifications are dropped.
        let (tx, _notifications) = mpsc::unbounded_channel();
        let mut session = self.connector.connect(&self.endpoint, tx).await?;

        let result = write_once(&mut session, &self.namespace_uri, path, value).await;

        if let Err(e) = session.disconnect().await {
            debug!(endpoint = %self.endpoint, error = %e, "Disconnect after write failed");
        }

        result?;
        info!(endpoint = %self.endpoint, %path, "Value written");
        Ok(())
    }
}

async fn write_once<S: PubSubSession>(
    session: &mut S,
    namespace_uri: &str,
    path: &BrowsePath,
    value: Value,
) -> Result<(), TransportError> {
    let index = session.namespace_index(namespace_uri).await?;
    let node = session.resolve(&path.qualify(index)).await?;
    session.write_value(&node, value).await
}
