//! OPC UA bridge.
//!
//! Keeps one subscription open on an OPC UA server and forwards every data
//! change of the configured points to a webhook. The session heals itself:
//! whenever the server reports a status change, the worker tears the session
//! down and builds a fresh one after a fixed delay.
//!
//! # Events
//!
//! ```text
//! POST <base_url><webhook>   {"event": "<name>", "value": <new value>}
//! ```
//!
//! The transport is abstracted behind [`PubSubConnector`]; the real OPC UA
//! client is compiled with the `opcua` feature.

pub mod actuation;
pub mod browse;
pub mod config;
#[cfg(feature = "opcua")]
pub mod opcua_client;
pub mod transport;
pub mod worker;

pub use actuation::{ActuationClient, ActuationError};
pub use browse::{BrowsePath, BrowsePathError, QualifiedName};
pub use config::{OpcuaBridgeConfig, OpcuaConfig, SubscribedPoint};
#[cfg(feature = "opcua")]
pub use opcua_client::{OpcuaConnector, OpcuaSession};
pub use transport::{
    NotificationSender, PubSubConnector, PubSubSession, SessionNotification, TransportError,
};
pub use worker::{PUBLISHING_INTERVAL, RECONNECT_DELAY, SubscriptionWorker, WorkerState};
