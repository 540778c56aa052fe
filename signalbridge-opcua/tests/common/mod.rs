//! Scripted pub/sub server shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use signalbridge_opcua::{
    NotificationSender, OpcuaConfig, PubSubConnector, PubSubSession, QualifiedName,
    SessionNotification, SubscribedPoint, TransportError,
};

pub const ENDPOINT: &str = "opc.tcp://mock:4840/freeopcua/server/";
pub const NAMESPACE: &str = "http://examples.freeopcua.github.io";
pub const NAMESPACE_INDEX: u16 = 2;

/// Node identity: which session resolved it, and the qualified path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockNode {
    pub generation: usize,
    pub path: String,
}

impl MockNode {
    pub fn new(generation: usize, path: &str) -> Self {
        Self {
            generation,
            path: path.to_string(),
        }
    }
}

#[derive(Default)]
pub struct Server {
    pub connects: usize,
    pub disconnects: usize,
    pub fail_connects: usize,
    pub fail_resolves: usize,
    pub fail_writes: bool,
    pub senders: Vec<NotificationSender<MockNode>>,
    pub subscriptions: Vec<(Duration, Vec<MockNode>)>,
    pub writes: Vec<(MockNode, Value)>,
}

#[derive(Clone, Default)]
pub struct MockServer(pub Arc<Mutex<Server>>);

pub struct MockSession {
    server: Arc<Mutex<Server>>,
    generation: usize,
}

impl MockServer {
    pub fn with<R>(&self, f: impl FnOnce(&mut Server) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn connects(&self) -> usize {
        self.with(|s| s.connects)
    }

    pub fn disconnects(&self) -> usize {
        self.with(|s| s.disconnects)
    }

    /// Push a notification into the session opened by the `generation`-th
    /// successful connect (1-based).
    pub fn notify(&self, generation: usize, notification: SessionNotification<MockNode>) {
        self.with(|s| {
            let _ = s.senders[generation - 1].send(notification);
        });
    }

    pub fn subscription(&self, index: usize) -> (Duration, Vec<MockNode>) {
        self.with(|s| s.subscriptions[index].clone())
    }
}

impl PubSubConnector for MockServer {
    type Session = MockSession;

    async fn connect(
        &self,
        _endpoint: &str,
        notifications: NotificationSender<MockNode>,
    ) -> Result<MockSession, TransportError> {
        let mut server = self.0.lock().unwrap();
        server.connects += 1;
        if server.fail_connects > 0 {
            server.fail_connects -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        server.senders.push(notifications);
        Ok(MockSession {
            server: self.0.clone(),
            generation: server.senders.len(),
        })
    }
}

impl PubSubSession for MockSession {
    type Node = MockNode;

    async fn namespace_index(&mut self, namespace_uri: &str) -> Result<u16, TransportError> {
        if namespace_uri == NAMESPACE {
            Ok(NAMESPACE_INDEX)
        } else {
            Err(TransportError::NamespaceNotFound(namespace_uri.to_string()))
        }
    }

    async fn resolve(&mut self, path: &[QualifiedName]) -> Result<MockNode, TransportError> {
        let path = path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/");
        let mut server = self.server.lock().unwrap();
        if server.fail_resolves > 0 {
            server.fail_resolves -= 1;
            return Err(TransportError::Browse {
                path,
                reason: "BadNoMatch".to_string(),
            });
        }
        Ok(MockNode {
            generation: self.generation,
            path,
        })
    }

    async fn subscribe(
        &mut self,
        publishing_interval: Duration,
        nodes: &[MockNode],
    ) -> Result<(), TransportError> {
        let mut server = self.server.lock().unwrap();
        server
            .subscriptions
            .push((publishing_interval, nodes.to_vec()));
        Ok(())
    }

    async fn write_value(&mut self, node: &MockNode, value: Value) -> Result<(), TransportError> {
        let mut server = self.server.lock().unwrap();
        if server.fail_writes {
            return Err(TransportError::Write("BadNotWritable".to_string()));
        }
        server.writes.push((node.clone(), value));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.server.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

pub fn point(name: &str, folder: &str) -> SubscribedPoint {
    SubscribedPoint {
        name: name.to_string(),
        browse_path: vec![
            "0:Objects".to_string(),
            format!("{{idx}}:{}", folder),
            format!("{{idx}}:read_{}", name),
        ],
        webhook: format!("/api/v1/{}/{}", folder.to_lowercase(), name),
    }
}

pub fn config(points: Vec<SubscribedPoint>) -> OpcuaConfig {
    OpcuaConfig {
        endpoint: ENDPOINT.to_string(),
        namespace_uri: NAMESPACE.to_string(),
        points,
    }
}
