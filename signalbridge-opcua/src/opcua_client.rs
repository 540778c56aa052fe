//! OPC UA transport over the `opcua` client crate.
//!
//! The client is synchronous and drives its own runtime, so every call runs on
//! a short-lived OS thread outside the tokio runtime and hands its result back
//! through a oneshot channel.

use std::sync::Arc;
use std::time::Duration;

use opcua::client::prelude as ua;
use opcua::client::prelude::{
    AttributeService, MonitoredItemService, SubscriptionService, ViewService,
};
use opcua::sync::RwLock;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::browse::QualifiedName;
use crate::transport::{
    NotificationSender, PubSubConnector, PubSubSession, SessionNotification, TransportError,
};

const DEFAULT_APPLICATION_NAME: &str = "signalbridge";

/// Subscription lifetime and keep-alive, in publishing intervals.
const LIFETIME_COUNT: u32 = 30;
const MAX_KEEP_ALIVE_COUNT: u32 = 10;

/// Opens anonymous sessions without message security.
#[derive(Debug, Clone)]
pub struct OpcuaConnector {
    application_name: String,
}

impl OpcuaConnector {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
        }
    }
}

impl Default for OpcuaConnector {
    fn default() -> Self {
        Self::new(DEFAULT_APPLICATION_NAME)
    }
}

impl PubSubConnector for OpcuaConnector {
    type Session = OpcuaSession;

    async fn connect(
        &self,
        endpoint: &str,
        notifications: NotificationSender<ua::NodeId>,
    ) -> Result<OpcuaSession, TransportError> {
        let name = self.application_name.clone();
        let endpoint = endpoint.to_string();
        off_runtime(move || open_session(&name, &endpoint, notifications)).await
    }
}

fn open_session(
    name: &str,
    endpoint: &str,
    notifications: NotificationSender<ua::NodeId>,
) -> Result<OpcuaSession, TransportError> {
    let mut client = ua::ClientBuilder::new()
        .application_name(name)
        .application_uri(format!("urn:{}", name))
        .create_sample_keypair(true)
        .trust_server_certs(true)
        .session_retry_limit(0)
        .client()
        .ok_or_else(|| TransportError::Connect("invalid client configuration".to_string()))?;

    let session = client
        .connect_to_endpoint(
            (
                endpoint,
                ua::SecurityPolicy::None.to_str(),
                ua::MessageSecurityMode::None,
                ua::UserTokenPolicy::anonymous(),
            ),
            ua::IdentityToken::Anonymous,
        )
        .map_err(|status| TransportError::Connect(format!("{}: {}", endpoint, status)))?;

    {
        let mut s = session.write();

        let tx = notifications.clone();
        s.set_connection_status_callback(ua::ConnectionStatusCallback::new(
            move |connected| {
                if !connected {
                    let _ = tx.send(SessionNotification::StatusChange {
                        reason: "connection lost".to_string(),
                    });
                }
            },
        ));

        let tx = notifications.clone();
        s.set_session_closed_callback(ua::SessionClosedCallback::new(move |status| {
            let _ = tx.send(SessionNotification::StatusChange {
                reason: format!("session closed: {}", status),
            });
        }));
    }

    debug!(%endpoint, "OPC UA session opened");
    Ok(OpcuaSession {
        session,
        notifications,
        stop: None,
    })
}

/// A live OPC UA session.
pub struct OpcuaSession {
    session: Arc<RwLock<ua::Session>>,
    notifications: NotificationSender<ua::NodeId>,
    /// Present once the session's run loop has been started.
    stop: Option<oneshot::Sender<ua::SessionCommand>>,
}

impl PubSubSession for OpcuaSession {
    type Node = ua::NodeId;

    async fn namespace_index(&mut self, namespace_uri: &str) -> Result<u16, TransportError> {
        let session = self.session.clone();
        let uri = namespace_uri.to_string();

        off_runtime(move || {
            let request = value_of(ua::VariableId::Server_NamespaceArray.into());
            let values = session
                .read()
                .read(&[request], ua::TimestampsToReturn::Neither, 0.0)
                .map_err(|status| {
                    TransportError::NamespaceNotFound(format!("{} ({})", uri, status))
                })?;

            let position = match values.first().and_then(|v| v.value.as_ref()) {
                Some(ua::Variant::Array(array)) => array
                    .values
                    .iter()
                    .position(|v| matches!(v, ua::Variant::String(s) if s.as_ref() == uri)),
                _ => None,
            };

            position
                .and_then(|i| u16::try_from(i).ok())
                .ok_or(TransportError::NamespaceNotFound(uri))
        })
        .await
    }

    async fn resolve(&mut self, path: &[QualifiedName]) -> Result<ua::NodeId, TransportError> {
        let session = self.session.clone();
        let display = path
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/");
        let elements = path
            .iter()
            .map(|segment| ua::RelativePathElement {
                reference_type_id: ua::ReferenceTypeId::HierarchicalReferences.into(),
                is_inverse: false,
                include_subtypes: true,
                target_name: ua::QualifiedName::new(segment.namespace, segment.name.as_str()),
            })
            .collect();

        off_runtime(move || {
            let request = ua::BrowsePath {
                starting_node: ua::ObjectId::RootFolder.into(),
                relative_path: ua::RelativePath {
                    elements: Some(elements),
                },
            };
            let browse_error = |reason: String| TransportError::Browse {
                path: display.clone(),
                reason,
            };

            let result = session
                .read()
                .translate_browse_paths_to_node_ids(&[request])
                .map_err(|status| browse_error(status.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| browse_error("empty response".to_string()))?;

            if !result.status_code.is_good() {
                return Err(browse_error(result.status_code.to_string()));
            }

            result
                .targets
                .and_then(|targets| targets.into_iter().next())
                .map(|target| target.target_id.node_id)
                .ok_or_else(|| browse_error("no target".to_string()))
        })
        .await
    }

    async fn subscribe(
        &mut self,
        publishing_interval: Duration,
        nodes: &[ua::NodeId],
    ) -> Result<(), TransportError> {
        let session = self.session.clone();
        let tx = self.notifications.clone();
        let requests: Vec<ua::MonitoredItemCreateRequest> =
            nodes.iter().cloned().map(Into::into).collect();
        let interval_ms = publishing_interval.as_secs_f64() * 1000.0;

        off_runtime(move || {
            let s = session.read();
            let subscription_id = s
                .create_subscription(
                    interval_ms,
                    LIFETIME_COUNT,
                    MAX_KEEP_ALIVE_COUNT,
                    0,
                    0,
                    true,
                    ua::DataChangeCallback::new(move |items| {
                        for item in items {
                            let value = item
                                .last_value()
                                .value
                                .as_ref()
                                .map_or(Value::Null, variant_to_json);
                            let _ = tx.send(SessionNotification::DataChange {
                                node: item.item_to_monitor().node_id.clone(),
                                value,
                            });
                        }
                    }),
                )
                .map_err(|status| TransportError::Subscribe(status.to_string()))?;

            let results = s
                .create_monitored_items(
                    subscription_id,
                    ua::TimestampsToReturn::Both,
                    &requests,
                )
                .map_err(|status| TransportError::Subscribe(status.to_string()))?;

            match results.iter().find(|r| !r.status_code.is_good()) {
                Some(bad) => Err(TransportError::Subscribe(format!(
                    "monitored item rejected: {}",
                    bad.status_code
                ))),
                None => Ok(()),
            }
        })
        .await?;

        // Publish requests and connection monitoring run from here on.
        self.stop = Some(ua::Session::run_async(self.session.clone()));
        Ok(())
    }

    async fn write_value(
        &mut self,
        node: &ua::NodeId,
        value: Value,
    ) -> Result<(), TransportError> {
        let session = self.session.clone();
        let request = ua::WriteValue {
            node_id: node.clone(),
            attribute_id: ua::AttributeId::Value as u32,
            index_range: ua::UAString::null(),
            value: ua::DataValue::value_only(json_to_variant(value)),
        };

        off_runtime(move || {
            let results = session
                .read()
                .write(&[request])
                .map_err(|status| TransportError::Write(status.to_string()))?;

            match results.first() {
                Some(status) if status.is_good() => Ok(()),
                Some(status) => Err(TransportError::Write(status.to_string())),
                None => Err(TransportError::Write("empty response".to_string())),
            }
        })
        .await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let session = self.session.clone();
        let stop = self.stop.take();

        off_runtime(move || {
            if let Some(stop) = stop {
                let _ = stop.send(ua::SessionCommand::Stop);
            }
            session.write().disconnect();
            Ok(())
        })
        .await
    }
}

/// Run a blocking client call on its own thread.
async fn off_runtime<T, F>(call: F) -> Result<T, TransportError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("opcua-call".to_string())
        .spawn(move || {
            let _ = tx.send(call());
        })
        .map_err(|e| TransportError::Connect(format!("failed to spawn client thread: {}", e)))?;

    rx.await.map_err(|_| TransportError::Closed)?
}

fn value_of(node_id: ua::NodeId) -> ua::ReadValueId {
    ua::ReadValueId {
        node_id,
        attribute_id: ua::AttributeId::Value as u32,
        index_range: ua::UAString::null(),
        data_encoding: ua::QualifiedName::null(),
    }
}

/// Booleans, numbers and strings map directly; anything else is stringified.
fn variant_to_json(variant: &ua::Variant) -> Value {
    match variant {
        ua::Variant::Empty => Value::Null,
        ua::Variant::Boolean(v) => Value::Bool(*v),
        ua::Variant::SByte(v) => Value::from(*v),
        ua::Variant::Byte(v) => Value::from(*v),
        ua::Variant::Int16(v) => Value::from(*v),
        ua::Variant::UInt16(v) => Value::from(*v),
        ua::Variant::Int32(v) => Value::from(*v),
        ua::Variant::UInt32(v) => Value::from(*v),
        ua::Variant::Int64(v) => Value::from(*v),
        ua::Variant::UInt64(v) => Value::from(*v),
        ua::Variant::Float(v) => Value::from(f64::from(*v)),
        ua::Variant::Double(v) => Value::from(*v),
        ua::Variant::String(v) => Value::String(v.as_ref().to_string()),
        other => Value::String(format!("{:?}", other)),
    }
}

fn json_to_variant(value: Value) -> ua::Variant {
    match value {
        Value::Null => ua::Variant::Empty,
        Value::Bool(v) => ua::Variant::Boolean(v),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ua::Variant::Int64(i),
            None => ua::Variant::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => ua::Variant::String(s.into()),
        other => ua::Variant::String(other.to_string().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variant_to_json() {
        assert_eq!(variant_to_json(&ua::Variant::Boolean(true)), json!(true));
        assert_eq!(variant_to_json(&ua::Variant::Int32(-7)), json!(-7));
        assert_eq!(variant_to_json(&ua::Variant::Double(1.5)), json!(1.5));
        assert_eq!(
            variant_to_json(&ua::Variant::String("box".into())),
            json!("box")
        );
        assert_eq!(variant_to_json(&ua::Variant::Empty), Value::Null);
    }

    #[test]
    fn test_json_to_variant() {
        assert_eq!(json_to_variant(json!(true)), ua::Variant::Boolean(true));
        assert_eq!(json_to_variant(json!(3)), ua::Variant::Int64(3));
        assert_eq!(json_to_variant(json!(0.25)), ua::Variant::Double(0.25));
        assert_eq!(
            json_to_variant(json!("go")),
            ua::Variant::String("go".into())
        );
    }

    #[test]
    fn test_default_application_name() {
        assert_eq!(OpcuaConnector::default().application_name, "signalbridge");
    }
}
