//! Configuration for the OPC UA bridge.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use signalbridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result, WebhookConfig};

use crate::browse::BrowsePath;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcuaBridgeConfig {
    /// Webhook delivery settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// OPC UA settings
    pub opcua: OpcuaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server and subscribed points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcuaConfig {
    /// Server endpoint (e.g., "opc.tcp://plc:4840/freeopcua/server/")
    pub endpoint: String,

    /// Namespace URI qualifying `{idx}` browse path segments
    pub namespace_uri: String,

    /// Points to subscribe to
    pub points: Vec<SubscribedPoint>,
}

/// A subscribed data point and where its changes go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribedPoint {
    /// Event name sent to the webhook
    pub name: String,

    /// Segments from the root folder, e.g. ["0:Objects", "{idx}:PLC", "{idx}:tag"]
    pub browse_path: Vec<String>,

    /// Webhook path (or absolute URL)
    pub webhook: String,
}

impl SubscribedPoint {
    pub fn parsed_path(&self) -> std::result::Result<BrowsePath, crate::BrowsePathError> {
        BrowsePath::parse(self.browse_path.as_slice())
    }
}

impl BridgeConfig for OpcuaBridgeConfig {
    fn webhook(&self) -> &WebhookConfig {
        &self.webhook
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        let opcua = &self.opcua;

        if !opcua.endpoint.starts_with("opc.tcp://") {
            return Err(BridgeError::validation(format!(
                "endpoint '{}' must start with opc.tcp://",
                opcua.endpoint
            )));
        }

        if opcua.namespace_uri.is_empty() {
            return Err(BridgeError::validation("namespace_uri cannot be empty"));
        }

        if opcua.points.is_empty() {
            return Err(BridgeError::validation(
                "At least one point must be configured",
            ));
        }

        let mut names = HashSet::new();
        for point in &opcua.points {
            if point.name.is_empty() {
                return Err(BridgeError::validation("Point name cannot be empty"));
            }
            if !names.insert(point.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate point name '{}'",
                    point.name
                )));
            }
            if point.webhook.is_empty() {
                return Err(BridgeError::validation(format!(
                    "Point '{}': webhook cannot be empty",
                    point.name
                )));
            }
            point.parsed_path().map_err(|e| {
                BridgeError::validation(format!("Point '{}': {}", point.name, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        webhook: { base_url: "http://172.30.1.29:80" },
        opcua: {
            endpoint: "opc.tcp://172.30.1.61:4840/freeopcua/server/",
            namespace_uri: "http://examples.freeopcua.github.io",
            points: [
                {
                    name: "conveyor_sensor_check",
                    browse_path: ["0:Objects", "{idx}:PLC", "{idx}:read_conveyor_sensor_check"],
                    webhook: "/api/v1/plc/conveyor_sensor_check",
                },
                {
                    name: "arm_img",
                    browse_path: ["0:Objects", "{idx}:ARM", "{idx}:read_arm_img"],
                    webhook: "/api/v1/arm/arm_img",
                },
            ],
        },
    }"#;

    #[test]
    fn test_parse_config() {
        let config = OpcuaBridgeConfig::parse(CONFIG).unwrap();

        assert_eq!(config.opcua.points.len(), 2);
        assert_eq!(config.opcua.points[1].name, "arm_img");
        assert_eq!(config.webhook.timeout_ms, 5000);
        assert_eq!(
            config.opcua.points[0].parsed_path().unwrap().qualify(2)[2].to_string(),
            "2:read_conveyor_sensor_check"
        );
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let json = CONFIG.replace("opc.tcp://172.30.1.61", "http://172.30.1.61");
        let err = OpcuaBridgeConfig::parse(&json).unwrap_err();
        assert!(matches!(err, BridgeError::ConfigValidation(_)));
    }

    #[test]
    fn test_validate_bad_browse_path() {
        let json = CONFIG.replace(r#""{idx}:ARM""#, r#""x:ARM""#);
        let err = OpcuaBridgeConfig::parse(&json).unwrap_err();
        assert!(err.to_string().contains("Point 'arm_img'"), "{}", err);
    }

    #[test]
    fn test_validate_duplicate_names() {
        let json = CONFIG.replace(r#"name: "arm_img""#, r#"name: "conveyor_sensor_check""#);
        let err = OpcuaBridgeConfig::parse(&json).unwrap_err();
        assert!(err.to_string().contains("Duplicate point name"));
    }

    #[test]
    fn test_validate_empty_points() {
        let json = r#"{
            opcua: { endpoint: "opc.tcp://localhost:4840", namespace_uri: "urn:x", points: [] }
        }"#;
        assert!(OpcuaBridgeConfig::parse(json).is_err());
    }
}
