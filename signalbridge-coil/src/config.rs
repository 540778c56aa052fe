//! Configuration for the coil bridge.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signalbridge_framework::{BridgeConfig, BridgeError, LoggingConfig, Result, WebhookConfig};
use tokio_serial::{DataBits, Parity, StopBits};

use crate::edge::CoilSpan;
use crate::frame::MAX_READ_COILS;
use crate::link::SerialSettings;
use crate::monitor::MonitorSettings;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoilBridgeConfig {
    /// Webhook delivery settings
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Coil-specific settings
    pub coil: CoilConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coil monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoilConfig {
    /// Devices to poll, one monitor each
    pub devices: Vec<DeviceConfig>,
}

/// One Modbus RTU slave on a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (used in logs)
    pub name: String,

    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,

    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Parity (default: none)
    #[serde(default)]
    pub parity: ParityConfig,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Data bits: 5 to 8 (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Per-request read timeout in milliseconds (default: 50)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Modbus slave ID, 1-247 (default: 3)
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Poll interval in milliseconds (default: 10)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Coils to watch for rising edges
    pub coils: Vec<CoilPoint>,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_stop_bits() -> u8 {
    1
}

fn default_data_bits() -> u8 {
    8
}

fn default_read_timeout_ms() -> u64 {
    50
}

fn default_slave_id() -> u8 {
    3
}

fn default_poll_interval_ms() -> u64 {
    10
}

/// A watched coil and the event it raises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilPoint {
    /// Coil address (0-based)
    pub address: u16,

    /// Event name sent to the webhook
    pub name: String,

    /// Webhook path (or absolute URL) for this coil
    pub webhook: String,
}

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    #[serde(alias = "N")]
    None,
    #[serde(alias = "E")]
    Even,
    #[serde(alias = "O")]
    Odd,
}

impl From<ParityConfig> for Parity {
    fn from(parity: ParityConfig) -> Self {
        match parity {
            ParityConfig::None => Parity::None,
            ParityConfig::Even => Parity::Even,
            ParityConfig::Odd => Parity::Odd,
        }
    }
}

impl BridgeConfig for CoilBridgeConfig {
    fn webhook(&self) -> &WebhookConfig {
        &self.webhook
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn validate(&self) -> Result<()> {
        if self.coil.devices.is_empty() {
            return Err(BridgeError::validation(
                "At least one device must be configured",
            ));
        }

        let mut names = HashSet::new();
        for device in &self.coil.devices {
            if device.name.is_empty() {
                return Err(BridgeError::validation("Device name cannot be empty"));
            }
            if !names.insert(device.name.as_str()) {
                return Err(BridgeError::validation(format!(
                    "Duplicate device name '{}'",
                    device.name
                )));
            }
            device.validate()?;
        }

        Ok(())
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        let fail =
            |msg: String| BridgeError::validation(format!("Device '{}': {}", self.name, msg));

        if self.port.is_empty() {
            return Err(fail("port cannot be empty".to_string()));
        }

        if !(1..=247).contains(&self.slave_id) {
            return Err(fail("slave_id must be 1-247".to_string()));
        }

        if !matches!(self.stop_bits, 1 | 2) {
            return Err(fail(format!("invalid stop_bits {} (use 1 or 2)", self.stop_bits)));
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(fail(format!("invalid data_bits {} (use 5-8)", self.data_bits)));
        }

        if self.read_timeout_ms == 0 {
            return Err(fail("read_timeout_ms must be greater than 0".to_string()));
        }

        if self.coils.is_empty() {
            return Err(fail("at least one coil must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for coil in &self.coils {
            if !seen.insert(coil.address) {
                return Err(fail(format!("duplicate coil address {}", coil.address)));
            }
            if coil.name.is_empty() {
                return Err(fail(format!("coil {} has an empty name", coil.address)));
            }
            if coil.webhook.is_empty() {
                return Err(fail(format!("coil {} has an empty webhook", coil.address)));
            }
        }

        let span = CoilSpan::covering(seen.iter().copied());
        if let Some(span) = span.filter(|s| s.quantity > MAX_READ_COILS) {
            return Err(fail(format!(
                "coil span {} exceeds {} (starting at {})",
                span.quantity, MAX_READ_COILS, span.start
            )));
        }

        Ok(())
    }

    /// Serial port parameters for this device.
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            port: self.port.clone(),
            baud_rate: self.baud_rate,
            parity: self.parity.into(),
            stop_bits: match self.stop_bits {
                2 => StopBits::Two,
                _ => StopBits::One,
            },
            data_bits: match self.data_bits {
                5 => DataBits::Five,
                6 => DataBits::Six,
                7 => DataBits::Seven,
                _ => DataBits::Eight,
            },
            read_timeout: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Monitor parameters for this device.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            name: self.name.clone(),
            slave_id: self.slave_id,
            addresses: self.coils.iter().map(|c| c.address).collect(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stop_timeout: MonitorSettings::DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Look up the configured coil at `address`.
    pub fn coil(&self, address: u16) -> Option<&CoilPoint> {
        self.coils.iter().find(|c| c.address == address)
    }
}
