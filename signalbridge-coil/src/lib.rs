//! Modbus RTU coil bridge.
//!
//! Polls discrete coils over a serial line with Read Coils (0x01) requests and
//! turns every rising edge (OFF to ON) into a webhook event.
//!
//! # Events
//!
//! Each configured coil maps to one event:
//!
//! ```text
//! POST <base_url><webhook>   {"event": "<name>", "value": true}
//! ```
//!
//! An edge fires once; the coil must be seen OFF again before it re-arms.

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod edge;
pub mod frame;
pub mod link;
pub mod monitor;

pub use backoff::Backoff;
pub use bridge::WebhookHandler;
pub use config::{CoilBridgeConfig, CoilPoint, DeviceConfig};
pub use edge::{CoilSpan, EdgeDetector, WatchedAddress};
pub use frame::{FrameError, ReadCoilsRequest, crc16};
pub use link::{CoilLink, LinkError, LinkOpener, SerialLink, SerialLinkOpener, SerialSettings};
pub use monitor::{CoilMonitor, MonitorError, MonitorSettings, RisingEdgeHandler};
