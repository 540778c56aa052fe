//! signalbridge Bridge Framework
//!
//! Common abstractions for building fieldbus bridges that turn device signals
//! into webhook events.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`EventDispatcher`] for best-effort delivery of [`Event`]s to HTTP webhooks
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use signalbridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args))?;
//!
//!     // Spawn protocol-specific workers
//!     runner.spawn(my_worker(runner.dispatcher()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod dispatcher;
mod error;
mod runner;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use dispatcher::{DeliveryFailure, DeliveryOutcome, DispatchStats, EventDispatcher};
pub use error::{BridgeError, Result};
pub use runner::{BridgeRunner, run_bridge};

// Re-export commonly used types from signalbridge-common
pub use signalbridge_common::{Event, LogFormat, LoggingConfig, WebhookConfig};
