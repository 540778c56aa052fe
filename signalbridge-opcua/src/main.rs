//! OPC UA bridge binary.
//!
//! Subscribes to the configured points and posts every data change to its
//! webhook, reconnecting whenever the session is invalidated.

use anyhow::Context;
use signalbridge_framework::run_bridge;
use signalbridge_opcua::{OpcuaBridgeConfig, OpcuaConnector, SubscriptionWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_bridge::<OpcuaBridgeConfig, _>("signalbridge-opcua", "opcua.json5", |runner| {
        let opcua = &runner.config().opcua;
        let worker = SubscriptionWorker::new(
            OpcuaConnector::new("signalbridge-opcua"),
            opcua,
            runner.dispatcher(),
        )
        .context("Invalid point configuration")?;

        tracing::info!(
            endpoint = %opcua.endpoint,
            points = opcua.points.len(),
            "Subscribing to OPC UA points"
        );

        let shutdown = runner.shutdown_signal();
        runner.spawn(worker.run(shutdown));
        Ok(())
    })
    .await
}
