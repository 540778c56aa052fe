//! Coil bridge binary.
//!
//! Watches Modbus RTU coils and posts an event to a webhook on every rising
//! edge.

use anyhow::Context;
use signalbridge_coil::{CoilBridgeConfig, CoilMonitor, SerialLinkOpener, WebhookHandler};
use signalbridge_framework::run_bridge;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_bridge::<CoilBridgeConfig, _>("signalbridge-coil", "coil.json5", |runner| {
        let runtime = tokio::runtime::Handle::current();
        let mut monitors = Vec::new();

        for device in &runner.config().coil.devices {
            let opener = SerialLinkOpener::new(device.serial_settings());
            let mut monitor = CoilMonitor::new(device.monitor_settings(), opener)
                .with_context(|| format!("Invalid coil layout for device '{}'", device.name))?;

            let handler = WebhookHandler::new(device, runner.dispatcher(), runtime.clone());
            monitor
                .start(handler)
                .with_context(|| format!("Failed to start monitor for '{}'", device.name))?;

            tracing::info!(
                device = %device.name,
                port = %device.port,
                coils = device.coils.len(),
                "Monitoring coils"
            );
            monitors.push(monitor);
        }

        runner.on_shutdown(move || {
            for monitor in &mut monitors {
                monitor.stop();
            }
        });

        Ok(())
    })
    .await
}
