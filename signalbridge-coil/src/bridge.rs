//! Turns rising edges into webhook events.

use std::collections::HashMap;

use signalbridge_framework::{Event, EventDispatcher};
use tokio::runtime::Handle;

use crate::config::{CoilPoint, DeviceConfig};
use crate::monitor::RisingEdgeHandler;

/// Rising-edge handler that posts one event per edge.
///
/// Runs on the polling thread and only schedules delivery on the runtime, so
/// a slow webhook never delays the next poll.
pub struct WebhookHandler {
    device: String,
    coils: HashMap<u16, CoilPoint>,
    dispatcher: EventDispatcher,
    runtime: Handle,
}

impl WebhookHandler {
    pub fn new(device: &DeviceConfig, dispatcher: EventDispatcher, runtime: Handle) -> Self {
        Self {
            device: device.name.clone(),
            coils: device.coils.iter().map(|c| (c.address, c.clone())).collect(),
            dispatcher,
            runtime,
        }
    }

    /// Event for a rising edge at `address`, if the coil is configured.
    pub fn event_for(&self, address: u16) -> Option<Event> {
        self.coils
            .get(&address)
            .map(|coil| Event::new(&coil.name, true, &coil.webhook))
    }
}

impl RisingEdgeHandler for WebhookHandler {
    fn on_rising_edge(&mut self, address: u16) -> anyhow::Result<()> {
        let event = self.event_for(address).ok_or_else(|| {
            anyhow::anyhow!("device '{}' has no coil at {}", self.device, address)
        })?;

        tracing::info!(
            device = %self.device,
            address,
            event = %event.name,
            "Coil triggered"
        );
        self.dispatcher.spawn_dispatch_on(&self.runtime, event);

        Ok(())
    }
}
