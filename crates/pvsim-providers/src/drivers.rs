//! Periodic drivers.
//!
//! [`BusDriver`] publishes a device's rendered readings to the message bus.
//! [`VariableDriver`] writes readings to a served control variable instead.

use std::sync::Arc;

use pvsim_core::{ModuleKind, TargetEntry, TargetFile};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::Producer;
use crate::client::VariableClient;
use crate::device::{Device, DeviceRegistry};
use crate::simulation::Simulation;
use crate::task::{PeriodicTask, TickError, Work};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Device {0} has no topic to publish to")]
    MissingTopic(String),
}

/// Publishes simulated readings of one device to its topic.
pub struct BusDriver {
    device: Device,
    topic: String,
    producer: Arc<dyn Producer>,
    simulation: Simulation,
    published: u64,
}

impl BusDriver {
    pub fn new(
        device: Device,
        producer: Arc<dyn Producer>,
        simulation: Simulation,
    ) -> Result<Self, DriverError> {
        let topic = device
            .info()
            .topic
            .clone()
            .ok_or_else(|| DriverError::MissingTopic(device.info().source_name.clone()))?;

        Ok(Self {
            device,
            topic,
            producer,
            simulation,
            published: 0,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of messages delivered so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    fn publish_error(&self, source: crate::bus::BusError) -> TickError {
        TickError::Publish {
            topic: self.topic.clone(),
            source,
        }
    }
}

impl Work for BusDriver {
    fn tick(&mut self) -> Result<(), TickError> {
        let Some(value) = self.simulation.next_value() else {
            debug!(
                "No target value for {}, skipping",
                self.device.info().source_name
            );
            return Ok(());
        };

        let payload = self.device.render(value, None)?;
        self.producer
            .produce(&self.topic, &payload)
            .map_err(|e| self.publish_error(e))?;
        self.producer.flush().map_err(|e| self.publish_error(e))?;

        self.published += 1;
        debug!("Produced value {} to topic {}", value, self.topic);
        Ok(())
    }
}

/// Writes simulated readings to one control variable.
///
/// Write failures are logged and the next tick tries again.
pub struct VariableDriver {
    name: String,
    client: Arc<dyn VariableClient>,
    simulation: Simulation,
    written: u64,
    failed: u64,
}

impl VariableDriver {
    pub fn new(name: impl Into<String>, client: Arc<dyn VariableClient>, simulation: Simulation) -> Self {
        Self {
            name: name.into(),
            client,
            simulation,
            written: 0,
            failed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}

impl Work for VariableDriver {
    fn tick(&mut self) -> Result<(), TickError> {
        let Some(value) = self.simulation.next_value() else {
            debug!("No target value for {}, skipping", self.name);
            return Ok(());
        };

        match self.client.put(&self.name, json!(value)) {
            Ok(()) => {
                self.written += 1;
                debug!("Wrote {} to {}", value, self.name);
            }
            Err(e) => {
                self.failed += 1;
                error!("Failed to write {} to {}: {}", value, self.name, e);
            }
        }
        Ok(())
    }
}

fn period_for(name: &str, entry: &TargetEntry, default_period: f64) -> f64 {
    match entry.update_period {
        Some(period) => {
            info!("Using update period {} for {}", period, name);
            period
        }
        None => default_period,
    }
}

/// One stopped [`VariableDriver`] task per served log device.
///
/// Devices without a dtype have no variable and get no task. Parameters come
/// from the matching target entry; channels without one idle until a target
/// value is configured.
pub fn variable_tasks(
    registry: &DeviceRegistry,
    targets: &TargetFile,
    client: Arc<dyn VariableClient>,
    default_period: f64,
) -> Vec<PeriodicTask<VariableDriver>> {
    let mut tasks = Vec::new();

    for (name, device) in registry.iter() {
        if device.kind() != ModuleKind::F144 || device.info().dtype.is_none() {
            continue;
        }

        let entry = targets.get(name).cloned().unwrap_or_default();
        let driver = VariableDriver::new(name, client.clone(), Simulation::from_entry(&entry));
        tasks.push(PeriodicTask::new(
            name.clone(),
            driver,
            period_for(name, &entry, default_period),
        ));
    }

    tasks
}

/// One stopped [`BusDriver`] task per device with a topic.
pub fn bus_tasks(
    registry: &DeviceRegistry,
    targets: &TargetFile,
    producer: Arc<dyn Producer>,
    default_period: f64,
) -> Vec<PeriodicTask<BusDriver>> {
    let mut tasks = Vec::new();

    for (name, device) in registry.iter() {
        let entry = targets.get(name).cloned().unwrap_or_default();
        match BusDriver::new(device.clone(), producer.clone(), Simulation::from_entry(&entry)) {
            Ok(driver) => tasks.push(PeriodicTask::new(
                name.clone(),
                driver,
                period_for(name, &entry, default_period),
            )),
            Err(e) => warn!("Not publishing {}: {}", name, e),
        }
    }

    tasks
}
