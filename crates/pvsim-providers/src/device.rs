//! Typed devices and the device registry.
//!
//! Each module kind maps to one device variant through a fixed lookup. A
//! device turns a simulated reading into the kind-specific bus message.

use std::collections::BTreeMap;

use pvsim_core::{DeviceSpec, Dtype, ModelError, ModuleKind, TimeStamp};
use pvsim_protocol::schema::{encode_log_data, encode_trigger_data, LogData, TriggerData};
use pvsim_protocol::CodecError;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that prevent a device from being created.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Module declaration has no source")]
    MissingSource,
}

/// Fields shared by every device variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub source_name: String,
    pub topic: Option<String>,
    /// `None` when the declaration has no dtype; such devices are not served
    pub dtype: Option<Dtype>,
    pub value_units: Option<String>,
}

impl DeviceInfo {
    fn from_spec(spec: &DeviceSpec) -> Result<Self, DeviceError> {
        let source_name = spec.source.clone().ok_or(DeviceError::MissingSource)?;
        let dtype: Option<Dtype> = spec.dtype.as_deref().map(str::parse).transpose()?;

        Ok(Self {
            source_name,
            topic: spec.topic.clone(),
            dtype,
            value_units: spec.value_units.clone(),
        })
    }
}

/// Scalar log device. Stateless.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDevice {
    pub info: DeviceInfo,
}

/// Trigger device. Counts every rendered message.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDevice {
    pub info: DeviceInfo,
    sequence_counter: u64,
}

impl TriggerDevice {
    pub fn sequence_counter(&self) -> u64 {
        self.sequence_counter
    }
}

/// A simulated device, one variant per module kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Device {
    Log(LogDevice),
    Trigger(TriggerDevice),
}

impl Device {
    /// Create the device variant matching the declared module kind.
    pub fn from_spec(spec: &DeviceSpec) -> Result<Self, DeviceError> {
        let kind: ModuleKind = spec.module.parse()?;
        let info = DeviceInfo::from_spec(spec)?;

        Ok(match kind {
            ModuleKind::F144 => Device::Log(LogDevice { info }),
            ModuleKind::Tdct => Device::Trigger(TriggerDevice {
                info,
                sequence_counter: 0,
            }),
        })
    }

    pub fn kind(&self) -> ModuleKind {
        match self {
            Device::Log(_) => ModuleKind::F144,
            Device::Trigger(_) => ModuleKind::Tdct,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        match self {
            Device::Log(device) => &device.info,
            Device::Trigger(device) => &device.info,
        }
    }

    /// Encode a reading as this device's bus message.
    ///
    /// Without an explicit timestamp the current wall-clock time is used.
    /// Trigger devices increment their sequence counter first and embed the
    /// new count.
    pub fn render(&mut self, value: f64, timestamp_unix_ns: Option<i64>) -> Result<Vec<u8>, CodecError> {
        let timestamp = timestamp_unix_ns.unwrap_or_else(|| TimeStamp::now().unix_ns());

        match self {
            Device::Log(device) => encode_log_data(&LogData {
                source_name: device.info.source_name.clone(),
                value,
                timestamp_unix_ns: timestamp,
            }),
            Device::Trigger(device) => {
                device.sequence_counter += 1;
                encode_trigger_data(&TriggerData {
                    name: device.info.source_name.clone(),
                    timestamps: vec![timestamp],
                    values: vec![value],
                    sequence_counter: device.sequence_counter,
                })
            }
        }
    }
}

/// Devices keyed by channel path.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

impl DeviceRegistry {
    /// Create a device for every declaration.
    ///
    /// Declarations that cannot be turned into a device (unknown kind,
    /// unknown dtype, no source) are logged and skipped.
    pub fn from_specs(specs: &BTreeMap<String, DeviceSpec>) -> Self {
        let mut devices = BTreeMap::new();

        for (path, spec) in specs {
            match Device::from_spec(spec) {
                Ok(device) => {
                    devices.insert(path.clone(), device);
                }
                Err(e) => warn!("Skipping channel {}: {}", path, e),
            }
        }

        info!("Loaded {} of {} devices", devices.len(), specs.len());
        Self { devices }
    }

    pub fn get(&self, path: &str) -> Option<&Device> {
        self.devices.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Device)> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl IntoIterator for DeviceRegistry {
    type Item = (String, Device);
    type IntoIter = std::collections::btree_map::IntoIter<String, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}
