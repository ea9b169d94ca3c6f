//! Simulated devices and the periodic tasks that drive them.
//!
//! Devices come from module declarations found in the instrument tree. Each
//! one is driven by a [`PeriodicTask`] that either publishes to the message
//! bus ([`BusDriver`]) or writes to a served control variable
//! ([`VariableDriver`]).

pub mod bus;
pub mod client;
pub mod device;
pub mod drivers;
pub mod simulation;
pub mod task;

pub use bus::{BusError, Producer};
pub use client::{ClientError, VariableClient};
pub use device::{Device, DeviceError, DeviceInfo, DeviceRegistry};
pub use drivers::{bus_tasks, variable_tasks, BusDriver, DriverError, VariableDriver};
pub use simulation::Simulation;
pub use task::{PeriodicTask, TaskError, TickError, Work, DEFAULT_PERIOD, MIN_PERIOD};
