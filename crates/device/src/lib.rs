//! Device - collection capability and lifecycle control
//!
//! Provides:
//! - [`Device`]: the capability interface a concrete device implements
//! - [`CollectionController`]: idempotent start/stop on top of a device
//! - [`SimulatedDevice`]: synthetic sample generator for bench setups
//! - `RecordingDevice`: in-memory device that records every call, behind the
//!   `testing` feature

mod capability;
mod controller;
#[cfg(any(test, feature = "testing"))]
mod recording;
mod simulated;

pub use capability::{Device, DeviceHandle};
pub use controller::{CollectionController, CollectionControllerHandle};
#[cfg(any(test, feature = "testing"))]
pub use recording::{DeviceCall, RecordingDevice};
pub use simulated::SimulatedDevice;
