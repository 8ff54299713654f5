//! Multi-device ACIO bus
//!
//! A [`Bus`] owns an ordered set of [`Device`] emulators, assigns them node
//! ranges at registration, decodes inbound frames, and queues encoded replies.

#[allow(clippy::module_inception)]
mod bus;
mod device;
mod lifecycle;
mod stats;

pub use bus::{Bus, BusConfig, MAX_NODES};
pub use device::{Device, DeviceExt, NodeContext};
pub use lifecycle::Lifecycle;
pub use stats::BusStats;
