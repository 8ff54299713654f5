//! Device-I/O bridge and transports built on top of the bus

mod bridge;
#[cfg(feature = "debug-tools")]
mod capture;
mod error;
mod table;
pub mod tunnel;

pub use bridge::{BusFactory, BusPort, DeviceIo, PortConfig};
#[cfg(feature = "debug-tools")]
pub use capture::{Direction, TrafficRecorder};
pub use error::{FailurePolicy, TransportError};
pub use table::{PortId, PortTable};
pub use tunnel::{BoardCommands, InputWord, TunnelConfig, TunnelPort};
