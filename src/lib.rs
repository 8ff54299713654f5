//! ACIO - serial bus emulation for arcade I/O boards
//!
//! This library lets host software talk to emulated card readers and I/O
//! boards as if they were attached to a real ACIO serial bus. It includes the
//! byte-exact framing codec, an addressable multi-device bus, and a
//! handle-style bridge for plugging the bus into a device-file interceptor.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use acioemu::bus::Bus;
//! use acioemu::devices::{IoBoard, IoBoardConfig};
//! use acioemu::{FrameConfig, Message};
//!
//! let mut bus = Bus::default();
//! bus.register(IoBoard::new(IoBoardConfig::default(), |state: &mut [u8]| state.fill(0)))?;
//!
//! // Host sends a keepalive to node 1
//! let request = Message::new(1, 0x0080, 0, Vec::new());
//! bus.write(&request.to_frame(&FrameConfig::default())?);
//!
//! // Drain the encoded reply
//! let mut reply = [0u8; 64];
//! let len = bus.read(&mut reply);
//! assert!(len > 0);
//! # Ok::<(), acioemu::Error>(())
//! ```
//!
//! # Features
//!
//! - **Byte-exact framing** - `0xAA | LEN | ESCAPED` with optional trailing checksum
//! - **Deterministic addressing** - node ranges follow registration order
//! - **Per-instance state** - sequence tags and card slots never leak between buses
//! - **Configurable failure policy** - underruns and unknown commands can be fatal or ignored
//!
//! # Optional features
//!
//! - `serde` derives `Serialize`/`Deserialize` on every config type
//! - `debug-tools` adds a hex traffic recorder to the bridge ports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod bus;
pub mod devices;
pub mod protocol;
pub mod transport;

pub use bus::{Bus, BusConfig, Device, DeviceExt, NodeContext};
pub use protocol::{
    BROADCAST_ADDRESS, Command, Error, FrameConfig, MAX_DATA_SIZE, Message, MessageHeader, Result,
};
pub use transport::{DeviceIo, TransportError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
