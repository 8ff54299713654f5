//! ACIO protocol core implementation
//!
//! This module provides the wire framing, message model, and command codes for
//! the ACIO serial bus.

mod codec;
mod error;
mod header;
mod message;
mod types;

pub use codec::{
    Checksum, FrameConfig, FrameDecoder, decode, decode_with, encode, encode_into, encode_with,
    encoded_len,
};
pub use error::{Error, Result};
pub use header::MessageHeader;
pub use message::Message;
pub use types::{Command, DeviceInfo, VERSION_RECORD_SIZE, VersionRecord};

/// Start-of-frame marker
pub const START_MARKER: u8 = 0xAA;

/// Escape marker; the following byte carries the complement of a literal
/// start or escape byte
pub const ESCAPE_MARKER: u8 = 0xFF;

/// Address every device on the bus listens to
pub const BROADCAST_ADDRESS: u8 = 0x70;

/// Address of the host; bus-level commands such as address assignment target it
pub const HOST_ADDRESS: u8 = 0x00;

/// Bit set on the address of every reply sent by a node
pub const RESPONSE_FLAG: u8 = 0x80;

/// Largest frame payload expressible by the one-byte length field
pub const MAX_FRAME_LEN: usize = 0xFF;

/// Message header size in bytes (address, command, sequence tag, data length)
pub const HEADER_SIZE: usize = 5;

/// Broadcast message header size in bytes (address, data length)
pub const BROADCAST_HEADER_SIZE: usize = 2;

/// Maximum message data size that still fits a single frame
pub const MAX_DATA_SIZE: usize = MAX_FRAME_LEN - HEADER_SIZE;
