//! ACIO message header
//!
//! Addressed messages carry a five-byte header. Messages sent to the broadcast
//! address carry a two-byte header without command or sequence tag.

use bytes::BufMut;

use super::{
    BROADCAST_ADDRESS, BROADCAST_HEADER_SIZE, Command, Error, HEADER_SIZE, RESPONSE_FLAG, Result,
};

/// ACIO message header
///
/// # Wire Format
///
/// ```text
/// addressed:  [ADDRESS] [COMMAND HI] [COMMAND LO] [SEQUENCE TAG] [DATA LEN]
/// broadcast:  [0x70] [DATA LEN]
/// ```
///
/// The command is big-endian on the wire. `DATA LEN` counts every byte after
/// the header, including the status byte of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    address: u8,
    command: u16,
    sequence_tag: u8,
    data_len: u8,
}

impl MessageHeader {
    /// Create a new message header
    #[must_use]
    pub const fn new(address: u8, command: u16, sequence_tag: u8, data_len: u8) -> Self {
        Self {
            address,
            command,
            sequence_tag,
            data_len,
        }
    }

    /// Get address byte
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.address
    }

    /// Get command code
    #[must_use]
    pub const fn command(&self) -> u16 {
        self.command
    }

    /// Get sequence tag
    #[must_use]
    pub const fn sequence_tag(&self) -> u8 {
        self.sequence_tag
    }

    /// Get data length
    #[must_use]
    pub const fn data_len(&self) -> u8 {
        self.data_len
    }

    /// Check whether this header uses the broadcast layout
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        self.address == BROADCAST_ADDRESS
    }

    /// Check whether the response flag is set on the address
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        self.address & RESPONSE_FLAG != 0
    }

    /// Size of this header on the wire
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        if self.is_broadcast() {
            BROADCAST_HEADER_SIZE
        } else {
            HEADER_SIZE
        }
    }

    pub(crate) fn set_sequence_tag(&mut self, sequence_tag: u8) {
        self.sequence_tag = sequence_tag;
    }

    pub(crate) fn set_data_len(&mut self, data_len: u8) {
        self.data_len = data_len;
    }

    /// Append the header to a buffer
    pub fn write_to<B: BufMut>(&self, out: &mut B) {
        out.put_u8(self.address);
        if !self.is_broadcast() {
            out.put_u16(self.command);
            out.put_u8(self.sequence_tag);
        }
        out.put_u8(self.data_len);
    }

    /// Parse from the start of a logical frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(&address) = bytes.first() else {
            return Err(Error::BufferTooSmall { needed: 1, got: 0 });
        };

        if address == BROADCAST_ADDRESS {
            if bytes.len() < BROADCAST_HEADER_SIZE {
                return Err(Error::BufferTooSmall {
                    needed: BROADCAST_HEADER_SIZE,
                    got: bytes.len(),
                });
            }
            return Ok(Self::new(address, Command::Broadcast.as_u16(), 0, bytes[1]));
        }

        if bytes.len() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        }

        Ok(Self::new(
            address,
            u16::from_be_bytes([bytes[1], bytes[2]]),
            bytes[3],
            bytes[4],
        ))
    }
}
