//! ACIO error types

use thiserror::Error;

/// ACIO protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Frame did not begin with the start marker
    #[error("invalid start marker: expected 0xAA, got {found:#04x}")]
    InvalidStartMarker {
        /// Byte found where the marker was expected
        found: u8,
    },

    /// Declared frame length differs from the decoded logical length
    #[error("length mismatch: declared {declared} bytes, decoded {actual}")]
    LengthMismatch {
        /// Length carried in the frame
        declared: usize,
        /// Logical bytes actually present
        actual: usize,
    },

    /// Declared frame length exceeds the transport limit
    #[error("length out of range: {len} bytes (max {max})")]
    LengthOutOfRange {
        /// Declared length
        len: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Trailing checksum mismatch
    #[error("checksum mismatch: expected {expected:#04x}, got {found:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the logical bytes
        expected: u8,
        /// Checksum carried in the frame
        found: u8,
    },

    /// Buffer too small
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },

    /// Payload too large
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Registering a device would run into the reserved address range
    #[error("address space exhausted: {requested} nodes requested, {available} available")]
    AddressSpaceExhausted {
        /// Nodes the device asked for
        requested: usize,
        /// Nodes still assignable
        available: usize,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
