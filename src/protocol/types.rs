//! ACIO bus-standard command codes and the version record

use std::fmt;

use super::{Error, Result};

/// Commands every node on the bus answers the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    /// Host asks how many nodes are attached
    AssignAddrs = 0x0001,
    /// Report the version record of a node
    GetVersion = 0x0002,
    /// Reset session state
    Startup = 0x0003,
    /// Liveness check
    Keepalive = 0x0080,
    /// Broadcast sentinel
    Broadcast = 0x00FF,
    /// Reset session state (alias of startup)
    Clear = 0x0100,
}

impl Command {
    /// Convert from a raw command code
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::AssignAddrs),
            0x0002 => Some(Self::GetVersion),
            0x0003 => Some(Self::Startup),
            0x0080 => Some(Self::Keepalive),
            0x00FF => Some(Self::Broadcast),
            0x0100 => Some(Self::Clear),
            _ => None,
        }
    }

    /// Convert to the raw command code
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if this command resets device session state
    #[must_use]
    pub const fn resets_session(self) -> bool {
        matches!(self, Self::Startup | Self::Clear)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AssignAddrs => "AssignAddrs",
            Self::GetVersion => "GetVersion",
            Self::Startup => "Startup",
            Self::Keepalive => "Keepalive",
            Self::Broadcast => "Broadcast",
            Self::Clear => "Clear",
        };
        write!(f, "{name}")
    }
}

/// Size of an encoded [`VersionRecord`] in bytes
pub const VERSION_RECORD_SIZE: usize = 44;

const NAME_LEN: usize = 4;
const STAMP_LEN: usize = 16;

/// Fixed-shape version record answered to [`Command::GetVersion`]
///
/// # Wire Format
///
/// ```text
/// [CLASS CODE (4, little-endian)] [FLAGS] [MAJOR] [MINOR] [REVISION]
/// [NAME (4)] [BUILD DATE (16)] [BUILD TIME (16)]
/// ```
///
/// Text fields are zero padded and not necessarily zero terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    class_code: u32,
    flags: u8,
    major: u8,
    minor: u8,
    revision: u8,
    name: [u8; NAME_LEN],
    date: [u8; STAMP_LEN],
    time: [u8; STAMP_LEN],
}

impl VersionRecord {
    /// Device class code
    #[must_use]
    pub const fn class_code(&self) -> u32 {
        self.class_code
    }

    /// Capability flags
    #[must_use]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Version triple
    #[must_use]
    pub const fn version(&self) -> (u8, u8, u8) {
        (self.major, self.minor, self.revision)
    }

    /// Short device name with padding removed
    #[must_use]
    pub fn name(&self) -> String {
        text(&self.name)
    }

    /// Build date with padding removed
    #[must_use]
    pub fn date(&self) -> String {
        text(&self.date)
    }

    /// Build time with padding removed
    #[must_use]
    pub fn time(&self) -> String {
        text(&self.time)
    }

    /// Convert to bytes
    #[must_use]
    pub fn to_bytes(&self) -> [u8; VERSION_RECORD_SIZE] {
        let mut bytes = [0u8; VERSION_RECORD_SIZE];

        bytes[0..4].copy_from_slice(&self.class_code.to_le_bytes());
        bytes[4] = self.flags;
        bytes[5] = self.major;
        bytes[6] = self.minor;
        bytes[7] = self.revision;
        bytes[8..12].copy_from_slice(&self.name);
        bytes[12..28].copy_from_slice(&self.date);
        bytes[28..44].copy_from_slice(&self.time);

        bytes
    }

    /// Parse from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VERSION_RECORD_SIZE {
            return Err(Error::BufferTooSmall {
                needed: VERSION_RECORD_SIZE,
                got: bytes.len(),
            });
        }

        let mut record = Self {
            class_code: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            flags: bytes[4],
            major: bytes[5],
            minor: bytes[6],
            revision: bytes[7],
            name: [0; NAME_LEN],
            date: [0; STAMP_LEN],
            time: [0; STAMP_LEN],
        };
        record.name.copy_from_slice(&bytes[8..12]);
        record.date.copy_from_slice(&bytes[12..28]);
        record.time.copy_from_slice(&bytes[28..44]);

        Ok(record)
    }
}

/// Identity a device reports through [`Command::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DeviceInfo {
    /// Device class code.
    pub class_code: u32,
    /// Capability flags.
    pub flags: u8,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Revision.
    pub revision: u8,
    /// Short device name, at most four bytes are reported.
    pub name: String,
    /// Firmware build date, at most sixteen bytes are reported.
    pub build_date: String,
    /// Firmware build time, at most sixteen bytes are reported.
    pub build_time: String,
}

impl DeviceInfo {
    /// Create device info with the default build stamp
    #[must_use]
    pub fn new(class_code: u32, name: &str, (major, minor, revision): (u8, u8, u8)) -> Self {
        Self {
            class_code,
            major,
            minor,
            revision,
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Build the wire record
    #[must_use]
    pub fn version_record(&self) -> VersionRecord {
        VersionRecord {
            class_code: self.class_code,
            flags: self.flags,
            major: self.major,
            minor: self.minor,
            revision: self.revision,
            name: padded(&self.name),
            date: padded(&self.build_date),
            time: padded(&self.build_time),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            class_code: 0,
            flags: 0,
            major: 1,
            minor: 0,
            revision: 0,
            name: String::new(),
            build_date: "Jan  1 2020".to_owned(),
            build_time: "00:00:00".to_owned(),
        }
    }
}

fn padded<const N: usize>(value: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let bytes = value.as_bytes();
    let len = bytes.len().min(N);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
