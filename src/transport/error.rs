//! Bridge-level error types covering framing failures and transport policy.

use crate::protocol::Error as ProtocolError;
use core::fmt;

/// Unified error type for device-I/O bridge operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Frame or message encoding failure.
    Protocol(ProtocolError),
    /// The operation is not offered by this transport.
    Unsupported,
    /// The handle has not been opened or was already closed.
    NotOpen,
    /// A read found nothing queued while the transport treats that as fatal.
    Underrun {
        /// Number of bytes the caller asked for.
        requested: usize,
    },
    /// An outer command the transport does not implement.
    UnknownCommand {
        /// Raw command byte.
        command: u8,
    },
    /// An outer command whose arguments are shorter than its layout requires.
    MalformedCommand {
        /// Raw command byte.
        command: u8,
        /// Argument bytes required.
        needed: usize,
        /// Argument bytes present.
        got: usize,
    },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(err) => write!(f, "protocol error: {err}"),
            Self::Unsupported => f.write_str("operation not supported by this transport"),
            Self::NotOpen => f.write_str("transport is not open"),
            Self::Underrun { requested } => {
                write!(f, "read underrun: {requested} bytes requested, none queued")
            }
            Self::UnknownCommand { command } => write!(f, "unknown command {command:#04x}"),
            Self::MalformedCommand {
                command,
                needed,
                got,
            } => write!(
                f,
                "command {command:#04x} needs {needed} argument bytes, got {got}"
            ),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

/// How a transport reacts to a condition the real hardware would never cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FailurePolicy {
    /// Log and carry on
    #[default]
    Ignore,
    /// Surface a [`TransportError`] to the caller
    Fatal,
}

impl FailurePolicy {
    /// Apply the policy, returning `err` only when fatal
    pub(crate) fn check(self, err: TransportError) -> Result<(), TransportError> {
        match self {
            Self::Ignore => Ok(()),
            Self::Fatal => Err(err),
        }
    }
}
