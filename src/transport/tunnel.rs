//! Outer interface board that tunnels an inner ACIO bus through remote-port
//! commands.
//!
//! Each host write carries exactly one outer frame (`0xAA | LEN | ESCAPED`,
//! `LEN <= 0x7F` by default). The logical message is
//! `[sequence, command, args...]` and every built-in reply is
//! `[0x00, 0x00, body...]`.

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, instrument, trace, warn};

use super::bridge::{BusFactory, DeviceIo, LazyBus};
use super::error::{FailurePolicy, TransportError};
use crate::bus::Bus;
use crate::protocol::{Error as ProtocolError, FrameConfig, Result as ProtocolResult};

#[cfg(feature = "debug-tools")]
use super::capture::{self, Direction, TrafficRecorder};

/// Outer command codes.
pub mod command {
    /// Report the board code
    pub const VERSION: u8 = 0x01;
    /// Watchdog kick
    pub const WATCHDOG: u8 = 0x05;
    /// Open or close the remote port
    pub const PORT_OPERATION: u8 = 0x38;
    /// Forward bytes to the inner bus
    pub const REMOTE_WRITE: u8 = 0x3A;
    /// Drain bytes from the inner bus
    pub const REMOTE_READ: u8 = 0x3B;
}

const PORT_OPEN: u8 = 0x00;
const PORT_CLOSE: u8 = 0xFF;
const PORT_ERROR: u8 = 0xFF;
const VERSION_REPLY_LEN: usize = 8;
const BOARD_CODE_LEN: usize = 4;
const REPLY_PREFIX: [u8; 2] = [0x00, 0x00];

/// Board-specific outer commands (lights, security plug, cabinet type, ...).
pub trait BoardCommands: Send {
    /// Answer `command`, returning the complete reply payload or `None` if the
    /// command is unknown
    fn handle(&mut self, command: u8, args: &[u8]) -> Option<Bytes>;
}

/// Source of the 32-bit input word returned by control requests.
///
/// Bits are active-high here; the tunnel inverts them before returning.
pub trait InputWord: Send {
    /// Current input state
    fn input_word(&mut self) -> u32;
}

impl<F: FnMut() -> u32 + Send> InputWord for F {
    fn input_word(&mut self) -> u32 {
        self()
    }
}

/// Tunnel board options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TunnelConfig {
    /// Device path to claim
    pub identifier: String,
    /// Up to four ASCII bytes reported by the version command
    pub board_code: String,
    /// Outer framing
    pub frame: FrameConfig,
    /// Reaction to unknown or truncated outer commands
    pub unknown_command: FailurePolicy,
    /// Reaction to a read that finds nothing queued
    pub underrun: FailurePolicy,
    /// Write a hex transcript of all outer traffic here
    #[cfg(feature = "debug-tools")]
    pub capture_path: Option<std::path::PathBuf>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            identifier: r"\\.\P3IO\p3io".to_owned(),
            board_code: "JDX".to_owned(),
            frame: FrameConfig::default().with_max_len(0x7F),
            unknown_command: FailurePolicy::Fatal,
            underrun: FailurePolicy::Fatal,
            #[cfg(feature = "debug-tools")]
            capture_path: None,
        }
    }
}

/// [`DeviceIo`] handle for an outer board carrying an inner bus.
pub struct TunnelPort {
    config: TunnelConfig,
    inner: LazyBus,
    outbound: BytesMut,
    board: Option<Box<dyn BoardCommands>>,
    inputs: Option<Box<dyn InputWord>>,
    #[cfg(feature = "debug-tools")]
    recorder: Option<TrafficRecorder>,
}

impl TunnelPort {
    /// Create a closed tunnel; `factory` builds the inner bus on every open
    pub fn new<F>(config: TunnelConfig, factory: F) -> Self
    where
        F: FnMut() -> ProtocolResult<Bus> + Send + 'static,
    {
        let factory: BusFactory = Box::new(factory);
        Self {
            config,
            inner: LazyBus::new(factory),
            outbound: BytesMut::new(),
            board: None,
            inputs: None,
            #[cfg(feature = "debug-tools")]
            recorder: None,
        }
    }

    /// Delegate unknown outer commands to `board`
    #[must_use]
    pub fn with_board_commands<B: BoardCommands + 'static>(mut self, board: B) -> Self {
        self.board = Some(Box::new(board));
        self
    }

    /// Answer control requests from `inputs`
    #[must_use]
    pub fn with_input_word<I: InputWord + 'static>(mut self, inputs: I) -> Self {
        self.inputs = Some(Box::new(inputs));
        self
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Check whether the tunnel is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.get().is_some()
    }

    /// Inner bus of the current session
    #[must_use]
    pub fn inner_bus(&self) -> Option<&Bus> {
        self.inner.get()
    }

    fn execute(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let code = message[1];
        let args = &message[2..];
        trace!(command = format_args!("{code:#04x}"), ?args, "outer command");

        match code {
            command::VERSION => {
                let mut reply = [0u8; VERSION_REPLY_LEN];
                let board_code = self.config.board_code.as_bytes();
                let len = board_code.len().min(BOARD_CODE_LEN);
                reply[2..2 + len].copy_from_slice(&board_code[..len]);
                self.reply(&reply)
            }
            command::WATCHDOG => self.reply(&REPLY_PREFIX),
            command::PORT_OPERATION => {
                let [port, op] = take_args::<2>(code, args)?;
                let status = match op {
                    PORT_OPEN => {
                        info!(port, "remote port opened");
                        0x00
                    }
                    PORT_CLOSE => {
                        info!(port, "remote port closed");
                        0x00
                    }
                    _ => {
                        debug!(port, op, "unsupported remote port operation");
                        PORT_ERROR
                    }
                };
                self.reply(&[0x00, 0x00, status])
            }
            command::REMOTE_WRITE => {
                let [_, len] = take_args::<2>(code, args)?;
                let data = args.get(2..2 + usize::from(len)).ok_or(
                    TransportError::MalformedCommand {
                        command: code,
                        needed: 2 + usize::from(len),
                        got: args.len(),
                    },
                )?;
                if let Some(bus) = self.inner.get_mut() {
                    bus.write(data);
                }
                self.reply(&[0x00, 0x00, len])
            }
            command::REMOTE_READ => {
                let [_, len] = take_args::<2>(code, args)?;
                let room = usize::from(self.config.frame.max_len).saturating_sub(3);
                let wanted = usize::from(len).min(room);

                let mut reply = vec![0u8; 3 + wanted];
                let read = self
                    .inner
                    .get_mut()
                    .map_or(0, |bus| bus.read(&mut reply[3..]));
                reply.truncate(3 + read);
                // read <= room <= 0x7F
                reply[2] = u8::try_from(read).unwrap_or(u8::MAX);
                self.reply(&reply)
            }
            _ => {
                let reply = self
                    .board
                    .as_mut()
                    .and_then(|board| board.handle(code, args));
                match reply {
                    Some(reply) => self.reply(&reply),
                    None => Err(TransportError::UnknownCommand { command: code }),
                }
            }
        }
    }

    fn reply(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        crate::protocol::encode_into(payload, &self.config.frame, &mut self.outbound)?;
        Ok(())
    }
}

fn take_args<const N: usize>(command: u8, args: &[u8]) -> Result<[u8; N], TransportError> {
    args.get(..N)
        .and_then(|head| <[u8; N]>::try_from(head).ok())
        .ok_or(TransportError::MalformedCommand {
            command,
            needed: N,
            got: args.len(),
        })
}

impl DeviceIo for TunnelPort {
    fn identifier(&self) -> &str {
        &self.config.identifier
    }

    #[instrument(level = "debug", skip(self), fields(board = %self.config.board_code))]
    fn open(&mut self, identifier: &str) -> bool {
        if identifier != self.config.identifier {
            return false;
        }
        if !self.inner.start() {
            return false;
        }
        self.outbound.clear();

        #[cfg(feature = "debug-tools")]
        {
            self.recorder = capture::open(self.config.capture_path.as_deref());
        }

        info!("opened tunnel board");
        true
    }

    /// Handle one outer frame
    ///
    /// Frames with a bad header or length are logged and consumed whole.
    #[instrument(level = "trace", skip(self, bytes), fields(len = bytes.len()))]
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        #[cfg(feature = "debug-tools")]
        capture::record(self.recorder.as_ref(), Direction::Inbound, bytes);

        let message = match crate::protocol::decode_with(bytes, &self.config.frame) {
            Ok(message) if message.len() >= 2 => message,
            Ok(message) => {
                warn!(len = message.len(), "outer message too short");
                return Ok(bytes.len());
            }
            Err(err) => {
                warn!(error = %err, frame = ?bytes, "dropping outer frame");
                return Ok(bytes.len());
            }
        };

        if let Err(err) = self.execute(&message) {
            match err {
                TransportError::UnknownCommand { .. } | TransportError::MalformedCommand { .. } => {
                    warn!(error = %err, "outer command rejected");
                    self.config.unknown_command.check(err)?;
                }
                other => return Err(other),
            }
        }

        Ok(bytes.len())
    }

    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }

        let read = buf.len().min(self.outbound.len());
        let chunk = self.outbound.split_to(read);
        buf[..read].copy_from_slice(&chunk);

        if read == 0 && !buf.is_empty() {
            warn!("tunnel read with nothing queued");
            self.config
                .underrun
                .check(TransportError::Underrun { requested: buf.len() })?;
        }

        #[cfg(feature = "debug-tools")]
        capture::record(self.recorder.as_ref(), Direction::Outbound, &chunk);

        Ok(read)
    }

    /// Return the inverted input word as four little-endian bytes
    fn device_io(
        &mut self,
        code: u32,
        _input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        let Some(inputs) = self.inputs.as_mut() else {
            return Err(TransportError::Unsupported);
        };
        if output.len() < 4 {
            return Err(ProtocolError::BufferTooSmall {
                needed: 4,
                got: output.len(),
            }
            .into());
        }

        let word = !inputs.input_word();
        output[..4].copy_from_slice(&word.to_le_bytes());
        trace!(code, word = format_args!("{word:#010x}"), "control request");
        Ok(4)
    }

    #[instrument(level = "debug", skip(self), fields(board = %self.config.board_code))]
    fn close(&mut self) -> bool {
        self.outbound.clear();

        #[cfg(feature = "debug-tools")]
        {
            self.recorder = None;
        }

        let was_open = self.inner.stop();
        if was_open {
            info!("closed tunnel board");
        }
        was_open
    }
}

impl std::fmt::Debug for TunnelPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelPort")
            .field("config", &self.config)
            .field("inner", &self.inner.get())
            .field("queued", &self.outbound.len())
            .finish_non_exhaustive()
    }
}
