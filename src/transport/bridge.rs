//! Device-I/O bridge: the handle-style surface a host uses to reach a bus.

use tracing::{debug, info, instrument, trace, warn};

use super::error::{FailurePolicy, TransportError};
use crate::bus::Bus;
use crate::protocol::Result as ProtocolResult;

#[cfg(feature = "debug-tools")]
use super::capture::{self, Direction, TrafficRecorder};

/// Builds a fresh bus with its devices registered in a fixed order.
pub type BusFactory = Box<dyn FnMut() -> ProtocolResult<Bus> + Send>;

/// Handle-style operations a host performs on an emulated transport.
///
/// Mirrors the open/read/write/close contract of a device file. A handle only
/// claims the identifier it was configured for.
pub trait DeviceIo: Send {
    /// Identifier (device path or port name) this handle serves
    fn identifier(&self) -> &str;

    /// Claim `identifier`, returning `false` if it is not ours
    fn open(&mut self, identifier: &str) -> bool;

    /// Feed raw bytes from the host, returning how many were consumed
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError>;

    /// Drain queued bytes into `buf`, returning how many were copied
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Vendor control request
    fn device_io(
        &mut self,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, TransportError> {
        let _ = (code, input, output);
        Err(TransportError::Unsupported)
    }

    /// Release the claim and discard all session state
    fn close(&mut self) -> bool;
}

/// Bridge options for one plain bus transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PortConfig {
    /// Device path or port name to claim
    pub identifier: String,
    /// Reaction to a read that finds nothing queued
    pub underrun: FailurePolicy,
    /// Write a hex transcript of all traffic here
    #[cfg(feature = "debug-tools")]
    pub capture_path: Option<std::path::PathBuf>,
}

impl PortConfig {
    /// Config for `identifier` with default policies
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            identifier: "COM1".to_owned(),
            underrun: FailurePolicy::Ignore,
            #[cfg(feature = "debug-tools")]
            capture_path: None,
        }
    }
}

/// Lazily built bus shared by the bridge implementations.
pub(crate) struct LazyBus {
    factory: BusFactory,
    bus: Option<Bus>,
}

impl LazyBus {
    pub(crate) fn new(factory: BusFactory) -> Self {
        Self { factory, bus: None }
    }

    /// Build a new bus, replacing any previous session
    pub(crate) fn start(&mut self) -> bool {
        match (self.factory)() {
            Ok(bus) => {
                debug!(nodes = bus.node_count(), devices = bus.device_count(), "bus built");
                self.bus = Some(bus);
                true
            }
            Err(err) => {
                warn!(error = %err, "bus factory failed");
                self.bus = None;
                false
            }
        }
    }

    pub(crate) fn stop(&mut self) -> bool {
        self.bus.take().is_some()
    }

    pub(crate) fn get(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }

    pub(crate) fn get_mut(&mut self) -> Option<&mut Bus> {
        self.bus.as_mut()
    }
}

/// [`DeviceIo`] handle that exposes one [`Bus`] directly to the host.
///
/// The bus is built by the factory on each successful open and dropped on
/// close, so every open starts from freshly reset devices.
pub struct BusPort {
    config: PortConfig,
    bus: LazyBus,
    #[cfg(feature = "debug-tools")]
    recorder: Option<TrafficRecorder>,
}

impl BusPort {
    /// Create a closed port; `factory` runs on every open
    pub fn new<F>(config: PortConfig, factory: F) -> Self
    where
        F: FnMut() -> ProtocolResult<Bus> + Send + 'static,
    {
        Self {
            config,
            bus: LazyBus::new(Box::new(factory)),
            #[cfg(feature = "debug-tools")]
            recorder: None,
        }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Check whether the port is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.bus.get().is_some()
    }

    /// Bus of the current session
    #[must_use]
    pub fn bus(&self) -> Option<&Bus> {
        self.bus.get()
    }
}

impl DeviceIo for BusPort {
    fn identifier(&self) -> &str {
        &self.config.identifier
    }

    #[instrument(level = "debug", skip(self), fields(port = %self.config.identifier))]
    fn open(&mut self, identifier: &str) -> bool {
        if identifier != self.config.identifier {
            return false;
        }
        if !self.bus.start() {
            return false;
        }

        #[cfg(feature = "debug-tools")]
        {
            self.recorder = capture::open(self.config.capture_path.as_deref());
        }

        info!("opened bus port");
        true
    }

    #[instrument(level = "trace", skip(self, bytes), fields(len = bytes.len()))]
    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let bus = self.bus.get_mut().ok_or(TransportError::NotOpen)?;

        #[cfg(feature = "debug-tools")]
        capture::record(self.recorder.as_ref(), Direction::Inbound, bytes);

        Ok(bus.write(bytes))
    }

    #[instrument(level = "trace", skip(self, buf), fields(len = buf.len()))]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let bus = self.bus.get_mut().ok_or(TransportError::NotOpen)?;
        let read = bus.read(buf);

        if read == 0 && !buf.is_empty() {
            debug!(identifier = %self.config.identifier, "read with nothing queued");
            self.config
                .underrun
                .check(TransportError::Underrun { requested: buf.len() })?;
        }

        #[cfg(feature = "debug-tools")]
        capture::record(self.recorder.as_ref(), Direction::Outbound, &buf[..read]);

        trace!(read, "drained outbound bytes");
        Ok(read)
    }

    #[instrument(level = "debug", skip(self), fields(port = %self.config.identifier))]
    fn close(&mut self) -> bool {
        #[cfg(feature = "debug-tools")]
        {
            self.recorder = None;
        }

        let was_open = self.bus.stop();
        if was_open {
            info!("closed bus port");
        }
        was_open
    }
}

impl std::fmt::Debug for BusPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPort")
            .field("config", &self.config)
            .field("bus", &self.bus.get())
            .finish_non_exhaustive()
    }
}
