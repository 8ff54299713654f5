//! ACIO bus: address assignment, stream decoding, dispatch and reply encoding.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use super::device::{Device, DeviceExt, NodeContext};
use super::stats::{BusEvent, BusStats};
use crate::protocol::{
    BROADCAST_ADDRESS, Command, Error, FrameConfig, FrameDecoder, HOST_ADDRESS, Message, Result,
    START_MARKER, encode_into, encoded_len,
};

/// Number of nodes addressable below the broadcast address.
///
/// Wire address `a` designates bus node `a - 1`; address 0 is the host.
pub const MAX_NODES: usize = BROADCAST_ADDRESS as usize - 1;

/// Bus configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BusConfig {
    /// Framing used for both directions.
    pub frame: FrameConfig,
    /// Maximum number of bytes waiting in the outbound queue.
    pub outbound_capacity: usize,
    /// Answer each repeated start marker of a host sync burst with `AA AA`.
    ///
    /// With this enabled a frame whose length byte is `0xAA` cannot be
    /// received.
    pub sync_handshake: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            outbound_capacity: 4096,
            sync_handshake: false,
        }
    }
}

/// Reply to one repeated start marker of a sync burst
const SYNC_REPLY: [u8; 2] = [START_MARKER, START_MARKER];

struct Slot {
    base_address: u8,
    nodes: u8,
    device: Box<dyn Device>,
}

impl Slot {
    fn claims(&self, node: u8) -> bool {
        node >= self.base_address && node - self.base_address < self.nodes
    }
}

/// One emulated bus: an ordered device registry plus its inbound decoder and
/// outbound byte queue.
///
/// Registration order is load-bearing: each device's base address is the sum
/// of the node counts registered before it, so reordering registration moves
/// every later device.
pub struct Bus {
    config: BusConfig,
    devices: Vec<Slot>,
    decoder: FrameDecoder,
    outbound: BytesMut,
    stats: BusStats,
    after_start: bool,
}

impl Bus {
    /// Create an empty bus
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.frame),
            outbound: BytesMut::with_capacity(config.outbound_capacity),
            devices: Vec::new(),
            stats: BusStats::default(),
            after_start: false,
            config,
        }
    }

    /// Register a device, returning its base address
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressSpaceExhausted`] when the device's nodes would
    /// reach the broadcast address.
    pub fn register<D: Device + 'static>(&mut self, device: D) -> Result<u8> {
        self.register_boxed(Box::new(device))
    }

    /// Register an already boxed device, returning its base address
    ///
    /// # Errors
    ///
    /// Same conditions as [`Bus::register`].
    pub fn register_boxed(&mut self, device: Box<dyn Device>) -> Result<u8> {
        let nodes = device.node_count().get();
        let used = usize::from(self.node_count());
        let available = MAX_NODES - used;

        if usize::from(nodes) > available {
            return Err(Error::AddressSpaceExhausted {
                requested: usize::from(nodes),
                available,
            });
        }

        let base_address = self.node_count();
        self.devices.push(Slot {
            base_address,
            nodes,
            device,
        });
        debug!(base_address, nodes, "registered device");

        Ok(base_address)
    }

    /// Total nodes occupied by registered devices
    #[must_use]
    pub fn node_count(&self) -> u8 {
        self.devices
            .last()
            .map_or(0, |slot| slot.base_address + slot.nodes)
    }

    /// Number of registered devices
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Base addresses in registration order
    pub fn base_addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.devices.iter().map(|slot| slot.base_address)
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Traffic counters
    #[must_use]
    pub const fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Feed raw inbound bytes, returning how many were consumed
    ///
    /// Each completed frame is dispatched and its reply queued before the next
    /// byte is decoded.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        for &byte in bytes {
            if self.config.sync_handshake && self.sync(byte) {
                continue;
            }

            match self.decoder.push(byte) {
                None => {}
                Some(Ok(frame)) => self.process_frame(frame),
                Some(Err(err)) => {
                    self.stats.record(BusEvent::Malformed);
                    warn!(error = %err, "dropping malformed frame");
                }
            }
        }
        bytes.len()
    }

    /// Drain up to `buf.len()` queued outbound bytes
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len().min(self.outbound.len());
        buf[..len].copy_from_slice(&self.outbound[..len]);
        self.outbound.advance(len);
        len
    }

    /// Bytes waiting in the outbound queue
    #[must_use]
    pub fn bytes_available(&self) -> usize {
        self.outbound.len()
    }

    /// Discard queued outbound bytes
    pub fn clear_outbound(&mut self) {
        self.outbound.clear();
    }

    /// Route one message and return the replies it produced
    ///
    /// Broadcast messages are offered to every device in registration order.
    pub fn dispatch(&mut self, message: &Message) -> Vec<Message> {
        if message.is_broadcast() {
            return self
                .devices
                .iter_mut()
                .filter_map(|slot| {
                    let ctx = NodeContext::new(0, slot.base_address);
                    slot.device.handle(ctx, message)
                })
                .collect();
        }

        if message.address() == HOST_ADDRESS {
            let nodes = self.node_count();
            if message.standard_command() == Some(Command::AssignAddrs) && nodes > 0 {
                return vec![Message::reply(message, vec![nodes])];
            }
            self.stats.record(BusEvent::Unhandled);
            debug!(command = message.command(), "unhandled host command");
            return Vec::new();
        }

        let node = message.address() - 1;
        let Some(slot) = self.devices.iter_mut().find(|slot| slot.claims(node)) else {
            self.stats.record(BusEvent::Unaddressed);
            warn!(
                address = message.address(),
                command = message.command(),
                "no device at address; dropping message"
            );
            return Vec::new();
        };

        let ctx = NodeContext::new(node - slot.base_address, slot.base_address);
        if let Some(reply) = slot.device.handle(ctx, message) {
            vec![reply]
        } else {
            self.stats.record(BusEvent::Unhandled);
            debug!(
                address = message.address(),
                command = format_args!("{:#06x}", message.command()),
                "unhandled command"
            );
            Vec::new()
        }
    }

    /// Track start marker runs; returns `true` when `byte` was a sync request
    ///
    /// The first marker of a run still starts a frame, so a burst followed by
    /// a frame decodes normally.
    fn sync(&mut self, byte: u8) -> bool {
        if byte != START_MARKER {
            self.after_start = false;
            return false;
        }
        if !self.after_start {
            self.after_start = true;
            return false;
        }

        self.stats.record(BusEvent::SyncAnswered);
        if self.outbound.len() + SYNC_REPLY.len() > self.config.outbound_capacity {
            self.stats.record(BusEvent::Overflow {
                bytes: SYNC_REPLY.len(),
            });
            warn!("outbound queue full; dropping sync reply");
        } else {
            self.outbound.extend_from_slice(&SYNC_REPLY);
            trace!("sync burst answered");
        }
        true
    }

    fn process_frame(&mut self, frame: Bytes) {
        self.stats.record(BusEvent::FrameReceived);
        trace!(frame = ?frame.as_ref(), "frame received");

        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                self.stats.record(BusEvent::Malformed);
                warn!(error = %err, "dropping unparseable message");
                return;
            }
        };

        for reply in self.dispatch(&message) {
            self.enqueue(&reply);
        }
    }

    fn enqueue(&mut self, reply: &Message) {
        let logical = reply.encode();
        let needed = encoded_len(&logical, &self.config.frame);

        if self.outbound.len() + needed > self.config.outbound_capacity {
            self.stats.record(BusEvent::Overflow { bytes: needed });
            warn!(
                needed,
                queued = self.outbound.len(),
                capacity = self.config.outbound_capacity,
                "outbound queue full; dropping reply"
            );
            return;
        }

        match encode_into(&logical, &self.config.frame, &mut self.outbound) {
            Ok(()) => {
                self.stats.record(BusEvent::ReplyQueued);
                trace!(reply = ?logical, "reply queued");
            }
            Err(err) => warn!(error = %err, "failed to encode reply"),
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("devices", &self.devices.len())
            .field("nodes", &self.node_count())
            .field("queued", &self.outbound.len())
            .finish_non_exhaustive()
    }
}
