//! Contract implemented by every emulated board.

use std::num::NonZeroU8;

use bytes::Bytes;

use crate::protocol::{Command, Message, VersionRecord};

/// Where a message landed inside a device's address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeContext {
    node: u8,
    base_address: u8,
}

impl NodeContext {
    /// Create a context for `node` of a device registered at `base_address`
    #[must_use]
    pub const fn new(node: u8, base_address: u8) -> Self {
        Self { node, base_address }
    }

    /// Node index relative to the device, starting at zero
    #[must_use]
    pub const fn node(&self) -> u8 {
        self.node
    }

    /// First bus node the device occupies
    #[must_use]
    pub const fn base_address(&self) -> u8 {
        self.base_address
    }
}

/// A pluggable device emulator attached to a [`Bus`](crate::bus::Bus).
///
/// Implementers supply identity, reset and their own command set. The
/// bus-standard commands are answered by [`DeviceExt::handle`], which every
/// device gets and none can override.
///
/// Returning `None` from [`Device::handle_command`] means "not handled" and
/// queues nothing. Returning `Some(Message::ack(..))` is a handled command with
/// an empty reply and still produces a frame.
pub trait Device: Send {
    /// Number of contiguous bus nodes this device occupies
    fn node_count(&self) -> NonZeroU8 {
        NonZeroU8::MIN
    }

    /// Version record reported by `node`
    fn version(&self, ctx: NodeContext) -> VersionRecord;

    /// Drop transient session state (startup and clear)
    fn reset(&mut self, ctx: NodeContext);

    /// Handle a device-defined command
    fn handle_command(&mut self, ctx: NodeContext, request: &Message) -> Option<Message>;
}

impl<D: Device + ?Sized> Device for Box<D> {
    fn node_count(&self) -> NonZeroU8 {
        (**self).node_count()
    }

    fn version(&self, ctx: NodeContext) -> VersionRecord {
        (**self).version(ctx)
    }

    fn reset(&mut self, ctx: NodeContext) {
        (**self).reset(ctx);
    }

    fn handle_command(&mut self, ctx: NodeContext, request: &Message) -> Option<Message> {
        (**self).handle_command(ctx, request)
    }
}

/// Message entry point shared by every [`Device`].
///
/// Implemented for all devices through a blanket impl, so the bus-standard
/// answers are identical on every node whatever its lifecycle state.
pub trait DeviceExt: Device {
    /// Handle any message routed to this device
    ///
    /// GET_VERSION, STARTUP, CLEAR, KEEPALIVE and BROADCAST are answered here;
    /// everything else goes to [`Device::handle_command`].
    fn handle(&mut self, ctx: NodeContext, request: &Message) -> Option<Message> {
        let Some(command) = request.standard_command() else {
            return self.handle_command(ctx, request);
        };

        if command.resets_session() {
            self.reset(ctx);
            return Some(Message::status_ack(request, 0));
        }

        match command {
            Command::GetVersion => {
                let record = self.version(ctx).to_bytes();
                Some(Message::reply(request, Bytes::copy_from_slice(&record)))
            }
            Command::Keepalive | Command::Broadcast => Some(Message::status_ack(request, 0)),
            _ => self.handle_command(ctx, request),
        }
    }
}

impl<D: Device + ?Sized> DeviceExt for D {}
