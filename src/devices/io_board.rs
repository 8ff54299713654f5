//! Generic single-node I/O board (buttons, analogs, lights).

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::bus::{Device, Lifecycle, NodeContext};
use crate::protocol::{DeviceInfo, Message, VersionRecord};

/// Live input state and output sink for an [`IoBoard`].
pub trait StateSource: Send {
    /// Fill `state` with the current input state
    ///
    /// `state` arrives zeroed and sized to [`IoBoardConfig::state_len`].
    fn poll(&mut self, state: &mut [u8]);

    /// Apply an output command such as a lamp update
    fn apply(&mut self, command: u16, data: &[u8]) {
        let _ = (command, data);
    }
}

impl<F: FnMut(&mut [u8]) + Send> StateSource for F {
    fn poll(&mut self, state: &mut [u8]) {
        self(state);
    }
}

/// I/O board options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IoBoardConfig {
    /// Reported by GET_VERSION
    pub info: DeviceInfo,
    /// Command that moves the board to the active state
    pub activate_command: u16,
    /// Command answered with the input state
    pub poll_command: u16,
    /// Size of the input state in bytes
    pub state_len: u8,
    /// Commands forwarded to [`StateSource::apply`] and answered with status 0
    pub output_commands: Vec<u16>,
    /// Commands answered with status 0 and otherwise ignored
    pub ack_commands: Vec<u16>,
}

impl Default for IoBoardConfig {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new(0x20A, "J32D", (0, 1, 0)),
            activate_command: 0x0120,
            poll_command: 0x012F,
            state_len: 0x11,
            output_commands: Vec::new(),
            ack_commands: Vec::new(),
        }
    }
}

/// Board answering a single poll command with live state once activated.
///
/// The activate command captures its sequence tag; each poll reply while
/// active carries that tag and advances it by one. Polls before activation
/// return zeroed state with the request's own tag.
pub struct IoBoard {
    config: IoBoardConfig,
    source: Box<dyn StateSource>,
    lifecycle: Lifecycle,
}

impl IoBoard {
    /// Create a board reading from `source`
    pub fn new<S: StateSource + 'static>(config: IoBoardConfig, source: S) -> Self {
        Self {
            config,
            source: Box::new(source),
            lifecycle: Lifecycle::default(),
        }
    }

    /// Current readiness
    #[must_use]
    pub const fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn poll(&mut self, request: &Message) -> Message {
        let mut state = BytesMut::zeroed(usize::from(self.config.state_len));

        match self.lifecycle.next_tag() {
            Some(tag) => {
                self.source.poll(&mut state);
                trace!(tag, state = ?state.as_ref(), "poll");
                Message::reply(request, state.freeze()).with_sequence_tag(tag)
            }
            None => Message::reply(request, state.freeze()),
        }
    }
}

impl Device for IoBoard {
    fn version(&self, _ctx: NodeContext) -> VersionRecord {
        self.config.info.version_record()
    }

    fn reset(&mut self, _ctx: NodeContext) {
        self.lifecycle.reset();
    }

    fn handle_command(&mut self, _ctx: NodeContext, request: &Message) -> Option<Message> {
        let command = request.command();

        if command == self.config.activate_command {
            self.lifecycle.activate(request.sequence_tag());
            return Some(Message::status_ack(request, 0));
        }
        if command == self.config.poll_command {
            return Some(self.poll(request));
        }
        if self.config.output_commands.contains(&command) {
            self.source.apply(command, request.payload());
            return Some(Message::status_ack(request, 0));
        }
        if self.config.ack_commands.contains(&command) {
            return Some(Message::status_ack(request, 0));
        }

        debug!(command = format_args!("{command:#06x}"), "io board ignoring command");
        None
    }
}

impl std::fmt::Debug for IoBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBoard")
            .field("config", &self.config)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DeviceExt;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn board() -> IoBoard {
        let config = IoBoardConfig {
            state_len: 4,
            output_commands: vec![0x0112],
            ack_commands: vec![0x0110],
            ..IoBoardConfig::default()
        };
        IoBoard::new(config, |state: &mut [u8]| state.fill(0x5A))
    }

    fn ctx() -> NodeContext {
        NodeContext::new(0, 0)
    }

    fn request(command: u16, tag: u8) -> Message {
        Message::new(1, command, tag, Bytes::new())
    }

    #[test]
    fn test_poll_before_activation_is_zeroed() {
        let mut board = board();
        let reply = board.handle(ctx(), &request(0x012F, 9)).unwrap();

        assert_eq!(reply.payload().as_ref(), &[0, 0, 0, 0]);
        assert_eq!(reply.sequence_tag(), 9);
    }

    #[test]
    fn test_activate_then_poll_live_state() {
        let mut board = board();
        let ack = board.handle(ctx(), &request(0x0120, 0x40)).unwrap();
        assert_eq!(ack.status(), Some(0));
        assert!(board.lifecycle().is_active());

        let first = board.handle(ctx(), &request(0x012F, 0)).unwrap();
        let second = board.handle(ctx(), &request(0x012F, 0)).unwrap();

        assert_eq!(first.payload().as_ref(), &[0x5A; 4]);
        assert_eq!(first.sequence_tag(), 0x40);
        assert_eq!(second.sequence_tag(), 0x41);
    }

    #[test]
    fn test_startup_returns_to_zeroed_state() {
        let mut board = board();
        board.handle(ctx(), &request(0x0120, 1));
        board.handle(ctx(), &request(0x0003, 0));

        let reply = board.handle(ctx(), &request(0x012F, 0)).unwrap();
        assert_eq!(reply.payload().as_ref(), &[0; 4]);
    }

    #[test]
    fn test_output_command_applied() {
        let seen = Arc::new(Mutex::new(Vec::new()));

        struct Lamps(Arc<Mutex<Vec<(u16, Vec<u8>)>>>);

        impl StateSource for Lamps {
            fn poll(&mut self, _state: &mut [u8]) {}

            fn apply(&mut self, command: u16, data: &[u8]) {
                self.0.lock().unwrap().push((command, data.to_vec()));
            }
        }

        let config = IoBoardConfig {
            output_commands: vec![0x0112],
            ..IoBoardConfig::default()
        };
        let mut board = IoBoard::new(config, Lamps(Arc::clone(&seen)));
        let lamp = Message::new(1, 0x0112, 0, vec![0x80, 0x7F]);

        assert_eq!(board.handle(ctx(), &lamp).unwrap().status(), Some(0));
        assert_eq!(seen.lock().unwrap().as_slice(), &[(0x0112, vec![0x80, 0x7F])]);
    }

    #[test]
    fn test_ack_and_unknown_commands() {
        let mut board = board();
        assert_eq!(
            board.handle(ctx(), &request(0x0110, 0)).unwrap().status(),
            Some(0)
        );
        assert!(board.handle(ctx(), &request(0x0777, 0)).is_none());
    }

    #[test]
    fn test_version_record() {
        let board = board();
        let record = board.version(ctx());
        assert_eq!(record.name(), "J32D");
        assert_eq!(record.class_code(), 0x20A);
    }
}
