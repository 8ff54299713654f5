//! Multi-unit magnetic/IC card reader with keypad.
//!
//! Each bus node is one reader unit. Units keep their own card slot, keypad
//! edge state, power counter and lifecycle.

use std::fmt;
use std::num::NonZeroU8;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::bus::{Device, Lifecycle, NodeContext};
use crate::protocol::{DeviceInfo, Message, VersionRecord};

/// Reader command codes.
pub mod command {
    /// Reinitialize the unit; activates it
    pub const REINITIALIZE: u16 = 0x0130;
    /// Read the card UID
    pub const READ_CARD: u16 = 0x0131;
    /// Report unit status
    pub const GET_STATUS: u16 = 0x0134;
    /// Accept, refuse or eject cards, then report status
    pub const SET_ACTION: u16 = 0x0135;
    /// Power sequencing handshake
    pub const POWER_CONTROL: u16 = 0x013A;
}

/// SET_ACTION sub-commands.
pub mod action {
    /// Stop accepting cards
    pub const ACCEPT_DISABLE: u8 = 0x00;
    /// Accept inserted cards
    pub const ACCEPT_ENABLE: u8 = 0x11;
    /// Eject the held card
    pub const EJECT: u8 = 0x12;
}

/// Commands answered with status 0 and otherwise ignored
const ACK_COMMANDS: [u16; 5] = [0x0030, 0x0031, 0x003A, 0x0116, 0x0120];

/// Size of an encoded [`ReaderStatus`]
pub const STATUS_SIZE: usize = 16;

/// Keypad key index of the decimal point
pub const KEY_DECIMAL: u8 = 10;
/// Keypad key index of the double zero
pub const KEY_DOUBLE_ZERO: u8 = 11;

const KEY_COUNT: usize = 12;
const POWER_COUNTER_START: u8 = 2;
const CAPTURE_START: u8 = 0x08;

/// Keypad bit per key index, standard layout.
///
/// ```text
/// 7 8 9   | 0800 8000 0008
/// 4 5 6   | 0400 4000 0004
/// 1 2 3   | 0200 2000 0002
/// 0 00 .  | 0100 1000 0001
/// ```
const KEY_CODES: [u16; KEY_COUNT] = [
    0x0100, 0x0200, 0x2000, 0x0002, 0x0400, 0x4000, 0x0004, 0x0800, 0x8000, 0x0008, 0x0001, 0x1000,
];

/// Keypad bit per key index, alternate layout
const KEY_CODES_ALT: [u16; KEY_COUNT] = [
    0x0001, 0x0002, 0x0020, 0x0200, 0x0004, 0x0040, 0x0400, 0x0008, 0x0080, 0x0800, 0x0100, 0x0010,
];

/// Key number reported in the keydown byte, per key index
const KEY_NUMBERS: [u8; KEY_COUNT] = [0, 1, 5, 9, 2, 6, 10, 3, 7, 11, 8, 4];

/// Where cards and key presses come from.
pub trait CardSource: Send {
    /// Take a card presented to `unit`, if any
    fn take_card(&mut self, unit: u8) -> Option<[u8; 8]>;

    /// Pressed keys of `unit` as a bitmask indexed by key
    ///
    /// Bits 0 to 9 are the digits, then [`KEY_DECIMAL`] and
    /// [`KEY_DOUBLE_ZERO`].
    fn keypad(&mut self, unit: u8) -> u16 {
        let _ = unit;
        0
    }
}

/// Card slot state byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CardState {
    /// Unit not initialized; zeroed status
    #[default]
    Unknown = 0x00,
    /// No card
    Empty = 0x01,
    /// Card in the slot
    Present = 0x02,
}

/// Slot sensor bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorFlags(u8);

impl SensorFlags {
    /// Card detected at the slot entrance
    pub const FRONT: u8 = 0x10;
    /// Card fully inserted
    pub const BACK: u8 = 0x20;

    /// Create empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Set a sensor
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        self.0 |= flag;
        self
    }

    /// Check if a sensor is set
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SensorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.has(Self::FRONT), self.has(Self::BACK)) {
            (true, true) => write!(f, "FRONT | BACK"),
            (true, false) => write!(f, "FRONT"),
            (false, true) => write!(f, "BACK"),
            (false, false) => write!(f, "NONE"),
        }
    }
}

/// Status block reported by GET_STATUS, SET_ACTION and READ_CARD.
///
/// # Wire Format
///
/// ```text
/// [STATE] [SENSORS] [UID (8)] [CARD TYPE] [0x03] [KEYDOWN] [0x00] [KEYPAD (2, big-endian)]
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStatus {
    /// Card slot state
    pub state: CardState,
    /// Slot sensors
    pub sensors: SensorFlags,
    /// Card UID, zero without a card
    pub uid: [u8; 8],
    /// Card type, always zero for this reader generation
    pub card_type: u8,
    /// Last key press edge: capture counter in the high nibble, key number in the low
    pub keydown: u8,
    /// Currently held keys
    pub keypad: u16,
}

impl ReaderStatus {
    /// Pack into the wire layout
    #[must_use]
    pub fn to_bytes(&self) -> [u8; STATUS_SIZE] {
        let mut out = [0u8; STATUS_SIZE];
        out[0] = self.state as u8;
        out[1] = self.sensors.as_u8();
        out[2..10].copy_from_slice(&self.uid);
        out[10] = self.card_type;
        out[11] = 0x03;
        out[12] = self.keydown;
        out[13] = 0x00;
        out[14..16].copy_from_slice(&self.keypad.to_be_bytes());
        out
    }
}

/// Card reader options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CardReaderConfig {
    /// Reported by GET_VERSION
    pub info: DeviceInfo,
    /// Reader units, one bus node each
    pub units: NonZeroU8,
    /// Map the last node to unit 0
    pub flip_order: bool,
    /// A card not ejected by then is removed automatically
    pub card_timeout: Duration,
    /// Use the alternate keypad bit layout
    pub alternate_keypad: bool,
}

impl Default for CardReaderConfig {
    fn default() -> Self {
        Self {
            info: DeviceInfo::new(0x03, "ICCA", (1, 6, 0)),
            units: NonZeroU8::MIN.saturating_add(1),
            flip_order: false,
            card_timeout: Duration::from_secs(10),
            alternate_keypad: false,
        }
    }
}

#[derive(Debug)]
struct Unit {
    lifecycle: Lifecycle,
    card: Option<([u8; 8], Instant)>,
    accept: bool,
    hold: bool,
    keypad: u16,
    keydown: u8,
    keys_last: u16,
    capture: u8,
    power_counter: u8,
}

impl Default for Unit {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::default(),
            card: None,
            accept: true,
            hold: false,
            keypad: 0,
            keydown: 0,
            keys_last: 0,
            capture: CAPTURE_START,
            power_counter: POWER_COUNTER_START,
        }
    }
}

impl Unit {
    fn eject(&mut self) {
        self.card = None;
        self.hold = false;
    }

    fn status(&mut self) -> ReaderStatus {
        let uid = self.card.map(|(uid, _)| uid);
        if uid.is_some() && self.accept {
            self.hold = true;
        }

        let (state, sensors) = if self.hold {
            (
                CardState::Present,
                SensorFlags::new()
                    .with(SensorFlags::FRONT)
                    .with(SensorFlags::BACK),
            )
        } else if uid.is_some() {
            (CardState::Present, SensorFlags::new().with(SensorFlags::FRONT))
        } else {
            (CardState::Empty, SensorFlags::new())
        };

        ReaderStatus {
            state,
            sensors,
            uid: uid.unwrap_or_default(),
            card_type: 0,
            keydown: self.keydown,
            keypad: self.keypad,
        }
    }
}

/// Card reader device occupying one node per unit.
pub struct CardReader {
    config: CardReaderConfig,
    source: Box<dyn CardSource>,
    units: Vec<Unit>,
}

impl CardReader {
    /// Create a reader drawing cards from `source`
    pub fn new<S: CardSource + 'static>(config: CardReaderConfig, source: S) -> Self {
        let units = (0..config.units.get()).map(|_| Unit::default()).collect();
        Self {
            config,
            source: Box::new(source),
            units,
        }
    }

    /// Check whether `unit` has been reinitialized
    #[must_use]
    pub fn is_active(&self, unit: u8) -> bool {
        self.units
            .get(usize::from(unit))
            .is_some_and(|unit| unit.lifecycle.is_active())
    }

    fn unit_index(&self, ctx: NodeContext) -> u8 {
        if self.config.flip_order {
            self.config.units.get() - ctx.node() - 1
        } else {
            ctx.node()
        }
    }

    fn refresh_card(&mut self, unit: u8) {
        let timeout = self.config.card_timeout;
        let slot = &mut self.units[usize::from(unit)];

        if let Some((_, inserted)) = slot.card {
            if inserted.elapsed() >= timeout {
                debug!(unit, "card timed out");
                slot.eject();
            }
        }

        if slot.card.is_none() {
            if let Some(uid) = self.source.take_card(unit) {
                info!(unit, "card inserted");
                slot.card = Some((uid, Instant::now()));
            }
        }
    }

    fn refresh_keypad(&mut self, unit: u8) {
        let codes = if self.config.alternate_keypad {
            &KEY_CODES_ALT
        } else {
            &KEY_CODES
        };
        let keys = self.source.keypad(unit);
        let slot = &mut self.units[usize::from(unit)];

        slot.keypad = 0;
        let mut edge = false;
        for (key, (&code, &number)) in codes.iter().zip(&KEY_NUMBERS).enumerate() {
            let bit = 1u16 << key;
            if keys & bit == 0 {
                continue;
            }
            slot.keypad |= code;
            if slot.keys_last & bit == 0 {
                slot.keydown = (slot.capture << 4) | number;
                edge = true;
            }
        }
        slot.keys_last = keys;

        if edge {
            slot.capture = slot.capture.wrapping_add(1) | CAPTURE_START;
        } else {
            slot.keydown = 0;
        }
    }

    fn status_reply(&mut self, unit: u8, request: &Message) -> Message {
        if !self.units[usize::from(unit)].lifecycle.is_active() {
            return Message::reply(request, Bytes::from_static(&[0; STATUS_SIZE]));
        }

        self.refresh_card(unit);
        self.refresh_keypad(unit);
        let mut status = self.units[usize::from(unit)].status().to_bytes();
        if request.command() == command::READ_CARD {
            status[0] = CardState::Empty as u8;
        }
        Message::reply(request, Bytes::copy_from_slice(&status))
    }
}

impl Device for CardReader {
    fn node_count(&self) -> NonZeroU8 {
        self.config.units
    }

    fn version(&self, _ctx: NodeContext) -> VersionRecord {
        self.config.info.version_record()
    }

    fn reset(&mut self, ctx: NodeContext) {
        let unit = self.unit_index(ctx);
        let slot = &mut self.units[usize::from(unit)];
        slot.lifecycle.reset();
        slot.accept = true;
        slot.hold = false;
    }

    fn handle_command(&mut self, ctx: NodeContext, request: &Message) -> Option<Message> {
        let unit = self.unit_index(ctx);

        match request.command() {
            command::REINITIALIZE => {
                self.units[usize::from(unit)]
                    .lifecycle
                    .activate(request.sequence_tag());
                Some(Message::status_ack(request, 0))
            }
            command::READ_CARD | command::GET_STATUS => Some(self.status_reply(unit, request)),
            command::SET_ACTION => {
                if let Some(&sub) = request.payload().get(1) {
                    let slot = &mut self.units[usize::from(unit)];
                    match sub {
                        action::ACCEPT_DISABLE => slot.accept = false,
                        action::ACCEPT_ENABLE => slot.accept = true,
                        action::EJECT => {
                            debug!(unit, "card ejected");
                            slot.eject();
                        }
                        _ => debug!(unit, sub, "unknown reader action"),
                    }
                }
                Some(self.status_reply(unit, request))
            }
            command::POWER_CONTROL => {
                let slot = &mut self.units[usize::from(unit)];
                slot.power_counter = slot.power_counter.saturating_sub(1);
                Some(Message::status_ack(request, slot.power_counter))
            }
            code if ACK_COMMANDS.contains(&code) => Some(Message::status_ack(request, 0)),
            _ => None,
        }
    }
}

impl fmt::Debug for CardReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardReader")
            .field("config", &self.config)
            .field("units", &self.units)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DeviceExt;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Deck {
        cards: VecDeque<(u8, [u8; 8])>,
        keys: [u16; 2],
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Deck>>);

    impl CardSource for Shared {
        fn take_card(&mut self, unit: u8) -> Option<[u8; 8]> {
            let mut deck = self.0.lock().unwrap();
            let index = deck.cards.iter().position(|(u, _)| *u == unit)?;
            deck.cards.remove(index).map(|(_, uid)| uid)
        }

        fn keypad(&mut self, unit: u8) -> u16 {
            self.0.lock().unwrap().keys[usize::from(unit)]
        }
    }

    const UID: [u8; 8] = [0xE0, 0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06];

    fn reader(config: CardReaderConfig) -> (CardReader, Shared) {
        let shared = Shared::default();
        (CardReader::new(config, shared.clone()), shared)
    }

    fn send(reader: &mut CardReader, node: u8, command: u16, payload: &[u8]) -> Message {
        let request = Message::new(node + 1, command, 0, payload.to_vec());
        reader
            .handle(NodeContext::new(node, 0), &request)
            .unwrap()
    }

    fn active_reader() -> (CardReader, Shared) {
        let (mut reader, shared) = reader(CardReaderConfig::default());
        send(&mut reader, 0, command::REINITIALIZE, &[]);
        send(&mut reader, 1, command::REINITIALIZE, &[]);
        (reader, shared)
    }

    #[test]
    fn test_status_layout() {
        let status = ReaderStatus {
            state: CardState::Present,
            sensors: SensorFlags::new().with(SensorFlags::FRONT),
            uid: UID,
            card_type: 0,
            keydown: 0x95,
            keypad: 0x2001,
        };
        assert_eq!(
            status.to_bytes(),
            [
                0x02, 0x10, 0xE0, 0x04, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00, 0x03, 0x95,
                0x00, 0x20, 0x01
            ]
        );
    }

    #[test]
    fn test_sensor_flags_display() {
        let both = SensorFlags::new()
            .with(SensorFlags::FRONT)
            .with(SensorFlags::BACK);
        assert_eq!(both.to_string(), "FRONT | BACK");
        assert_eq!(SensorFlags::new().to_string(), "NONE");
    }

    #[test]
    fn test_occupies_one_node_per_unit() {
        let (reader, _) = reader(CardReaderConfig::default());
        assert_eq!(reader.node_count().get(), 2);
    }

    #[test]
    fn test_status_zeroed_until_reinitialized() {
        let (mut reader, _) = reader(CardReaderConfig::default());

        let reply = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(reply.payload().as_ref(), &[0; STATUS_SIZE]);

        let ack = send(&mut reader, 0, command::REINITIALIZE, &[]);
        assert_eq!(ack.status(), Some(0));
        assert!(reader.is_active(0));
        assert!(!reader.is_active(1));

        let reply = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(reply.payload()[0], 0x01);
        assert_eq!(reply.payload()[11], 0x03);
    }

    #[test]
    fn test_card_held_when_accepting() {
        let (mut reader, shared) = active_reader();
        shared.0.lock().unwrap().cards.push_back((1, UID));

        let empty = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(empty.payload()[0], 0x01);

        let held = send(&mut reader, 1, command::GET_STATUS, &[]);
        assert_eq!(held.payload()[0], 0x02);
        assert_eq!(held.payload()[1], 0x30);
        assert_eq!(&held.payload()[2..10], &UID);
    }

    #[test]
    fn test_read_card_reports_no_card_state() {
        let (mut reader, shared) = active_reader();
        shared.0.lock().unwrap().cards.push_back((0, UID));

        let reply = send(&mut reader, 0, command::READ_CARD, &[]);
        assert_eq!(reply.payload()[0], 0x01);
        assert_eq!(&reply.payload()[2..10], &UID);
    }

    #[test]
    fn test_refused_card_front_sensor_only() {
        let (mut reader, shared) = active_reader();
        send(&mut reader, 0, command::SET_ACTION, &[0x00, action::ACCEPT_DISABLE]);
        shared.0.lock().unwrap().cards.push_back((0, UID));

        let reply = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(reply.payload()[0], 0x02);
        assert_eq!(reply.payload()[1], 0x10);
    }

    #[test]
    fn test_eject_clears_card() {
        let (mut reader, shared) = active_reader();
        shared.0.lock().unwrap().cards.push_back((0, UID));
        send(&mut reader, 0, command::GET_STATUS, &[]);

        let reply = send(&mut reader, 0, command::SET_ACTION, &[0x00, action::EJECT]);
        assert_eq!(reply.payload()[0], 0x01);
        assert_eq!(&reply.payload()[2..10], &[0; 8]);
    }

    #[test]
    fn test_card_times_out() {
        let config = CardReaderConfig {
            card_timeout: Duration::ZERO,
            ..CardReaderConfig::default()
        };
        let (mut reader, shared) = reader(config);
        send(&mut reader, 0, command::REINITIALIZE, &[]);
        shared.0.lock().unwrap().cards.push_back((0, UID));

        assert_eq!(send(&mut reader, 0, command::GET_STATUS, &[]).payload()[0], 0x02);
        assert_eq!(send(&mut reader, 0, command::GET_STATUS, &[]).payload()[0], 0x01);
    }

    #[test]
    fn test_keypad_edge_capture() {
        let (mut reader, shared) = active_reader();
        // key 5
        shared.0.lock().unwrap().keys[0] = 1 << 5;

        let first = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(first.payload()[12], 0x86);
        assert_eq!(&first.payload()[14..16], &[0x40, 0x00]);

        // still held: no new edge
        let held = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(held.payload()[12], 0x00);
        assert_eq!(&held.payload()[14..16], &[0x40, 0x00]);

        shared.0.lock().unwrap().keys[0] = 0;
        send(&mut reader, 0, command::GET_STATUS, &[]);
        shared.0.lock().unwrap().keys[0] = 1 << KEY_DECIMAL;

        let second = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(second.payload()[12], 0x98);
        assert_eq!(&second.payload()[14..16], &[0x00, 0x01]);
    }

    #[test]
    fn test_alternate_keypad_layout() {
        let config = CardReaderConfig {
            alternate_keypad: true,
            ..CardReaderConfig::default()
        };
        let (mut reader, shared) = reader(config);
        send(&mut reader, 0, command::REINITIALIZE, &[]);
        shared.0.lock().unwrap().keys[0] = 1 << 9;

        let reply = send(&mut reader, 0, command::GET_STATUS, &[]);
        assert_eq!(&reply.payload()[14..16], &[0x08, 0x00]);
    }

    #[test]
    fn test_power_control_counts_down() {
        let (mut reader, _) = reader(CardReaderConfig::default());

        let statuses: Vec<_> = (0..3)
            .map(|_| send(&mut reader, 0, command::POWER_CONTROL, &[]).status())
            .collect();
        assert_eq!(statuses, vec![Some(1), Some(0), Some(0)]);
        assert_eq!(send(&mut reader, 1, command::POWER_CONTROL, &[]).status(), Some(1));
    }

    #[test]
    fn test_flip_order_maps_units() {
        let config = CardReaderConfig {
            flip_order: true,
            ..CardReaderConfig::default()
        };
        let (mut reader, _) = reader(config);
        send(&mut reader, 0, command::REINITIALIZE, &[]);

        assert!(reader.is_active(1));
        assert!(!reader.is_active(0));
    }

    #[test]
    fn test_ack_only_and_unknown_commands() {
        let (mut reader, _) = reader(CardReaderConfig::default());
        assert_eq!(send(&mut reader, 0, 0x0116, &[]).status(), Some(0));

        let request = Message::new(1, 0x0161, 0, Bytes::new());
        assert!(reader.handle(NodeContext::new(0, 0), &request).is_none());
    }

    #[test]
    fn test_startup_deactivates_unit() {
        let (mut reader, _) = active_reader();
        send(&mut reader, 1, 0x0003, &[]);

        assert!(reader.is_active(0));
        assert!(!reader.is_active(1));
    }
}
