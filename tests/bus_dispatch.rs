use std::sync::{Arc, Mutex};

use acioemu::bus::{Bus, Device, NodeContext};
use acioemu::devices::{CardReader, CardReaderConfig, CardSource, IoBoard, IoBoardConfig};
use acioemu::protocol::{FrameDecoder, VERSION_RECORD_SIZE, VersionRecord};
use acioemu::{FrameConfig, Message};

#[derive(Clone, Default)]
struct Slot(Arc<Mutex<Option<[u8; 8]>>>);

impl CardSource for Slot {
    fn take_card(&mut self, _unit: u8) -> Option<[u8; 8]> {
        self.0.lock().unwrap().take()
    }
}

/// Reader (2 nodes) followed by an I/O board (1 node), the usual cabinet order.
fn cabinet() -> (Bus, Slot) {
    let slot = Slot::default();
    let mut bus = Bus::default();
    bus.register(CardReader::new(CardReaderConfig::default(), slot.clone()))
        .unwrap();
    bus.register(IoBoard::new(IoBoardConfig::default(), |state: &mut [u8]| {
        state[0] = 0xC3;
    }))
    .unwrap();
    (bus, slot)
}

fn exchange(bus: &mut Bus, request: &Message) -> Vec<Message> {
    bus.write(&request.to_frame(&FrameConfig::default()).unwrap());

    let mut out = vec![0u8; bus.bytes_available()];
    let len = bus.read(&mut out);
    FrameDecoder::default()
        .feed(&out[..len])
        .into_iter()
        .map(|frame| Message::from_frame(frame.unwrap()).unwrap())
        .collect()
}

fn request(address: u8, command: u16, tag: u8) -> Message {
    Message::new(address, command, tag, Vec::new())
}

#[test]
fn standard_commands_answered_by_every_node() {
    let (mut bus, _) = cabinet();

    for address in 1..=3 {
        let version = exchange(&mut bus, &request(address, 0x0002, 0));
        assert_eq!(version.len(), 1);
        assert_eq!(version[0].address(), address | 0x80);
        assert_eq!(version[0].payload().len(), VERSION_RECORD_SIZE);

        for command in [0x0003, 0x0100, 0x0080] {
            let replies = exchange(&mut bus, &request(address, command, 5));
            assert_eq!(replies.len(), 1, "address {address} command {command:#06x}");
            // status byte travels as the single data byte
            assert_eq!(replies[0].payload().as_ref(), &[0x00]);
            assert_eq!(replies[0].sequence_tag(), 5);
        }
    }
}

fn activate(bus: &mut Bus) {
    exchange(bus, &request(1, 0x0130, 0));
    exchange(bus, &request(2, 0x0130, 0));
    exchange(bus, &request(3, 0x0120, 0x40));
}

#[test]
fn standard_commands_answered_while_active() {
    let (mut bus, _) = cabinet();

    for reset in [0x0003, 0x0100] {
        activate(&mut bus);
        assert_eq!(exchange(&mut bus, &request(3, 0x012F, 0))[0].payload()[0], 0xC3);
        assert_eq!(exchange(&mut bus, &request(1, 0x0134, 0))[0].payload()[0], 0x01);

        for address in 1..=3 {
            let version = exchange(&mut bus, &request(address, 0x0002, 0));
            assert_eq!(version.len(), 1);
            assert_eq!(version[0].payload().len(), VERSION_RECORD_SIZE);

            let keepalive = exchange(&mut bus, &request(address, 0x0080, 6));
            assert_eq!(keepalive[0].payload().as_ref(), &[0x00]);
            assert_eq!(keepalive[0].sequence_tag(), 6);
        }

        // version and keepalive leave the devices active
        assert_eq!(exchange(&mut bus, &request(3, 0x012F, 0))[0].payload()[0], 0xC3);
        assert_eq!(exchange(&mut bus, &request(2, 0x0134, 0))[0].payload()[0], 0x01);

        for address in 1..=3 {
            let ack = exchange(&mut bus, &request(address, reset, 9));
            assert_eq!(ack.len(), 1, "address {address} command {reset:#06x}");
            assert_eq!(ack[0].payload().as_ref(), &[0x00]);
            assert_eq!(ack[0].sequence_tag(), 9);
        }

        let board = exchange(&mut bus, &request(3, 0x012F, 0x22));
        assert!(board[0].payload().iter().all(|&b| b == 0));
        assert_eq!(board[0].sequence_tag(), 0x22);
        for address in 1..=2 {
            let status = exchange(&mut bus, &request(address, 0x0134, 0));
            assert!(status[0].payload().iter().all(|&b| b == 0));
        }
    }
}

#[test]
fn version_records_identify_devices() {
    let (mut bus, _) = cabinet();

    let reader = exchange(&mut bus, &request(2, 0x0002, 0));
    let board = exchange(&mut bus, &request(3, 0x0002, 0));

    let reader = VersionRecord::from_bytes(reader[0].payload()).unwrap();
    let board = VersionRecord::from_bytes(board[0].payload()).unwrap();
    assert_eq!(reader.name(), "ICCA");
    assert_eq!(reader.class_code(), 0x03);
    assert_eq!(board.name(), "J32D");
}

#[test]
fn assign_addrs_counts_all_nodes() {
    let (mut bus, _) = cabinet();

    let replies = exchange(&mut bus, &request(0, 0x0001, 0));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].payload().as_ref(), &[3]);
}

#[test]
fn board_poll_gated_by_activation() {
    let (mut bus, _) = cabinet();

    let before = exchange(&mut bus, &request(3, 0x012F, 0x22));
    assert_eq!(before[0].payload().len(), 0x11);
    assert!(before[0].payload().iter().all(|&b| b == 0));

    exchange(&mut bus, &request(3, 0x0120, 0x30));
    let live = exchange(&mut bus, &request(3, 0x012F, 0x99));
    assert_eq!(live[0].payload()[0], 0xC3);
    assert_eq!(live[0].sequence_tag(), 0x30);

    let next = exchange(&mut bus, &request(3, 0x012F, 0x99));
    assert_eq!(next[0].sequence_tag(), 0x31);
}

#[test]
fn card_reaches_addressed_unit_only() {
    let (mut bus, slot) = cabinet();
    exchange(&mut bus, &request(1, 0x0130, 0));
    exchange(&mut bus, &request(2, 0x0130, 0));

    let uid = [0x01, 0x2E, 0x00, 0x00, 0xAA, 0xFF, 0x10, 0x20];
    *slot.0.lock().unwrap() = Some(uid);

    let unit1 = exchange(&mut bus, &request(2, 0x0134, 0));
    assert_eq!(unit1[0].payload()[0], 0x02);
    assert_eq!(&unit1[0].payload()[2..10], &uid);

    let unit0 = exchange(&mut bus, &request(1, 0x0134, 0));
    assert_eq!(unit0[0].payload()[0], 0x01);
}

#[test]
fn broadcast_answered_by_each_device() {
    let (mut bus, _) = cabinet();

    let replies = exchange(&mut bus, &Message::broadcast(vec![0x00]));
    assert_eq!(replies.len(), 2);
}

#[test]
fn unhandled_emits_nothing_but_empty_reply_emits_frame() {
    struct Quiet;

    impl Device for Quiet {
        fn version(&self, _ctx: NodeContext) -> VersionRecord {
            acioemu::protocol::DeviceInfo::new(1, "QT", (1, 0, 0)).version_record()
        }

        fn reset(&mut self, _ctx: NodeContext) {}

        fn handle_command(&mut self, _ctx: NodeContext, request: &Message) -> Option<Message> {
            (request.command() == 0x0500).then(|| Message::ack(request))
        }
    }

    let mut bus = Bus::default();
    bus.register(Quiet).unwrap();

    bus.write(&request(1, 0x0501, 0).to_frame(&FrameConfig::default()).unwrap());
    assert_eq!(bus.bytes_available(), 0);

    bus.write(&request(1, 0x0500, 0).to_frame(&FrameConfig::default()).unwrap());
    let mut out = [0u8; 16];
    let len = bus.read(&mut out);
    assert_eq!(&out[..len], &[0xAA, 0x05, 0x81, 0x05, 0x00, 0x00, 0x00]);
    assert_eq!(bus.stats().unhandled(), 1);
}

#[test]
fn garbage_between_frames_is_skipped() {
    let (mut bus, _) = cabinet();

    let mut wire = vec![0x13, 0x37];
    wire.extend(request(1, 0x0080, 0).to_frame(&FrameConfig::default()).unwrap());
    wire.extend([0xAA, 0x09, 0x01]);
    wire.extend(request(3, 0x0080, 0).to_frame(&FrameConfig::default()).unwrap());
    bus.write(&wire);

    let mut out = vec![0u8; bus.bytes_available()];
    let len = bus.read(&mut out);
    let replies: Vec<u8> = FrameDecoder::default()
        .feed(&out[..len])
        .into_iter()
        .map(|frame| Message::from_frame(frame.unwrap()).unwrap().address())
        .collect();

    assert_eq!(replies, vec![0x81, 0x83]);
    assert_eq!(bus.stats().malformed_frames(), 3);
}
