//! Drive an emulated cabinet bus the way a game does at boot

use acioemu::bus::Bus;
use acioemu::devices::{CardReader, CardReaderConfig, CardSource, IoBoard, IoBoardConfig};
use acioemu::protocol::FrameDecoder;
use acioemu::{FrameConfig, Message};

struct OneCard(Option<[u8; 8]>);

impl CardSource for OneCard {
    fn take_card(&mut self, unit: u8) -> Option<[u8; 8]> {
        if unit == 0 { self.0.take() } else { None }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("ACIO Bus Round Trip");
    println!("===================\n");

    let mut bus = Bus::default();
    // DO NOT reorder: node addresses follow registration order
    let reader = bus.register(CardReader::new(
        CardReaderConfig::default(),
        OneCard(Some([0xE0, 0x04, 0x01, 0x00, 0x12, 0x34, 0x56, 0x78])),
    ))?;
    let board = bus.register(IoBoard::new(IoBoardConfig::default(), |state: &mut [u8]| {
        state[0] = 0x01;
    }))?;
    println!("reader at node {reader}, io board at node {board}\n");

    let script = [
        Message::new(0x00, 0x0001, 0, Vec::new()),
        Message::new(0x01, 0x0002, 0, Vec::new()),
        Message::new(0x01, 0x0130, 0, Vec::new()),
        Message::new(0x01, 0x0134, 1, Vec::new()),
        Message::new(0x03, 0x0120, 7, Vec::new()),
        Message::new(0x03, 0x012F, 0, Vec::new()),
        Message::new(0x03, 0x0999, 0, Vec::new()),
    ];

    let config = FrameConfig::default();
    let mut decoder = FrameDecoder::new(config);
    let mut out = [0u8; 512];

    for request in &script {
        let frame = request.to_frame(&config)?;
        bus.write(&frame);
        let len = bus.read(&mut out);

        println!("> {}", hex(&frame));
        if len == 0 {
            println!("  (no reply)");
        }
        for reply in decoder.feed(&out[..len]) {
            let reply = Message::from_frame(reply?)?;
            println!(
                "< addr={:#04X} cmd={:#06X} tag={} data={}",
                reply.address(),
                reply.command(),
                reply.sequence_tag(),
                hex(reply.payload())
            );
        }
    }

    let stats = bus.stats();
    println!(
        "\nframes={} replies={} unhandled={}",
        stats.frames_received(),
        stats.replies_queued(),
        stats.unhandled()
    );

    Ok(())
}
