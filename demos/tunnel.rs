//! Talk to a card reader through an outer tunnel board

use acioemu::bus::Bus;
use acioemu::devices::{CardReader, CardReaderConfig, CardSource};
use acioemu::protocol::{FrameDecoder, decode_with, encode_with};
use acioemu::transport::{PortTable, TunnelConfig, TunnelPort, tunnel::command};
use acioemu::{FrameConfig, Message};

struct NoCards;

impl CardSource for NoCards {
    fn take_card(&mut self, _unit: u8) -> Option<[u8; 8]> {
        None
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("ACIO Tunnel Example");
    println!("===================\n");

    let config = TunnelConfig::default();
    let outer = config.frame;
    let identifier = config.identifier.clone();

    let port = TunnelPort::new(config, || {
        let mut bus = Bus::default();
        bus.register(CardReader::new(CardReaderConfig::default(), NoCards))?;
        Ok(bus)
    })
    .with_input_word(|| 1u32 << 30);

    let mut table = PortTable::new();
    table.insert(port);
    let id = table.open(&identifier).ok_or("tunnel refused open")?;

    let send = |table: &mut PortTable, message: &[u8]| -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        table.write(id, &encode_with(message, &outer)?)?;
        let mut buf = [0u8; 256];
        let len = table.read(id, &mut buf)?;
        Ok(decode_with(&buf[..len], &outer)?.to_vec())
    };

    let version = send(&mut table, &[0x00, command::VERSION])?;
    println!("board code: {}", String::from_utf8_lossy(&version[2..5]));

    send(&mut table, &[0x00, command::PORT_OPERATION, 0x00, 0x00, 0x00])?;

    let keepalive = Message::new(1, 0x0080, 0, Vec::new()).to_frame(&FrameConfig::default())?;
    let mut write = vec![0x00, command::REMOTE_WRITE, 0x00, u8::try_from(keepalive.len())?];
    write.extend_from_slice(&keepalive);
    send(&mut table, &write)?;

    let read = send(&mut table, &[0x00, command::REMOTE_READ, 0x00, 0x40])?;
    for frame in FrameDecoder::default().feed(&read[3..]) {
        let reply = Message::from_frame(frame?)?;
        println!("inner reply from {:#04X}: {:?}", reply.address(), reply.payload());
    }

    let mut word = [0u8; 4];
    table.device_io(id, 0, &[], &mut word)?;
    println!("input word: {:#010X}", u32::from_le_bytes(word));

    table.close(id);
    Ok(())
}
