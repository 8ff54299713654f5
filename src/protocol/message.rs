//! ACIO message implementation

use bytes::{BufMut, Bytes};
use tracing::warn;

use super::{
    BROADCAST_ADDRESS, Command, Error, FrameConfig, HOST_ADDRESS, MAX_DATA_SIZE, MessageHeader,
    RESPONSE_FLAG, Result,
};

/// One ACIO transaction, request or reply
///
/// A reply may carry a status byte in addition to its payload. On the wire the
/// status is the first data byte; in this model it is kept apart so a
/// status-only acknowledgement has an empty payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message header
    header: MessageHeader,
    /// Reply status
    status: Option<u8>,
    /// Message payload
    payload: Bytes,
}

impl Message {
    /// Create a new message
    ///
    /// Payloads longer than [`MAX_DATA_SIZE`] are truncated.
    pub fn new(address: u8, command: u16, sequence_tag: u8, payload: impl Into<Bytes>) -> Self {
        let header = MessageHeader::new(address, command, sequence_tag, 0);
        Self::from_parts(header, None, payload.into())
    }

    /// Create a message for every node, using the short broadcast layout
    pub fn broadcast(payload: impl Into<Bytes>) -> Self {
        Self::new(BROADCAST_ADDRESS, Command::Broadcast.as_u16(), 0, payload)
    }

    /// Build a reply to `request` carrying `payload`
    ///
    /// The reply keeps the request's command and sequence tag and flags the
    /// address as a response.
    pub fn reply(request: &Self, payload: impl Into<Bytes>) -> Self {
        Self::new(
            reply_address(request.address()),
            request.command(),
            request.sequence_tag(),
            payload,
        )
    }

    /// Build an empty reply to `request`
    #[must_use]
    pub fn ack(request: &Self) -> Self {
        Self::reply(request, Bytes::new())
    }

    /// Build a status-only acknowledgement to `request`
    #[must_use]
    pub fn status_ack(request: &Self, status: u8) -> Self {
        Self::ack(request).with_status(status)
    }

    /// Attach a status byte
    #[must_use]
    pub fn with_status(self, status: u8) -> Self {
        Self::from_parts(self.header, Some(status), self.payload)
    }

    /// Replace the sequence tag
    #[must_use]
    pub fn with_sequence_tag(mut self, sequence_tag: u8) -> Self {
        self.header.set_sequence_tag(sequence_tag);
        self
    }

    fn from_parts(mut header: MessageHeader, status: Option<u8>, mut payload: Bytes) -> Self {
        let room = MAX_DATA_SIZE - usize::from(status.is_some());
        if payload.len() > room {
            warn!(
                size = payload.len(),
                max = room,
                command = header.command(),
                "message data too large; truncating"
            );
            payload.truncate(room);
        }

        let data_len = payload.len() + usize::from(status.is_some());
        header.set_data_len(u8::try_from(data_len).unwrap_or(u8::MAX));

        Self {
            header,
            status,
            payload,
        }
    }

    /// Get address
    #[must_use]
    pub const fn address(&self) -> u8 {
        self.header.address()
    }

    /// Get command code
    #[must_use]
    pub const fn command(&self) -> u16 {
        self.header.command()
    }

    /// Get the bus-standard command, if the code is one
    #[must_use]
    pub fn standard_command(&self) -> Option<Command> {
        Command::from_u16(self.command())
    }

    /// Get sequence tag
    #[must_use]
    pub const fn sequence_tag(&self) -> u8 {
        self.header.sequence_tag()
    }

    /// Get reply status
    #[must_use]
    pub const fn status(&self) -> Option<u8> {
        self.status
    }

    /// Get payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Get header
    #[must_use]
    pub const fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Check whether this message targets the broadcast address
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        self.header.is_broadcast()
    }

    /// Number of logical bytes [`Message::encode`] produces
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + usize::from(self.header.data_len())
    }

    /// Append the logical message bytes to a buffer
    pub fn encode_into<B: BufMut>(&self, out: &mut B) {
        self.header.write_to(out);
        if let Some(status) = self.status {
            out.put_u8(status);
        }
        out.put_slice(&self.payload);
    }

    /// Encode message to logical bytes (before framing)
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut bytes);
        bytes
    }

    /// Encode message into a complete wire frame
    pub fn to_frame(&self, config: &FrameConfig) -> Result<Vec<u8>> {
        super::encode_with(&self.encode(), config)
    }

    /// Decode message from logical bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::from_frame(Bytes::copy_from_slice(bytes))
    }

    /// Decode a status-carrying reply from logical bytes
    pub fn decode_reply(bytes: &[u8]) -> Result<Self> {
        Self::from_reply_frame(Bytes::copy_from_slice(bytes))
    }

    /// Decode a reply whose first data byte is a status
    ///
    /// Inverse of [`Message::encode`] for messages built with
    /// [`Message::with_status`]. A reply without data decodes with no status.
    pub fn from_reply_frame(frame: Bytes) -> Result<Self> {
        let mut message = Self::from_frame(frame)?;
        if let Some(&status) = message.payload.first() {
            message.status = Some(status);
            message.payload = message.payload.slice(1..);
        }
        Ok(message)
    }

    /// Decode message from a decoded frame without copying its data
    ///
    /// All data bytes become payload and the status stays `None`, so a reply
    /// built with a status does not compare equal after this round trip. Use
    /// [`Message::from_reply_frame`] when the message is known to carry one.
    pub fn from_frame(frame: Bytes) -> Result<Self> {
        let header = MessageHeader::from_bytes(&frame)?;
        let data = frame.slice(header.encoded_len()..);

        if data.len() != usize::from(header.data_len()) {
            return Err(Error::LengthMismatch {
                declared: usize::from(header.data_len()),
                actual: data.len(),
            });
        }

        Ok(Self {
            header,
            status: None,
            payload: data,
        })
    }
}

const fn reply_address(address: u8) -> u8 {
    if address == HOST_ADDRESS {
        address
    } else {
        address | RESPONSE_FLAG
    }
}
