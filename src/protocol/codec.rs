//! ACIO frame codec (encode/decode)
//!
//! This module converts flat logical payloads to and from self-delimiting wire
//! frames that tolerate payloads containing the framing bytes themselves.

use bytes::{BufMut, Bytes, BytesMut};

use super::{ESCAPE_MARKER, Error, MAX_FRAME_LEN, Result, START_MARKER};

/// Optional trailing checksum layered on top of the generic frame.
///
/// The checksum is computed over the logical (unescaped) payload, written after
/// it using the same escaping rule, and never counted in the length byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Checksum {
    /// No trailer
    #[default]
    None,
    /// 8-bit wrapping sum of the payload bytes
    Sum,
    /// Wrapping sum minus one
    SumMinusOne,
}

impl Checksum {
    /// Compute the trailer byte for `bytes`, if this mode has one
    #[must_use]
    pub fn compute(self, bytes: &[u8]) -> Option<u8> {
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        match self {
            Self::None => None,
            Self::Sum => Some(sum),
            Self::SumMinusOne => Some(sum.wrapping_sub(1)),
        }
    }

    /// Number of logical trailer bytes following the payload
    #[must_use]
    pub const fn trailer_len(self) -> usize {
        match self {
            Self::None => 0,
            Self::Sum | Self::SumMinusOne => 1,
        }
    }
}

/// Framing options for one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrameConfig {
    /// Largest length byte accepted or produced.
    pub max_len: u8,
    /// Trailer appended after the payload.
    pub checksum: Checksum,
}

impl FrameConfig {
    /// Replace the length limit
    #[must_use]
    pub const fn with_max_len(mut self, max_len: u8) -> Self {
        self.max_len = max_len;
        self
    }

    /// Replace the checksum mode
    #[must_use]
    pub const fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = checksum;
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_len: 0xFF,
            checksum: Checksum::None,
        }
    }
}

/// Encode a payload into a frame using the generic framing
///
/// # Format
///
/// ```text
/// [START 0xAA] [LEN (pre-escape payload length)] [ESCAPED PAYLOAD]
/// ```
///
/// Payload bytes equal to `0xAA` or `0xFF` are written as `0xFF` followed by
/// their complement.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>> {
    encode_with(payload, &FrameConfig::default())
}

/// Encode a payload into a frame using explicit framing options
pub fn encode_with(payload: &[u8], config: &FrameConfig) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded_len(payload, config));
    encode_into(payload, config, &mut out)?;
    Ok(out)
}

/// Append an encoded frame to any buffer
///
/// Nothing is written when the payload does not fit the length byte.
pub fn encode_into<B: BufMut>(payload: &[u8], config: &FrameConfig, out: &mut B) -> Result<()> {
    let max = usize::from(config.max_len);
    let len = u8::try_from(payload.len())
        .ok()
        .filter(|len| *len <= config.max_len)
        .ok_or(Error::PayloadTooLarge {
            size: payload.len(),
            max,
        })?;

    out.put_u8(START_MARKER);
    out.put_u8(len);
    for &byte in payload {
        put_escaped(out, byte);
    }
    if let Some(checksum) = config.checksum.compute(payload) {
        put_escaped(out, checksum);
    }

    Ok(())
}

/// Exact number of wire bytes [`encode_with`] produces for `payload`
#[must_use]
pub fn encoded_len(payload: &[u8], config: &FrameConfig) -> usize {
    let escaped = |b: &u8| if needs_escape(*b) { 2 } else { 1 };
    let trailer = config
        .checksum
        .compute(payload)
        .map_or(0, |checksum| escaped(&checksum));

    2 + payload.iter().map(escaped).sum::<usize>() + trailer
}

/// Decode a complete frame using the generic framing
///
/// # Errors
///
/// Returns an error if:
/// - The frame is shorter than its two header bytes
/// - The first byte is not the start marker
/// - The declared length exceeds the limit
/// - The number of logical bytes differs from the declared length
pub fn decode(frame: &[u8]) -> Result<Bytes> {
    decode_with(frame, &FrameConfig::default())
}

/// Decode a complete frame using explicit framing options
pub fn decode_with(frame: &[u8], config: &FrameConfig) -> Result<Bytes> {
    if frame.len() < 2 {
        return Err(Error::BufferTooSmall {
            needed: 2,
            got: frame.len(),
        });
    }

    if frame[0] != START_MARKER {
        return Err(Error::InvalidStartMarker { found: frame[0] });
    }

    let declared = usize::from(frame[1]);
    check_len(declared, config)?;

    let trailer = config.checksum.trailer_len();
    let body = &frame[2..];
    let mut logical = BytesMut::with_capacity(declared + trailer);
    let mut i = 0;
    while i < body.len() {
        let mut byte = body[i];
        if byte == ESCAPE_MARKER && i + 1 < body.len() {
            i += 1;
            byte = !body[i];
        }
        logical.put_u8(byte);
        i += 1;
    }

    if logical.len() != declared + trailer {
        return Err(Error::LengthMismatch {
            declared,
            actual: logical.len().saturating_sub(trailer),
        });
    }

    finish(logical.freeze(), declared, config.checksum)
}

/// Incremental frame decoder for byte streams.
///
/// Bytes are consumed exactly once. Bytes seen while waiting for a start marker
/// are reported as [`Error::InvalidStartMarker`]. An unescaped start marker in
/// the middle of a payload means the frame was cut short: the decoder reports
/// [`Error::LengthMismatch`] and treats the marker as the start of the next
/// frame.
#[derive(Debug)]
pub struct FrameDecoder {
    config: FrameConfig,
    state: DecodeState,
    buf: BytesMut,
    declared: usize,
    escaped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    Length,
    Payload,
}

impl FrameDecoder {
    /// Create a decoder for the given framing options
    #[must_use]
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            state: DecodeState::Idle,
            buf: BytesMut::with_capacity(MAX_FRAME_LEN + 1),
            declared: 0,
            escaped: false,
        }
    }

    /// Framing options in use
    #[must_use]
    pub const fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Check whether the decoder is between frames
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::Idle
    }

    /// Discard any partially decoded frame
    pub fn reset(&mut self) {
        self.buf.clear();
        self.declared = 0;
        self.escaped = false;
        self.state = DecodeState::Idle;
    }

    /// Feed one byte, returning a completed frame or a framing error
    pub fn push(&mut self, byte: u8) -> Option<Result<Bytes>> {
        match self.state {
            DecodeState::Idle => {
                if byte == START_MARKER {
                    self.begin();
                    None
                } else {
                    Some(Err(Error::InvalidStartMarker { found: byte }))
                }
            }
            DecodeState::Length => {
                let declared = usize::from(byte);
                if let Err(err) = check_len(declared, &self.config) {
                    // a repeated start marker keeps the decoder waiting for a length
                    if byte == START_MARKER {
                        self.begin();
                    } else {
                        self.reset();
                    }
                    return Some(Err(err));
                }
                self.declared = declared;
                self.state = DecodeState::Payload;
                self.complete_if_ready()
            }
            DecodeState::Payload => {
                if self.escaped {
                    self.escaped = false;
                    self.buf.put_u8(!byte);
                } else if byte == ESCAPE_MARKER {
                    self.escaped = true;
                    return None;
                } else if byte == START_MARKER {
                    let declared = self.declared;
                    let actual = self.buf.len().min(declared);
                    self.begin();
                    return Some(Err(Error::LengthMismatch { declared, actual }));
                } else {
                    self.buf.put_u8(byte);
                }
                self.complete_if_ready()
            }
        }
    }

    /// Feed a slice, collecting every completed frame and error in order
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Bytes>> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    fn begin(&mut self) {
        self.reset();
        self.state = DecodeState::Length;
    }

    fn complete_if_ready(&mut self) -> Option<Result<Bytes>> {
        if self.buf.len() < self.declared + self.config.checksum.trailer_len() {
            return None;
        }

        let logical = self.buf.split().freeze();
        let declared = self.declared;
        self.reset();
        Some(finish(logical, declared, self.config.checksum))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

fn check_len(declared: usize, config: &FrameConfig) -> Result<()> {
    let max = usize::from(config.max_len);
    if declared > max {
        return Err(Error::LengthOutOfRange { len: declared, max });
    }
    Ok(())
}

fn finish(mut logical: Bytes, declared: usize, checksum: Checksum) -> Result<Bytes> {
    if checksum.trailer_len() > 0 {
        let found = logical[declared];
        logical.truncate(declared);
        if let Some(expected) = checksum.compute(&logical) {
            if expected != found {
                return Err(Error::ChecksumMismatch { expected, found });
            }
        }
    }
    Ok(logical)
}

const fn needs_escape(byte: u8) -> bool {
    byte == START_MARKER || byte == ESCAPE_MARKER
}

fn put_escaped<B: BufMut>(out: &mut B, byte: u8) {
    if needs_escape(byte) {
        out.put_u8(ESCAPE_MARKER);
        out.put_u8(!byte);
    } else {
        out.put_u8(byte);
    }
}
