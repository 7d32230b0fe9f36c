//! WebSocket frame codec according to RFC 6455, client role.
//!
//! Decoding is incremental: [`FrameDecoder`] consumes bytes from a
//! [`ChunkQueue`] as they arrive and yields a [`Frame`] once the header,
//! extended length, and payload are all present. Encoding always produces a
//! masked, final frame, as required of clients.
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::buffer::ChunkQueue;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// WebSocket frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (fragmented message).
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3-0x7 reserved for non-control frames
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB-0xF reserved for control frames
}

impl Opcode {
    /// Returns true if this is a control frame (Close, Ping, Pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true if this is a data frame (Continuation, Text, Binary).
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    /// Try to parse an opcode from a byte value.
    ///
    /// Reserved values (0x3-0x7, 0xB-0xF) are a protocol error.
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpcode(value)),
        }
    }
}

/// A decoded inbound frame.
///
/// Once yielded by the decoder all fields are final; `payload.len()` equals
/// the length declared on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag (FIN bit).
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Payload data.
    pub payload: Bytes,
}

/// WebSocket codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsError {
    /// Invalid or reserved opcode value.
    InvalidOpcode(u8),
    /// Server sent a masked frame (clients must never receive one).
    MaskedServerFrame,
    /// Reserved bits set without extension support.
    ReservedBitsSet,
    /// 64-bit extended length with the high bit set.
    InvalidLength(u64),
    /// Payload exceeds the allowed size.
    PayloadTooLarge {
        /// Declared payload size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },
    /// Control frame payload exceeds 125 bytes.
    ControlFrameTooLarge(usize),
    /// Control frame is fragmented (FIN not set).
    FragmentedControlFrame,
    /// Close code outside the sendable ranges.
    InvalidCloseCode(u16),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOpcode(op) => write!(f, "invalid opcode: 0x{op:X}"),
            Self::MaskedServerFrame => write!(f, "received a masked frame from the server"),
            Self::ReservedBitsSet => write!(f, "reserved bits set without extension"),
            Self::InvalidLength(len) => write!(f, "invalid 64-bit payload length: {len}"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "payload too large: {size} bytes (max: {max})")
            }
            Self::ControlFrameTooLarge(size) => {
                write!(f, "control frame payload too large: {size} bytes (max: 125)")
            }
            Self::FragmentedControlFrame => write!(f, "control frame cannot be fragmented"),
            Self::InvalidCloseCode(code) => write!(f, "invalid close code: {code}"),
        }
    }
}

impl std::error::Error for WsError {}

/// Decode state machine, advanced by chunk arrivals.
#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the first 2 header bytes.
    Header,
    /// Waiting for a 2-byte extended length.
    Length16 { fin: bool, opcode: Opcode },
    /// Waiting for an 8-byte extended length.
    Length64 { fin: bool, opcode: Opcode },
    /// Waiting for the full payload.
    Payload {
        fin: bool,
        opcode: Opcode,
        payload_len: u64,
    },
}

/// Incremental decoder for inbound (server-to-client) frames.
///
/// One decoder serves a whole connection: partial state survives any number
/// of short reads, and the state returns to `Header` after each completed
/// frame. Feed order does not matter; any chunking of the same byte stream
/// decodes to the same frames.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    /// Optional cap on declared payload length.
    max_payload: Option<u64>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Creates a decoder with no payload cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            max_payload: None,
        }
    }

    /// Sets the maximum accepted payload length.
    #[must_use]
    pub fn max_payload(mut self, max: Option<u64>) -> Self {
        self.max_payload = max;
        self
    }

    fn check_cap(&self, payload_len: u64) -> Result<(), WsError> {
        match self.max_payload {
            Some(max) if payload_len > max => Err(WsError::PayloadTooLarge {
                size: payload_len,
                max,
            }),
            _ => Ok(()),
        }
    }

    /// Consumes as much of `queue` as possible.
    ///
    /// Returns `Ok(None)` when more bytes are needed and `Ok(Some(frame))`
    /// once a frame is complete; the decoder is then ready for the next
    /// frame. On error the connection is unrecoverable and should be
    /// aborted with a protocol-error close.
    pub fn decode(&mut self, queue: &mut ChunkQueue) -> Result<Option<Frame>, WsError> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if queue.len() < 2 {
                        return Ok(None);
                    }
                    let header = queue.copy_range(0, 2);
                    queue.advance(2);

                    let fin = header[0] & 0x80 != 0;
                    if header[0] & 0x70 != 0 {
                        return Err(WsError::ReservedBitsSet);
                    }
                    let opcode = Opcode::from_u8(header[0] & 0x0F)?;
                    if header[1] & 0x80 != 0 {
                        return Err(WsError::MaskedServerFrame);
                    }
                    let len7 = header[1] & 0x7F;

                    if opcode.is_control() {
                        if !fin {
                            return Err(WsError::FragmentedControlFrame);
                        }
                        if len7 > 125 {
                            return Err(WsError::ControlFrameTooLarge(len7 as usize));
                        }
                    }

                    self.state = match len7 {
                        126 => DecodeState::Length16 { fin, opcode },
                        127 => DecodeState::Length64 { fin, opcode },
                        _ => {
                            let payload_len = u64::from(len7);
                            self.check_cap(payload_len)?;
                            DecodeState::Payload {
                                fin,
                                opcode,
                                payload_len,
                            }
                        }
                    };
                }

                DecodeState::Length16 { fin, opcode } => {
                    if queue.len() < 2 {
                        return Ok(None);
                    }
                    let raw = queue.take(2);
                    let payload_len = u64::from(u16::from_be_bytes([raw[0], raw[1]]));
                    self.check_cap(payload_len)?;
                    self.state = DecodeState::Payload {
                        fin,
                        opcode,
                        payload_len,
                    };
                }

                DecodeState::Length64 { fin, opcode } => {
                    if queue.len() < 8 {
                        return Ok(None);
                    }
                    let raw = queue.take(8);
                    let payload_len = u64::from_be_bytes([
                        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                    ]);
                    // The most significant bit must be zero (RFC 6455 §5.2).
                    if payload_len & (1 << 63) != 0 {
                        return Err(WsError::InvalidLength(payload_len));
                    }
                    self.check_cap(payload_len)?;
                    self.state = DecodeState::Payload {
                        fin,
                        opcode,
                        payload_len,
                    };
                }

                DecodeState::Payload {
                    fin,
                    opcode,
                    payload_len,
                } => {
                    let payload = if payload_len == 0 {
                        Bytes::new()
                    } else {
                        let needed = usize::try_from(payload_len).map_err(|_| {
                            WsError::PayloadTooLarge {
                                size: payload_len,
                                max: usize::MAX as u64,
                            }
                        })?;
                        if queue.len() < needed {
                            return Ok(None);
                        }
                        queue.take(needed)
                    };
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame {
                        fin,
                        opcode,
                        payload,
                    }));
                }
            }
        }
    }
}

/// Largest encodable payload length (63-bit, RFC 6455 §5.2).
const MAX_ENCODED_LEN: u64 = i64::MAX as u64;

/// Encodes a masked client frame with a random masking key.
///
/// For [`Opcode::Close`] a provided `close_code` is prepended to the payload
/// as 2 big-endian bytes before masking.
///
/// # Errors
///
/// Returns [`WsError::ControlFrameTooLarge`] for a control payload over 125
/// bytes and [`WsError::PayloadTooLarge`] past the 63-bit length limit.
pub fn encode_frame(
    opcode: Opcode,
    payload: &[u8],
    close_code: Option<u16>,
) -> Result<BytesMut, WsError> {
    encode_frame_with_key(opcode, payload, close_code, generate_mask_key())
}

/// Encodes a masked client frame with an explicit masking key.
///
/// Deterministic variant of [`encode_frame`]; production sends should prefer
/// the random-key form.
pub fn encode_frame_with_key(
    opcode: Opcode,
    payload: &[u8],
    close_code: Option<u16>,
    mask_key: [u8; 4],
) -> Result<BytesMut, WsError> {
    let code = match (opcode, close_code) {
        (Opcode::Close, Some(code)) => Some(code),
        _ => None,
    };
    let effective_len = payload.len() as u64 + if code.is_some() { 2 } else { 0 };
    if effective_len > MAX_ENCODED_LEN {
        return Err(WsError::PayloadTooLarge {
            size: effective_len,
            max: MAX_ENCODED_LEN,
        });
    }
    if opcode.is_control() && effective_len > 125 {
        return Err(WsError::ControlFrameTooLarge(effective_len as usize));
    }

    let header_size = if effective_len > 65535 {
        10
    } else if effective_len > 125 {
        4
    } else {
        2
    };
    let mut dst = BytesMut::with_capacity(header_size + 4 + effective_len as usize);

    dst.put_u8(0x80 | opcode as u8);
    if effective_len <= 125 {
        dst.put_u8(0x80 | effective_len as u8);
    } else if effective_len <= 65535 {
        dst.put_u8(0x80 | 126);
        dst.put_u16(effective_len as u16);
    } else {
        dst.put_u8(0x80 | 127);
        dst.put_u64(effective_len);
    }

    let mut body = BytesMut::with_capacity(effective_len as usize);
    if let Some(code) = code {
        body.put_u16(code);
    }
    body.put_slice(payload);
    apply_mask(&mut body, mask_key);

    dst.put_slice(&mask_key);
    dst.put_slice(&body);
    Ok(dst)
}

/// Apply XOR masking to payload data.
///
/// The transform is its own inverse, so it serves both masking and
/// unmasking. Applied in place.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Generate a per-frame masking key.
///
/// RFC 6455 §5.3 requires masking keys to be unpredictable to attackers, so
/// they come from the OS RNG rather than a seeded PRNG.
fn generate_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    getrandom::fill(&mut key).expect("OS RNG unavailable");
    key
}
