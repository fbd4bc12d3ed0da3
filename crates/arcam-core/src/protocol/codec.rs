//! Binary codec for encoding and decoding Arcam protocol frames.
//!
//! Wire format:
//! ```text
//! request:  [0x21][zone:1][command:1][len:1][data:len][0x0D]
//! response: [0x21][zone:1][command:1][answer:1][len:1][data:len][0x0D]
//! ```
//!
//! The codec is stateless.  Decoding always starts at the first byte of the
//! slice, which must be a start marker; locating that marker inside a stream is
//! the job of [`crate::protocol::reassembler::StreamReassembler`].

use thiserror::Error;

use crate::protocol::codes::{AnswerCode, CommandCode};
use crate::protocol::packet::{
    RequestPacket, ResponsePacket, Zone, END_MARKER, MAX_PAYLOAD_LEN, REQUEST_HEADER_LEN,
    RESPONSE_HEADER_LEN, START_MARKER,
};

/// Errors that can occur during frame encoding, decoding or reassembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The slice is a valid frame prefix but the frame is not complete yet.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The first byte is not the start marker.
    #[error("expected start marker 0x21, found 0x{0:02X}")]
    MissingStartMarker(u8),

    /// The byte where the length field says the frame ends is not the end marker.
    #[error("expected end marker 0x0D at offset {offset}, found 0x{found:02X}")]
    MissingEndMarker { offset: usize, found: u8 },

    /// Zone 0 appeared where a zone number was expected.
    #[error("invalid zone number {0}")]
    InvalidZone(u8),

    /// The payload cannot be described by the single length byte.
    #[error("payload of {0} bytes exceeds the 255 byte limit")]
    PayloadTooLarge(usize),

    /// A response carried an answer code outside the documented set.
    #[error("unknown answer code 0x{0:02X}")]
    UnknownStatusCode(u8),

    /// The reassembly buffer grew past its bound without yielding a frame.
    #[error("reassembly buffer holds {buffered} bytes, limit is {limit}")]
    BufferOverflow { buffered: usize, limit: usize },
}

impl ProtocolError {
    /// `true` when more bytes may turn the input into a valid frame.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::InsufficientData { .. })
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a request frame.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `data` exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use arcam_core::{encode_request, CommandCode, RequestPacket, Zone};
///
/// let bytes = encode_request(&RequestPacket::query(Zone::MAIN, CommandCode::VOLUME)).unwrap();
/// assert_eq!(bytes, vec![0x21, 0x01, 0x0D, 0x01, 0xF0, 0x0D]);
/// ```
pub fn encode_request(packet: &RequestPacket) -> Result<Vec<u8>, ProtocolError> {
    let len = payload_len(&packet.data)?;
    let mut buf = Vec::with_capacity(REQUEST_HEADER_LEN + packet.data.len() + 1);
    buf.push(START_MARKER);
    buf.push(packet.zone.get());
    buf.push(packet.command.0);
    buf.push(len);
    buf.extend_from_slice(&packet.data);
    buf.push(END_MARKER);
    Ok(buf)
}

/// Encodes a response frame, as a receiver would send it.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if `data` exceeds 255 bytes.
pub fn encode_response(packet: &ResponsePacket) -> Result<Vec<u8>, ProtocolError> {
    let len = payload_len(&packet.data)?;
    let mut buf = Vec::with_capacity(RESPONSE_HEADER_LEN + packet.data.len() + 1);
    buf.push(START_MARKER);
    buf.push(packet.zone.get());
    buf.push(packet.command.0);
    buf.push(packet.answer.as_u8());
    buf.push(len);
    buf.extend_from_slice(&packet.data);
    buf.push(END_MARKER);
    Ok(buf)
}

/// Decodes one response frame from the beginning of `bytes`.
///
/// Returns the packet and the number of bytes it occupied.  An unknown answer
/// code does not fail decoding; it is kept as [`AnswerCode::Unknown`] and can
/// be surfaced with [`ResponsePacket::checked_answer`].
///
/// # Errors
///
/// - [`ProtocolError::InsufficientData`] if the frame is incomplete so far.
/// - [`ProtocolError::MissingStartMarker`], [`ProtocolError::MissingEndMarker`]
///   or [`ProtocolError::InvalidZone`] if the bytes cannot be a frame.
///
/// # Examples
///
/// ```rust
/// use arcam_core::{decode_response, AnswerCode, CommandCode, Zone};
///
/// let (pkt, used) = decode_response(&[0x21, 0x01, 0x0D, 0x00, 0x01, 0x32, 0x0D]).unwrap();
/// assert_eq!(pkt.zone, Zone::MAIN);
/// assert_eq!(pkt.command, CommandCode::VOLUME);
/// assert_eq!(pkt.answer, AnswerCode::StatusUpdate);
/// assert_eq!(pkt.data, vec![50]);
/// assert_eq!(used, 7);
/// ```
pub fn decode_response(bytes: &[u8]) -> Result<(ResponsePacket, usize), ProtocolError> {
    let raw = decode_frame(bytes, RESPONSE_HEADER_LEN)?;
    let packet = ResponsePacket {
        zone: raw.zone,
        command: raw.command,
        answer: AnswerCode::from(bytes[3]),
        data: raw.data.to_vec(),
    };
    Ok((packet, raw.consumed))
}

/// Decodes one request frame from the beginning of `bytes`.
///
/// # Errors
///
/// Same conditions as [`decode_response`].
pub fn decode_request(bytes: &[u8]) -> Result<(RequestPacket, usize), ProtocolError> {
    let raw = decode_frame(bytes, REQUEST_HEADER_LEN)?;
    let packet = RequestPacket {
        zone: raw.zone,
        command: raw.command,
        data: raw.data.to_vec(),
    };
    Ok((packet, raw.consumed))
}

// ── Shared framing ────────────────────────────────────────────────────────────

struct RawFrame<'a> {
    zone: Zone,
    command: CommandCode,
    data: &'a [u8],
    consumed: usize,
}

fn payload_len(data: &[u8]) -> Result<u8, ProtocolError> {
    if data.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    Ok(data.len() as u8)
}

/// Validates the framing shared by both directions.  The length byte is the
/// last header byte in both layouts.
fn decode_frame(bytes: &[u8], header_len: usize) -> Result<RawFrame<'_>, ProtocolError> {
    let Some(&first) = bytes.first() else {
        return Err(ProtocolError::InsufficientData {
            needed: header_len,
            available: 0,
        });
    };
    if first != START_MARKER {
        return Err(ProtocolError::MissingStartMarker(first));
    }

    // Reject zone 0 as soon as it is visible so a stray marker does not
    // hold up the stream waiting for a length that will never make sense.
    if let Some(&zone) = bytes.get(1) {
        if zone == 0 {
            return Err(ProtocolError::InvalidZone(zone));
        }
    }

    if bytes.len() < header_len {
        return Err(ProtocolError::InsufficientData {
            needed: header_len,
            available: bytes.len(),
        });
    }

    let data_len = bytes[header_len - 1] as usize;
    let end_offset = header_len + data_len;
    let total = end_offset + 1;
    if bytes.len() < total {
        return Err(ProtocolError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    if bytes[end_offset] != END_MARKER {
        return Err(ProtocolError::MissingEndMarker {
            offset: end_offset,
            found: bytes[end_offset],
        });
    }

    Ok(RawFrame {
        zone: Zone::try_from(bytes[1])?,
        command: CommandCode(bytes[2]),
        data: &bytes[header_len..end_offset],
        consumed: total,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
