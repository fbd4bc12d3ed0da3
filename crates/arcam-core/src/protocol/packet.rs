//! Packet types and framing constants for the Arcam control protocol.
//!
//! Two packet shapes exist on the wire.  The controller sends
//! [`RequestPacket`]s and the receiver answers with [`ResponsePacket`]s.  The
//! receiver may also push responses on its own (for example when someone turns
//! the volume knob), which is why a response is never assumed to belong to
//! the most recent request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::protocol::codes::{AnswerCode, CommandCode};

// ── Framing constants ─────────────────────────────────────────────────────────

/// First byte of every frame (`!`).
pub const START_MARKER: u8 = 0x21;

/// Last byte of every frame (carriage return).
pub const END_MARKER: u8 = 0x0D;

/// The data length is carried in a single byte.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// `[start][zone][command][len]`
pub const REQUEST_HEADER_LEN: usize = 4;

/// `[start][zone][command][answer][len]`
pub const RESPONSE_HEADER_LEN: usize = 5;

/// Size of the largest legal frame in either direction.
pub const MAX_FRAME_LEN: usize = RESPONSE_HEADER_LEN + MAX_PAYLOAD_LEN + 1;

/// Payload byte that turns most "set" commands into "report current value".
pub const QUERY: u8 = 0xF0;

// ── Zone ──────────────────────────────────────────────────────────────────────

/// An independently controllable output of the receiver.
///
/// Zone 1 is the main room; zone 2 is the secondary output found on
/// multi-zone models.  Zone `0` is never valid on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Zone(u8);

impl Zone {
    /// The main zone.
    pub const MAIN: Zone = Zone(1);
    /// The second zone of multi-zone receivers.
    pub const ZONE_2: Zone = Zone(2);

    /// Returns `None` for zone 0.
    pub const fn new(number: u8) -> Option<Zone> {
        if number == 0 {
            None
        } else {
            Some(Zone(number))
        }
    }

    /// The zone number as it appears on the wire.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Zone {
    fn default() -> Self {
        Zone::MAIN
    }
}

impl TryFrom<u8> for Zone {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Zone::new(value).ok_or(ProtocolError::InvalidZone(value))
    }
}

impl From<Zone> for u8 {
    fn from(zone: Zone) -> Self {
        zone.0
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}", self.0)
    }
}

// ── Direction and correlation key ─────────────────────────────────────────────

/// Which way a frame travels.  Only responses carry an answer code byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// The only information available to correlate a response with the request
/// that caused it.  The protocol has no sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub zone: Zone,
    pub command: CommandCode,
}

impl RequestKey {
    pub const fn new(zone: Zone, command: CommandCode) -> Self {
        Self { zone, command }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.zone, self.command)
    }
}

// ── Packets ───────────────────────────────────────────────────────────────────

/// A command sent from the controller to the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub zone: Zone,
    pub command: CommandCode,
    pub data: Vec<u8>,
}

impl RequestPacket {
    pub fn new(zone: Zone, command: CommandCode, data: impl Into<Vec<u8>>) -> Self {
        Self {
            zone,
            command,
            data: data.into(),
        }
    }

    /// A "report current value" request (`data = [0xF0]`).
    pub fn query(zone: Zone, command: CommandCode) -> Self {
        Self::new(zone, command, vec![QUERY])
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.zone, self.command)
    }
}

/// An answer (or unsolicited status push) from the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub zone: Zone,
    pub command: CommandCode,
    pub answer: AnswerCode,
    pub data: Vec<u8>,
}

impl ResponsePacket {
    pub fn new(zone: Zone, command: CommandCode, answer: AnswerCode, data: impl Into<Vec<u8>>) -> Self {
        Self {
            zone,
            command,
            answer,
            data: data.into(),
        }
    }

    /// A successful answer carrying `data`.
    pub fn status_update(zone: Zone, command: CommandCode, data: impl Into<Vec<u8>>) -> Self {
        Self::new(zone, command, AnswerCode::StatusUpdate, data)
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.zone, self.command)
    }

    /// Whether this packet answers `request` (same zone and command code).
    pub fn responds_to(&self, request: &RequestPacket) -> bool {
        self.key() == request.key()
    }

    /// Returns the answer code, or [`ProtocolError::UnknownStatusCode`] if the
    /// device sent a code outside the documented set.
    ///
    /// The packet itself stays intact either way.
    pub fn checked_answer(&self) -> Result<AnswerCode, ProtocolError> {
        match self.answer {
            AnswerCode::Unknown(code) => Err(ProtocolError::UnknownStatusCode(code)),
            known => Ok(known),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
