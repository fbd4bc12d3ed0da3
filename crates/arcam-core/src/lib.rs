//! # arcam-core
//!
//! Shared protocol library for talking to Arcam AV receivers over their
//! binary TCP control protocol.
//!
//! This crate is pure: it has no dependencies on sockets, async runtimes or
//! clocks.  Everything here can be exercised with plain byte slices.
//!
//! # Architecture overview (for beginners)
//!
//! An Arcam receiver listens on TCP port 50000.  Every command and every
//! answer travels as a small *frame*:
//!
//! ```text
//! request:  [0x21][zone][command][len][data: len bytes][0x0D]
//! response: [0x21][zone][command][answer][len][data: len bytes][0x0D]
//! ```
//!
//! This crate defines:
//!
//! - **`protocol::packet`** – the typed packets (`RequestPacket`,
//!   `ResponsePacket`), the `Zone` newtype and the framing constants.
//!
//! - **`protocol::codes`** – vendor code tables: command codes (with their
//!   zone/send-only flags), answer codes and input source codes.
//!
//! - **`protocol::codec`** – pure encode/decode of single frames.
//!
//! - **`protocol::reassembler`** – turns an arbitrary stream of TCP chunks
//!   back into complete frames, resynchronising after garbage.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `arcam_core::RequestPacket` instead of `arcam_core::protocol::packet::RequestPacket`.
pub use protocol::codec::{
    decode_request, decode_response, encode_request, encode_response, ProtocolError,
};
pub use protocol::codes::{AnswerCode, CommandCode, CommandFlags, SourceCode};
pub use protocol::packet::{Direction, RequestKey, RequestPacket, ResponsePacket, Zone, QUERY};
pub use protocol::reassembler::{Frame, StreamReassembler};
