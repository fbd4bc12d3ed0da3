//! Protocol module containing packet types, code tables, the frame codec and
//! the stream reassembler.

pub mod codec;
pub mod codes;
pub mod packet;
pub mod reassembler;

pub use codec::{decode_request, decode_response, encode_request, encode_response, ProtocolError};
pub use codes::{AnswerCode, CommandCode, CommandFlags, SourceCode};
pub use packet::*;
pub use reassembler::{Frame, StreamReassembler};
