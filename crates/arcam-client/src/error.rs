//! Request-level error type shared by the session and the dispatch facade.

use arcam_core::{AnswerCode, ProtocolError, RequestKey, ResponsePacket};
use thiserror::Error;

/// Everything that can go wrong between "send this command" and "here is the
/// payload".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The request could not be turned into bytes (payload over 255 bytes).
    #[error("could not encode request: {0}")]
    Encode(#[source] ProtocolError),

    /// The inbound stream could not be recovered; the session is closed.
    #[error("unrecoverable protocol error: {0}")]
    ProtocolFatal(#[source] ProtocolError),

    /// The device answered with a code outside the documented set.  The full
    /// response is kept so zone, command and payload remain readable.
    #[error("unknown answer code 0x{code:02X} for {}", .response.key())]
    UnknownStatusCode { code: u8, response: ResponsePacket },

    /// No matching response arrived before the deadline.
    #[error("timed out waiting for a response to {key}")]
    Timeout { key: RequestKey },

    /// The connection closed (or was never open) while the request was live.
    #[error("connection closed")]
    ConnectionClosed,

    /// Another request with the same zone and command is already in flight.
    #[error("a request for {key} is already in flight")]
    DuplicateInFlight { key: RequestKey },

    /// The device understood the frame but refused it.
    #[error("device rejected {}: {answer}", .response.key())]
    Rejected {
        answer: AnswerCode,
        response: ResponsePacket,
    },

    /// The command only exists in zone 1.
    #[error("{} is not available in {}", .key.command, .key.zone)]
    UnsupportedZone { key: RequestKey },

    /// A successful answer whose payload does not fit the command.
    #[error("unexpected payload {data:02X?} for {key}")]
    UnexpectedPayload { key: RequestKey, data: Vec<u8> },

    /// Connecting or writing failed at the socket level.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ClientError {
    /// `true` for failures where sending the same request again may succeed.
    ///
    /// Only [`ClientError::Timeout`] qualifies: a closed connection needs a new
    /// session, and every other variant would fail identically on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. })
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
