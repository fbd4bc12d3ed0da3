//! Reassembles complete frames from an arbitrarily chunked byte stream.
//!
//! # Why a reassembler is needed (for beginners)
//!
//! TCP is a *stream* protocol.  A single `read()` may return half a frame,
//! exactly one frame, several frames glued together, or (on a noisy serial
//! bridge) a few stray bytes in front of the next frame.  The
//! [`StreamReassembler`] keeps whatever has not been consumed yet in an
//! internal buffer and hands out frames as soon as they are complete.
//!
//! # Resynchronisation
//!
//! Bytes in front of a start marker can never belong to a frame and are
//! dropped.  When a start marker is followed by bytes that cannot form a frame
//! (wrong end marker, zone 0) the marker itself is dropped and scanning
//! resumes at the next byte.  Both cases are logged as warnings and counted,
//! but never reported as errors: the stream recovers on its own.

use std::marker::PhantomData;

use tracing::warn;

use crate::protocol::codec::{decode_request, decode_response, ProtocolError};
use crate::protocol::packet::{
    Direction, RequestPacket, ResponsePacket, MAX_FRAME_LEN, START_MARKER,
};

/// Default bound on buffered bytes that have not produced a frame.
pub const DEFAULT_MAX_BUFFER: usize = 4 * MAX_FRAME_LEN;

/// A packet type that can be cut out of a byte stream.
pub trait Frame: Sized {
    /// Which way frames of this type travel.
    const DIRECTION: Direction;

    /// Decodes one frame from the start of `bytes`, returning it with the
    /// number of bytes consumed.
    fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError>;
}

impl Frame for RequestPacket {
    const DIRECTION: Direction = Direction::Request;

    fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        decode_request(bytes)
    }
}

impl Frame for ResponsePacket {
    const DIRECTION: Direction = Direction::Response;

    fn decode(bytes: &[u8]) -> Result<(Self, usize), ProtocolError> {
        decode_response(bytes)
    }
}

/// Accumulates bytes across reads and yields complete frames of type `F`.
///
/// # Examples
///
/// ```rust
/// use arcam_core::{ResponsePacket, StreamReassembler};
///
/// let mut reassembler = StreamReassembler::<ResponsePacket>::new();
/// assert_eq!(reassembler.feed(&[0x21, 0x01, 0x0D]).count(), 0);
/// let frames: Vec<_> = reassembler.feed(&[0x00, 0x01, 0x32, 0x0D]).collect();
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].as_ref().unwrap().data, vec![0x32]);
/// ```
#[derive(Debug)]
pub struct StreamReassembler<F> {
    buffer: Vec<u8>,
    max_buffer: usize,
    discarded: u64,
    _frame: PhantomData<fn() -> F>,
}

impl<F: Frame> Default for StreamReassembler<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Frame> StreamReassembler<F> {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER)
    }

    /// Creates a reassembler that reports [`ProtocolError::BufferOverflow`]
    /// once more than `max_buffer` undecodable bytes are held.
    ///
    /// Bytes before a start marker are dropped as soon as they arrive, and a
    /// buffer that begins with a marker either decodes or resynchronises
    /// within [`MAX_FRAME_LEN`] bytes.  The bound can therefore only trip
    /// when `max_buffer` is below [`MAX_FRAME_LEN`]; with
    /// [`DEFAULT_MAX_BUFFER`] garbage alone never overflows.
    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
            max_buffer,
            discarded: 0,
            _frame: PhantomData,
        }
    }

    /// Appends `chunk` and returns an iterator over the frames that are now
    /// complete.
    ///
    /// The iterator is lazy: frames are cut out of the buffer as it is
    /// advanced.  Anything it does not consume stays buffered for the next
    /// call.  After yielding a [`ProtocolError::BufferOverflow`] it stops and
    /// the buffer is cleared.
    pub fn feed(&mut self, chunk: &[u8]) -> Frames<'_, F> {
        self.buffer.extend_from_slice(chunk);
        Frames {
            reassembler: self,
            finished: false,
        }
    }

    /// Bytes currently held waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes thrown away while resynchronising.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn next_frame(&mut self) -> Option<Result<F, ProtocolError>> {
        loop {
            if self.buffer.is_empty() {
                return None;
            }

            match self.buffer.iter().position(|&b| b == START_MARKER) {
                None => {
                    let n = self.buffer.len();
                    self.discard(n, "no start marker in buffer");
                    return None;
                }
                Some(0) => {}
                Some(pos) => {
                    self.discard(pos, "bytes before start marker");
                    continue;
                }
            }

            match F::decode(&self.buffer) {
                Ok((frame, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Some(Ok(frame));
                }
                Err(e) if e.is_incomplete() => {
                    if self.buffer.len() > self.max_buffer {
                        let err = ProtocolError::BufferOverflow {
                            buffered: self.buffer.len(),
                            limit: self.max_buffer,
                        };
                        self.buffer.clear();
                        return Some(Err(err));
                    }
                    return None;
                }
                Err(e) => {
                    warn!(direction = ?F::DIRECTION, "stream desynchronised: {e}");
                    self.discard(1, "undecodable frame start");
                }
            }
        }
    }

    fn discard(&mut self, n: usize, reason: &str) {
        warn!(bytes = n, direction = ?F::DIRECTION, "discarding {reason}");
        self.buffer.drain(..n);
        self.discarded += n as u64;
    }
}

/// Iterator returned by [`StreamReassembler::feed`].
pub struct Frames<'a, F: Frame> {
    reassembler: &'a mut StreamReassembler<F>,
    finished: bool,
}

impl<F: Frame> Iterator for Frames<'_, F> {
    type Item = Result<F, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.reassembler.next_frame();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
