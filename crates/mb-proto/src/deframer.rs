//! Frame recovery from an arbitrarily-chunked byte stream.
//!
//! TCP delivers the Modbus byte stream in whatever chunks the network
//! produced, so a reader may hold half a frame, or two frames and a half.
//! The deframer buffers input and emits each complete frame exactly once,
//! in arrival order.
//!
//! Modbus TCP has no sync word, so a corrupt length field cannot be
//! recovered by scanning: when the MBAP length claims more than 254 bytes
//! (a frame beyond 260 bytes total) the whole buffer is discarded and the
//! stream resynchronizes on the next chunk.

use tracing::warn;

use crate::codec;
use crate::frame::MbapHeader;

/// Largest value the MBAP length field can legally carry (253-byte PDU
/// plus the unit id).
const MAX_MBAP_LENGTH: u16 = 254;

/// Stream reassembler for Modbus TCP frames.
#[derive(Debug, Default)]
pub struct Deframer {
    buf: Vec<u8>,
    discards: u64,
}

impl Deframer {
    /// Create an empty deframer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered bytes not yet forming a complete frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// How many times the buffer has been discarded for an impossible
    /// length field.
    #[must_use]
    pub fn discards(&self) -> u64 {
        self.discards
    }

    /// Feed one chunk and invoke `on_frame` for every complete frame.
    ///
    /// Frames are never fragmented or merged; trailing bytes stay buffered
    /// for the next call. A length field above 254 discards the buffer
    /// (including the rest of this chunk) without emitting anything.
    pub fn feed<F>(&mut self, chunk: &[u8], mut on_frame: F)
    where
        F: FnMut(&[u8]),
    {
        self.buf.extend_from_slice(chunk);
        loop {
            if self.buf.len() < MbapHeader::SIZE {
                return;
            }
            // length field lives at MBAP bytes 4..6
            let claimed = codec::read_u16(&self.buf, 4).unwrap_or(0);
            if claimed > MAX_MBAP_LENGTH {
                warn!(
                    claimed,
                    buffered = self.buf.len(),
                    "impossible MBAP length, discarding buffer"
                );
                self.buf.clear();
                self.discards += 1;
                return;
            }
            let total = claimed as usize + 6;
            if self.buf.len() < total {
                return;
            }
            on_frame(&self.buf[..total]);
            self.buf.drain(..total);
        }
    }
}
