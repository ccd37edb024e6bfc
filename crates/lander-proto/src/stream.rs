use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::msp::{self, Frame, FrameError, PREAMBLE};

/// Bytes kept while waiting for the rest of a frame. Anything beyond this is line noise.
const MAX_BUFFERED: usize = 4 * (msp::MAX_PAYLOAD + msp::OVERHEAD);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeStats {
    pub frames: u64,
    pub errors: u64,
    pub skipped_bytes: u64,
}

/// Incremental MSP reader. Feed raw serial bytes, pull decoded frames.
///
/// A malformed frame costs exactly one byte: the decoder drops the leading `$`
/// and rescans, so a corrupted frame never takes a valid one after it down too.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: BytesMut,
    stats: DecodeStats,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_BUFFERED {
            let excess = self.buf.len() - MAX_BUFFERED;
            self.buf.advance(excess);
            self.stats.skipped_bytes += excess as u64;
        }
    }

    /// Next result from the buffer, or `None` if more bytes are needed.
    ///
    /// Errors are returned so the caller can count them; the offending byte is
    /// already discarded when this returns.
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        self.sync_to_preamble();
        if self.buf.len() < msp::HEADER_LEN {
            return None;
        }

        let total = match msp::frame_len(&self.buf) {
            Ok(n) => n,
            Err(e) => return Some(Err(self.discard_one(e))),
        };
        if self.buf.len() < total {
            return None;
        }

        match msp::decode(&self.buf[..total]) {
            Ok(frame) => {
                self.buf.advance(total);
                self.stats.frames += 1;
                Some(Ok(frame))
            }
            // A well-formed rejection or unknown function still consumed a whole frame.
            Err(e @ (FrameError::Rejected(_) | FrameError::UnknownCommand(_))) => {
                self.buf.advance(total);
                self.stats.errors += 1;
                Some(Err(e))
            }
            Err(e) => Some(Err(self.discard_one(e))),
        }
    }

    fn discard_one(&mut self, e: FrameError) -> FrameError {
        trace!("msp stream: resync after {}", e);
        self.buf.advance(1);
        self.stats.errors += 1;
        self.stats.skipped_bytes += 1;
        e
    }

    fn sync_to_preamble(&mut self) {
        let start = self
            .buf
            .windows(2)
            .position(|w| w == PREAMBLE)
            .unwrap_or_else(|| {
                // Keep a trailing '$' that may be the first half of a preamble.
                if self.buf.last() == Some(&PREAMBLE[0]) { self.buf.len() - 1 } else { self.buf.len() }
            });
        if start > 0 {
            self.buf.advance(start);
            self.stats.skipped_bytes += start as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msp::{encode, Command};

    fn drain(d: &mut StreamDecoder) -> (Vec<Frame>, usize) {
        let mut frames = Vec::new();
        let mut errors = 0;
        while let Some(r) = d.next_frame() {
            match r {
                Ok(f) => frames.push(f),
                Err(_) => errors += 1,
            }
        }
        (frames, errors)
    }

    #[test]
    fn frames_split_across_pushes_are_reassembled() {
        let bytes = encode(Command::Altitude, &[1, 2, 3, 4]).unwrap();
        let mut d = StreamDecoder::new();
        for b in &bytes {
            assert!(d.next_frame().is_none());
            d.push(&[*b]);
        }
        let (frames, errors) = drain(&mut d);
        assert_eq!(frames.len(), 1);
        assert_eq!(errors, 0);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn resyncs_after_garbage_and_corruption() {
        let mut bad = encode(Command::Status, &[9; 11]).unwrap();
        let last = bad.len() - 1;
        bad[last] ^= 0xff;

        let mut d = StreamDecoder::new();
        d.push(b"noise$$X");
        d.push(&bad);
        d.push(&encode(Command::Altitude, &[0x10, 0x27, 0, 0]).unwrap());

        let (frames, errors) = drain(&mut d);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, Command::Altitude);
        assert!(errors >= 1);
        assert_eq!(d.buffered(), 0);
    }

    #[test]
    fn buffer_stays_bounded() {
        let mut d = StreamDecoder::new();
        for _ in 0..100 {
            d.push(&[0u8; 1000]);
            let _ = drain(&mut d);
        }
        assert!(d.buffered() <= MAX_BUFFERED);
        assert!(d.stats().skipped_bytes > 0);
    }
}
