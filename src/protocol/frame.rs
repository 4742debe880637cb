//! Carriage-return framing of the raw instrument byte stream.
//!
//! The EGM-4 terminates every record with `\r`. Serial reads arrive in arbitrary
//! fragments, so the splitter keeps the undelimited tail between calls and only
//! decodes a frame to text once it is complete. Decoding per frame (rather than per
//! chunk) keeps multi-byte sequences intact when a read boundary falls inside one.

use serde::{Deserialize, Serialize};

/// Frame delimiter used by the instrument.
pub const FRAME_DELIMITER: u8 = b'\r';

/// Default upper bound on a single frame before it is force-split.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// One delimiter-terminated unit of the wire protocol, without the delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    text: String,
    oversized: bool,
}

impl RawFrame {
    /// Create a frame from already-decoded text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            oversized: false,
        }
    }

    /// Frame text with invalid UTF-8 replaced by U+FFFD.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True when the frame was cut at the length limit instead of at a delimiter.
    pub fn is_oversized(&self) -> bool {
        self.oversized
    }

    /// Consume the frame, returning its text.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl AsRef<str> for RawFrame {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

/// Accumulates transport chunks and splits them into [`RawFrame`]s.
///
/// Output depends only on the concatenated byte stream, never on how it was
/// fragmented. Empty frames (consecutive delimiters) are skipped.
#[derive(Debug)]
pub struct FrameSplitter {
    pending: Vec<u8>,
    max_frame_len: usize,
    oversized_frames: u64,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSplitter {
    /// Create a splitter with the default frame length limit.
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Create a splitter that force-splits frames longer than `max_frame_len` bytes.
    ///
    /// The cut depends only on the bytes seen so far, so chunking invariance still
    /// holds for delimiter-free line noise. It moves back to the start of a multi-byte
    /// character that the limit would otherwise cut in two.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        let max_frame_len = max_frame_len.max(1);
        Self {
            pending: Vec::with_capacity(max_frame_len.min(1024)),
            max_frame_len,
            oversized_frames: 0,
        }
    }

    /// Feed one chunk and return every frame it completes, in arrival order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        let mut frames = Vec::new();

        for &byte in chunk {
            if byte == FRAME_DELIMITER {
                if let Some(frame) = self.take_pending(false) {
                    frames.push(frame);
                }
                continue;
            }

            self.pending.push(byte);
            if self.pending.len() >= self.max_frame_len {
                self.oversized_frames += 1;
                tracing::debug!(
                    limit = self.max_frame_len,
                    "frame exceeded length limit without delimiter; splitting"
                );
                let cut = self.char_boundary();
                if let Some(frame) = self.take_prefix(cut, true) {
                    frames.push(frame);
                }
            }
        }

        frames
    }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Number of buffered bytes not yet terminated by a delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Count of frames cut at the length limit since construction.
    pub fn oversized_frames(&self) -> u64 {
        self.oversized_frames
    }

    fn take_pending(&mut self, oversized: bool) -> Option<RawFrame> {
        self.take_prefix(self.pending.len(), oversized)
    }

    fn take_prefix(&mut self, len: usize, oversized: bool) -> Option<RawFrame> {
        if len == 0 {
            return None;
        }
        let bytes: Vec<u8> = self.pending.drain(..len).collect();
        Some(RawFrame {
            text: String::from_utf8_lossy(&bytes).into_owned(),
            oversized,
        })
    }

    /// Length of the pending prefix that does not end inside a UTF-8 sequence.
    ///
    /// An incomplete trailing sequence stays pending for the next frame. Invalid bytes
    /// and sequences starting at offset 0 are cut where they are.
    fn char_boundary(&self) -> usize {
        let len = self.pending.len();
        for back in 1..=len.min(3) {
            let start = len - back;
            let byte = self.pending[start];
            if byte & 0xC0 == 0x80 {
                continue;
            }
            let needed = match byte {
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => 1,
            };
            return if back < needed && start > 0 { start } else { len };
        }
        len
    }
}
