//! Frame splitting and sample decoding for the `key: value` text protocol.
//!
//! A device frame is a run of text blocks terminated by a token, e.g.
//!
//! ```text
//! X: 1.0\r\nY: 2.0\r\nAUX1: 0.1\r\nAUX2: 0.2\r\ntxend
//! ```
//!
//! [`FrameSplitter`] cuts the raw byte stream into frames and [`SampleParser`]
//! turns one frame into a [`Sample`]. Malformed input is rejected with `None`,
//! never with an error; the caller decides whether to log it.

use crate::core::Sample;

/// Blocks of this length or shorter are line noise.
const NOISE_BLOCK_LEN: usize = 3;

/// Number of numeric fields in a valid frame: x, y and two auxiliary values.
const FRAME_FIELDS: usize = 4;

/// Marker separating a field name from its value.
const VALUE_MARKER: &str = ": ";

/// Accumulated bytes without a terminator are dropped past this size.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Decodes frames of the `key: value` protocol.
#[derive(Debug, Clone)]
pub struct SampleParser {
    terminator: String,
}

impl SampleParser {
    /// Creates a parser for frames ending in `terminator`.
    pub fn new(terminator: impl Into<String>) -> Self {
        Self {
            terminator: terminator.into(),
        }
    }

    /// Frame terminator token.
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Decodes one frame, returning `None` for anything that is not exactly
    /// four numeric fields.
    pub fn parse(&self, frame: &[u8]) -> Option<Sample> {
        let text = std::str::from_utf8(frame).ok()?;
        let text = text.replace(self.terminator.as_str(), "");

        let values = text
            .split('\n')
            .map(|block| block.trim_end_matches('\r'))
            .filter(|block| block.len() > NOISE_BLOCK_LEN)
            .map(parse_block)
            .collect::<Option<Vec<f64>>>()?;

        if values.len() != FRAME_FIELDS {
            return None;
        }
        Some(Sample::new(values[0], values[1], values[2..].to_vec()))
    }
}

fn parse_block(block: &str) -> Option<f64> {
    let (_, rest) = block.split_once(VALUE_MARKER)?;
    // Only the text up to a second marker belongs to this value.
    let value = rest.split(VALUE_MARKER).next()?;
    value.trim().parse::<f64>().ok()
}

/// Cuts a byte stream into terminator-delimited frames.
#[derive(Debug, Clone)]
pub struct FrameSplitter {
    terminator: Vec<u8>,
    pending: Vec<u8>,
}

impl FrameSplitter {
    /// Creates a splitter for frames ending in `terminator`.
    pub fn new(terminator: &str) -> Self {
        Self {
            terminator: terminator.as_bytes().to_vec(),
            pending: Vec::new(),
        }
    }

    /// Appends raw bytes read from the device.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING_BYTES && self.find_terminator().is_none() {
            self.pending.clear();
        }
    }

    /// Removes and returns the next complete frame, terminator included.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.find_terminator()? + self.terminator.len();
        Some(self.pending.drain(..end).collect())
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn find_terminator(&self) -> Option<usize> {
        if self.terminator.is_empty() || self.pending.len() < self.terminator.len() {
            return None;
        }
        self.pending
            .windows(self.terminator.len())
            .position(|window| window == self.terminator.as_slice())
    }
}
