//! Delimiter framing for both device channels.
//!
//! Bytes are accumulated until a delimiter is seen. Everything before the last
//! delimiter is returned as complete frames in arrival order; the tail stays
//! buffered until more bytes arrive. Frames are split on raw bytes, so a
//! delimiter or a multi-byte UTF-8 character torn across two reads is handled
//! the same as one that arrived whole.

/// Primary channel delimiter
pub const CRLF: &[u8] = b"\r\n";

/// Telnet channel delimiter
pub const CR: &[u8] = b"\r";

/// Split `buffer` into complete frames and the unconsumed remainder.
pub fn split_frames(mut buffer: Vec<u8>, delimiter: &[u8]) -> (Vec<String>, Vec<u8>) {
    let mut frames = Vec::new();
    if delimiter.is_empty() {
        return (frames, buffer);
    }

    let mut start = 0;
    while let Some(pos) = find(&buffer[start..], delimiter) {
        let end = start + pos;
        frames.push(String::from_utf8_lossy(&buffer[start..end]).into_owned());
        start = end + delimiter.len();
    }

    buffer.drain(..start);
    (frames, buffer)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Incremental frame decoder holding the partial tail between reads
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    delimiter: &'static [u8],
}

impl FrameDecoder {
    /// Create a decoder for the given delimiter
    pub fn new(delimiter: &'static [u8]) -> Self {
        Self {
            buffer: Vec::new(),
            delimiter,
        }
    }

    /// Decoder for the CRLF-framed JSON channel
    pub fn crlf() -> Self {
        Self::new(CRLF)
    }

    /// Decoder for the CR-framed telnet channel
    pub fn cr() -> Self {
        Self::new(CR)
    }

    /// Append newly read bytes and return every frame they completed
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(bytes);
        let (frames, rest) = split_frames(buffer, self.delimiter);
        self.buffer = rest;
        frames
    }

    /// Bytes received after the last delimiter
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any buffered partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
