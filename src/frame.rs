//! Frame assembly for the fixture wire protocol.
//!
//! Fixtures stream UTF-8 XML documents back-to-back over TCP with no length
//! prefix or checksum; the only message boundary is the literal closing tag
//! `</TestResult>`. Each connection owns one `FrameAssembler` that
//! accumulates raw bytes and yields complete messages as they become
//! extractable, regardless of how the stream was split across reads.

use std::fmt;

/// Closing tag that terminates one complete message.
pub const END_MARKER: &[u8] = b"</TestResult>";

/// A valid message starts with an XML declaration.
pub const START_MARKER: &[u8] = b"<?xml";

/// Default cap on bytes held for a connection that has not yet produced a
/// complete message (64MB). A fixture that never sends a closing tag would
/// otherwise grow the buffer without bound.
pub const DEFAULT_MAX_PENDING: usize = 64 * 1024 * 1024;

/// The pending buffer exceeded its cap with no end marker in sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOverflow {
    pub pending: usize,
    pub max: usize,
}

impl fmt::Display for PendingOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pending buffer overflow: {} bytes unterminated (max: {})",
            self.pending, self.max
        )
    }
}

impl std::error::Error for PendingOverflow {}

/// Per-connection accumulator that turns an arbitrarily chunked byte stream
/// into complete `<?xml ...</TestResult>` messages.
pub struct FrameAssembler {
    pending: Vec<u8>,
    max_pending: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING)
    }

    pub fn with_max_pending(max_pending: usize) -> Self {
        FrameAssembler {
            pending: Vec::new(),
            max_pending,
        }
    }

    /// Append one inbound chunk. Fails only when the buffer has outgrown the
    /// cap while containing no end marker at all; callers should treat that
    /// as fatal for the connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), PendingOverflow> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > self.max_pending && find(&self.pending, END_MARKER).is_none() {
            return Err(PendingOverflow {
                pending: self.pending.len(),
                max: self.max_pending,
            });
        }
        Ok(())
    }

    /// Lazily drain every currently complete message, in stream order. The
    /// iterator is finite per call; feeding more bytes and calling this again
    /// resumes where extraction left off.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { assembler: self }
    }

    /// Bytes buffered but not yet resolved into a complete message.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Extract the next complete message, discarding malformed candidates.
    ///
    /// Scan rule: split the buffer at the end of the first `</TestResult>`;
    /// the message starts at the first `<?xml` within that candidate (any
    /// earlier garbage or whitespace is consumed with the candidate). A
    /// candidate without an XML declaration is dropped without notification.
    fn extract(&mut self) -> Option<String> {
        loop {
            let end = find(&self.pending, END_MARKER)? + END_MARKER.len();
            let candidate: Vec<u8> = self.pending.drain(..end).collect();
            if let Some(start) = find(&candidate, START_MARKER) {
                return Some(String::from_utf8_lossy(&candidate[start..]).into_owned());
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Draining iterator over complete messages; see [`FrameAssembler::messages`].
pub struct Messages<'a> {
    assembler: &'a mut FrameAssembler,
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.assembler.extract()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
