//! Frame Protocol
//!
//! Wire format for the tutor's response stream: newline-delimited JSON, one
//! frame per line.
//!
//! # Frame Format
//!
//! ```text
//! {"type":"reply","text":"<current reply text>"}\n
//! {"type":"translation","text":"<current translation text>"}\n
//! {"type":"feedback","text":"<current feedback text>"}\n
//! {"type":"done"}\n
//! {"type":"error","message":"<description>"}\n
//! ```
//!
//! Text frames carry the *current full value* of their section, so a receiver
//! replaces rather than appends. JSON string escaping guarantees an encoded
//! frame never contains a raw line terminator.
//!
//! # Robustness
//!
//! - Lines that do not decode are reported as errors the caller skips
//! - Blank lines and `\r\n` terminators are tolerated
//! - A line larger than [`MAX_LINE_SIZE`] is discarded, whether or not its
//!   terminator arrived in the same chunk

use serde::{Deserialize, Serialize};

use super::TransportError;

/// Maximum size of a single line, terminator excluded (1 MiB)
///
/// This prevents memory exhaustion from a peer that never sends a newline.
/// The limit applies to complete lines too, so chunking never changes which
/// lines are decoded.
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Minimum buffer capacity for decoder
const MIN_BUFFER_CAPACITY: usize = 4096;

/// Line terminator
const LINE_TERMINATOR: u8 = b'\n';

/// One of the three semantic channels multiplexed out of a generated turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// The partner's in-character reply, in the learning language
    Reply,
    /// Translation of the reply into the learner's native language
    Translation,
    /// Feedback on the learner's last message
    Feedback,
}

impl Section {
    /// All sections in emission order
    pub const ALL: [Section; 3] = [Section::Reply, Section::Translation, Section::Feedback];

    /// Lowercase name, as used in markers and on the wire
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Translation => "translation",
            Self::Feedback => "feedback",
        }
    }
}

/// A single unit of the response stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Current full value of the reply section
    Reply {
        /// Reply text
        text: String,
    },
    /// Current full value of the translation section
    Translation {
        /// Translation text
        text: String,
    },
    /// Current full value of the feedback section
    Feedback {
        /// Feedback text
        text: String,
    },
    /// The turn completed normally
    Done,
    /// The turn failed
    Error {
        /// Human-readable description
        message: String,
    },
}

impl Frame {
    /// Build the text frame for a section
    pub fn section(section: Section, text: impl Into<String>) -> Self {
        let text = text.into();
        match section {
            Section::Reply => Self::Reply { text },
            Section::Translation => Self::Translation { text },
            Section::Feedback => Self::Feedback { text },
        }
    }

    /// Build an error frame
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The section and text carried by a text frame
    #[must_use]
    pub fn as_section(&self) -> Option<(Section, &str)> {
        match self {
            Self::Reply { text } => Some((Section::Reply, text)),
            Self::Translation { text } => Some((Section::Translation, text)),
            Self::Feedback { text } => Some((Section::Feedback, text)),
            Self::Done | Self::Error { .. } => None,
        }
    }

    /// Whether this frame ends a request's frame sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// Encode a frame as one newline-terminated line
///
/// # Errors
///
/// Returns `TransportError::Encode` if JSON serialization fails.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, TransportError> {
    let mut line = serde_json::to_vec(frame).map_err(|e| TransportError::Encode(e.to_string()))?;
    debug_assert!(!line.contains(&LINE_TERMINATOR));
    line.push(LINE_TERMINATOR);
    Ok(line)
}

/// Decode a single line (without its terminator)
///
/// Returns:
/// - `Ok(Some(frame))` for a well-formed frame
/// - `Ok(None)` for a blank line
/// - `Err(TransportError::Decode)` for anything else; the caller skips it
pub fn decode_line(line: &str) -> Result<Option<Frame>, TransportError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| TransportError::Decode(format!("{e}: {}", preview(line))))
}

/// Shorten a rejected line for log output
fn preview(line: &str) -> String {
    const MAX_PREVIEW: usize = 80;
    if line.len() <= MAX_PREVIEW {
        return line.to_string();
    }
    let mut end = MAX_PREVIEW;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

/// Decoder state machine for streaming frame parsing
///
/// Buffers incoming bytes and yields complete frames. Bytes are split on the
/// line terminator before UTF-8 decoding, so a multi-byte character split
/// across two chunks is reassembled intact.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Position where we've consumed up to
    read_pos: usize,
    /// Position up to which the unconsumed bytes hold no terminator
    scan_pos: usize,
    /// Dropping the tail of an oversized line until its terminator
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new decoder with default buffer capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
            scan_pos: 0,
            discarding: false,
        }
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        // Compact buffer if we've consumed a lot
        if self.read_pos > self.buffer.len() / 2 && self.read_pos > MIN_BUFFER_CAPACITY {
            self.buffer.drain(..self.read_pos);
            self.scan_pos -= self.read_pos;
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Get the number of unconsumed bytes in the buffer
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Try to decode the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was decoded
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if a complete line was not a frame, or the pending line
    ///   grew past [`MAX_LINE_SIZE`]. The offending bytes are already
    ///   consumed, so calling `decode` again continues with the next line.
    pub fn decode(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let Some(offset) = self.buffer[self.scan_pos..]
                .iter()
                .position(|&b| b == LINE_TERMINATOR)
            else {
                self.scan_pos = self.buffer.len();
                return self.check_overflow();
            };

            let end = self.scan_pos + offset;
            let start = self.read_pos;
            self.read_pos = end + 1;
            self.scan_pos = self.read_pos;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if end - start > MAX_LINE_SIZE {
                return Err(TransportError::LineTooLong {
                    size: end - start,
                    max: MAX_LINE_SIZE,
                });
            }

            let line = String::from_utf8_lossy(&self.buffer[start..end]);
            match decode_line(&line)? {
                Some(frame) => return Ok(Some(frame)),
                None => continue,
            }
        }
    }

    /// Decode whatever remains once the byte source has ended
    ///
    /// The remainder is tried once as a final, unterminated line and the
    /// buffer is cleared.
    pub fn finish(&mut self) -> Result<Option<Frame>, TransportError> {
        let discarding = std::mem::take(&mut self.discarding);
        let size = self.available();
        let remainder = String::from_utf8_lossy(&self.buffer[self.read_pos..]).into_owned();
        self.clear();
        if discarding {
            return Ok(None);
        }
        if size > MAX_LINE_SIZE {
            return Err(TransportError::LineTooLong {
                size,
                max: MAX_LINE_SIZE,
            });
        }
        decode_line(&remainder)
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
        self.discarding = false;
    }

    fn check_overflow(&mut self) -> Result<Option<Frame>, TransportError> {
        let size = self.available();
        if size <= MAX_LINE_SIZE {
            return Ok(None);
        }
        self.buffer.clear();
        self.read_pos = 0;
        self.scan_pos = 0;
        self.discarding = true;
        Err(TransportError::LineTooLong {
            size,
            max: MAX_LINE_SIZE,
        })
    }
}
