//! Transport Layer for the Response Stream
//!
//! Defines the frame vocabulary shared by the daemon and its clients, and
//! the line-delimited codec that carries it over any byte stream.
//!
//! # Design Philosophy
//!
//! The transport layer knows nothing about sessions or generation. The
//! multiplexer produces [`Frame`]s, this layer turns them into bytes and back,
//! and the reassembler folds decoded frames into conversation state.

pub mod frame;

use thiserror::Error;

pub use frame::{decode_line, encode, Frame, FrameDecoder, Section, MAX_LINE_SIZE};

/// Errors raised while encoding or decoding frames
#[derive(Debug, Error)]
pub enum TransportError {
    /// A frame could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// A complete line was not a well-formed frame
    #[error("failed to decode frame: {0}")]
    Decode(String),

    /// A line exceeded the size limit and was dropped
    #[error("line too long: {size} bytes (max: {max})")]
    LineTooLong {
        /// Line bytes seen when the limit was hit
        size: usize,
        /// Configured limit
        max: usize,
    },
}
