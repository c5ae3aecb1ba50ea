//! Streaming Section Multiplexer
//!
//! Turns an incremental stream of generated text into a sequence of section
//! frames, one turn at a time.
//!
//! # Architecture
//!
//! ```text
//!  LlmBackend ──StreamingToken──► StreamMultiplexer ──Frame──► consumer
//!                                      │
//!                                      ▼
//!                                SectionParser
//!                     NoSection / InReply / InTranslation /
//!                           InFeedback / Closed
//! ```
//!
//! # Guarantees
//!
//! - **Replace semantics**: every text frame carries the full current value
//!   of its section, trimmed, and is only sent when that value changed
//! - **No leaked markers**: a partially received tag is held back, never
//!   emitted as content
//! - **Exactly one terminal frame**: `Done` after successful completion,
//!   `Error` on upstream failure or an unexpectedly closed stream
//! - **Cancellation**: if the consumer drops its receiver, the backend
//!   receiver is dropped too and the turn is recorded as cancelled, even
//!   while no frame is due
//! - **Persist before done**: the terminal frame is held back until the
//!   caller has the resolved message in hand
//!
//! # Example
//!
//! ```ignore
//! use roleplay_core::streaming::StreamMultiplexer;
//! use roleplay_core::session::ConversationMessage;
//! use tokio::sync::mpsc;
//!
//! let tokens = backend.send_streaming(&request).await?;
//! let (tx, mut rx) = mpsc::channel(64);
//! let turn = tokio::spawn(
//!     StreamMultiplexer::new(ConversationMessage::assistant_pending(), tx).run(tokens),
//! );
//! while let Some(frame) = rx.recv().await {
//!     // forward frame
//! }
//! let outcome = turn.await?;
//! ```

mod multiplexer;
mod sections;

pub use multiplexer::{
    ResolvedTurn, StreamMultiplexer, TurnOutcome, TurnStats, CANCELLED_BY_CLIENT, UNEXPECTED_END,
};
pub use sections::{SectionParser, SectionState, SectionValues};
