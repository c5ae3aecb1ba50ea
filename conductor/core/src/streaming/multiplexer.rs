//! Stream Multiplexer
//!
//! Drives one turn: reads text increments from a backend channel, runs them
//! through a [`SectionParser`] and forwards the resulting frames to the
//! client-facing channel. Every turn ends with exactly one `Done` or `Error`
//! frame unless the consumer went away first.
//!
//! Resolution and delivery of the terminal frame are separate steps:
//! [`StreamMultiplexer::resolve`] returns a [`ResolvedTurn`] whose message is
//! already final, so a caller can persist it before the client sees `Done`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::sections::{SectionParser, SectionValues};
use crate::backend::StreamingToken;
use crate::session::ConversationMessage;
use crate::transport::Frame;

/// Error reported when the backend channel closes without completing
pub const UNEXPECTED_END: &str = "generation stream ended unexpectedly";

/// Error recorded when the frame consumer disconnects mid-turn
pub const CANCELLED_BY_CLIENT: &str = "cancelled by client";

/// Counters for one multiplexed turn
#[derive(Clone, Debug, Default)]
pub struct TurnStats {
    /// Increments received from the backend
    pub tokens_received: u32,
    /// Frames delivered to the consumer
    pub frames_sent: u32,
    /// Wall time from start to resolution
    pub duration: Duration,
}

/// How a multiplexed turn ended, plus the server-side copy of the message
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    /// The assistant message, built from exactly the frames that were emitted
    pub message: ConversationMessage,
    /// The frame consumer disconnected before the terminal frame
    pub cancelled: bool,
    /// Counters
    pub stats: TurnStats,
}

impl TurnOutcome {
    /// Final section values of the turn
    #[must_use]
    pub fn sections(&self) -> SectionValues {
        SectionValues {
            reply: self.message.reply.clone(),
            translation: self.message.translation.clone(),
            feedback: self.message.feedback.clone(),
        }
    }
}

/// The consumer dropped its receiver
struct Disconnected;

/// Multiplexes one backend stream into section frames
pub struct StreamMultiplexer {
    parser: SectionParser,
    turn: ConversationMessage,
    tx: mpsc::Sender<Frame>,
    stats: TurnStats,
    started: Instant,
}

impl StreamMultiplexer {
    /// Create a multiplexer writing to `tx`
    ///
    /// `turn` is the pending assistant message the emitted frames are folded
    /// into.
    #[must_use]
    pub fn new(turn: ConversationMessage, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            parser: SectionParser::new(),
            turn,
            tx,
            stats: TurnStats::default(),
            started: Instant::now(),
        }
    }

    /// Consume the backend stream and deliver the terminal frame
    pub async fn run(self, tokens: mpsc::Receiver<StreamingToken>) -> TurnOutcome {
        self.resolve(tokens).await.deliver().await
    }

    /// Resolve the turn with an error frame without reading any tokens
    ///
    /// Used when the backend request could not be started.
    pub async fn abort(self, message: impl Into<String>) -> TurnOutcome {
        self.fail(message).deliver().await
    }

    /// Consume the backend stream until the turn is resolved
    ///
    /// Text frames are sent as they appear; the terminal frame is held in the
    /// returned [`ResolvedTurn`]. A consumer that hangs up is noticed while
    /// waiting for the next token, not only on the next send. The token
    /// receiver is dropped on return, which releases the backend request if
    /// it is still running.
    pub async fn resolve(mut self, mut tokens: mpsc::Receiver<StreamingToken>) -> ResolvedTurn {
        loop {
            let next = tokio::select! {
                biased;
                () = self.tx.closed() => None,
                token = tokens.recv() => Some(token),
            };
            let Some(token) = next else {
                return self.cancelled();
            };
            let Some(token) = token else {
                tracing::warn!(
                    tokens = self.stats.tokens_received,
                    "Backend stream closed without completing"
                );
                return self.fail(UNEXPECTED_END);
            };

            match token {
                StreamingToken::Token(text) => {
                    self.stats.tokens_received += 1;
                    let frames = self.parser.feed(&text);
                    if self.emit_all(frames).await.is_err() {
                        return self.cancelled();
                    }
                }
                StreamingToken::Complete { message } => {
                    // Adapters that only report the final text
                    if self.stats.tokens_received == 0 && !message.is_empty() {
                        let frames = self.parser.feed(&message);
                        if self.emit_all(frames).await.is_err() {
                            return self.cancelled();
                        }
                    }
                    let frames = self.parser.finish();
                    if self.emit_all(frames).await.is_err() {
                        return self.cancelled();
                    }
                    return self.terminate(Frame::Done);
                }
                StreamingToken::Error(error) => {
                    tracing::warn!(%error, "Backend reported an error mid-turn");
                    return self.fail(error);
                }
            }
        }
    }

    /// Resolve the turn as failed without reading any tokens
    #[must_use]
    pub fn fail(self, message: impl Into<String>) -> ResolvedTurn {
        self.terminate(Frame::error(message))
    }

    fn terminate(mut self, frame: Frame) -> ResolvedTurn {
        self.turn.apply(&frame);
        self.stats.duration = self.started.elapsed();
        ResolvedTurn {
            mux: self,
            terminal: Some(frame),
        }
    }

    async fn emit_all(&mut self, frames: Vec<Frame>) -> Result<(), Disconnected> {
        for frame in frames {
            self.emit(frame).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, frame: Frame) -> Result<(), Disconnected> {
        self.turn.apply(&frame);
        self.tx.send(frame).await.map_err(|_| Disconnected)?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    fn cancelled(mut self) -> ResolvedTurn {
        tracing::info!(
            frames = self.stats.frames_sent,
            "Frame consumer disconnected, abandoning turn"
        );
        self.turn.fail(CANCELLED_BY_CLIENT);
        self.stats.duration = self.started.elapsed();
        ResolvedTurn {
            mux: self,
            terminal: None,
        }
    }
}

/// A turn whose message is final but whose terminal frame is not yet sent
pub struct ResolvedTurn {
    mux: StreamMultiplexer,
    /// `None` when the consumer already hung up
    terminal: Option<Frame>,
}

impl ResolvedTurn {
    /// The resolved assistant message
    #[must_use]
    pub fn message(&self) -> &ConversationMessage {
        &self.mux.turn
    }

    /// Send the terminal frame and report the outcome
    pub async fn deliver(self) -> TurnOutcome {
        let Self { mut mux, terminal } = self;
        let mut cancelled = terminal.is_none();
        if let Some(frame) = terminal {
            if mux.tx.send(frame).await.is_ok() {
                mux.stats.frames_sent += 1;
            } else {
                cancelled = true;
            }
        }

        tracing::debug!(
            status = ?mux.turn.status,
            cancelled,
            tokens = mux.stats.tokens_received,
            frames = mux.stats.frames_sent,
            duration_ms = u64::try_from(mux.stats.duration.as_millis()).unwrap_or(u64::MAX),
            "Turn resolved"
        );
        TurnOutcome {
            message: mux.turn,
            cancelled,
            stats: mux.stats,
        }
    }
}
