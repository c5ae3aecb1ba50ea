//! Stream Reassembler
//!
//! Client-side counterpart of the multiplexer. Raw response bytes arrive in
//! chunks that ignore line boundaries; the reassembler buffers them, decodes
//! every complete line into a [`Frame`] and folds it into the addressed
//! assistant message.
//!
//! # Design Philosophy
//!
//! Conversation state is updated only through [`ConversationState::apply`],
//! keyed by [`MessageId`]. There is no "last message" shortcut, so a UI that
//! appends a local note while a turn is streaming cannot misroute frames.
//!
//! Whatever happens to the byte source, an open message leaves
//! [`reassemble`] in a terminal state. A source error or an early end
//! becomes a locally synthesized error.

use std::collections::HashMap;
use std::fmt::Display;

use futures::{Stream, StreamExt};

use crate::messages::{MessageId, MessageStatus};
use crate::session::ConversationMessage;
use crate::transport::{Frame, FrameDecoder, TransportError};

/// Error recorded when the byte source ends before a terminal frame
pub const INCOMPLETE_STREAM: &str = "response ended before the reply was complete";

/// Ordered conversation with keyed access
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    messages: Vec<ConversationMessage>,
    index: HashMap<MessageId, usize>,
}

impl ConversationState {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from existing history, e.g. a fetched session
    #[must_use]
    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        let mut state = Self::new();
        for message in messages {
            state.push(message);
        }
        state
    }

    /// Append a message and return its identifier
    pub fn push(&mut self, message: ConversationMessage) -> MessageId {
        let id = message.id.clone();
        self.index.insert(id.clone(), self.messages.len());
        self.messages.push(message);
        id
    }

    /// Append an empty assistant message for a new request
    pub fn open_assistant(&mut self) -> MessageId {
        self.push(ConversationMessage::assistant_pending())
    }

    /// Look up a message by identifier
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ConversationMessage> {
        self.index.get(id).map(|&i| &self.messages[i])
    }

    /// Messages in conversation order
    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Reducer: fold a frame into the addressed message
    ///
    /// Returns `false` when the message is unknown or already terminal.
    pub fn apply(&mut self, id: &MessageId, frame: &Frame) -> bool {
        match self.get_mut(id) {
            Some(message) => message.apply(frame),
            None => {
                tracing::warn!(message_id = %id, "Frame for unknown message dropped");
                false
            }
        }
    }

    /// Resolve an open message as failed
    pub fn fail(&mut self, id: &MessageId, reason: impl Into<String>) -> bool {
        self.get_mut(id).is_some_and(|message| message.fail(reason))
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut ConversationMessage> {
        let i = *self.index.get(id)?;
        self.messages.get_mut(i)
    }
}

/// Incremental frame reassembly for one in-flight request
#[derive(Debug)]
pub struct StreamReassembler {
    decoder: FrameDecoder,
    message_id: MessageId,
    decode_errors: usize,
}

impl StreamReassembler {
    /// Reassemble frames addressed to `message_id`
    #[must_use]
    pub fn new(message_id: MessageId) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            message_id,
            decode_errors: 0,
        }
    }

    /// Message this reassembler writes to
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Lines dropped because they did not decode
    #[must_use]
    pub fn decode_errors(&self) -> usize {
        self.decode_errors
    }

    /// Feed one chunk of bytes
    ///
    /// Returns `true` once the message is terminal.
    pub fn push_chunk(&mut self, chunk: &[u8], state: &mut ConversationState) -> bool {
        self.decoder.push(chunk);
        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => {
                    self.apply(&frame, state);
                }
                Ok(None) => break,
                Err(e) => self.record_decode_error(&e),
            }
        }
        self.is_resolved(state)
    }

    /// The byte source ended: decode the remainder and resolve the message
    pub fn finish(&mut self, state: &mut ConversationState) -> MessageStatus {
        match self.decoder.finish() {
            Ok(Some(frame)) => {
                self.apply(&frame, state);
            }
            Ok(None) => {}
            Err(e) => self.record_decode_error(&e),
        }
        if !self.is_resolved(state) {
            tracing::warn!(message_id = %self.message_id, "Stream ended without a terminal frame");
            state.fail(&self.message_id, INCOMPLETE_STREAM);
        }
        self.status(state)
    }

    /// The byte source failed: resolve the message with `reason`
    pub fn fail(&mut self, state: &mut ConversationState, reason: impl Display) -> MessageStatus {
        self.decoder.clear();
        if state.fail(&self.message_id, format!("connection lost: {reason}")) {
            tracing::warn!(message_id = %self.message_id, %reason, "Stream failed mid-response");
        }
        self.status(state)
    }

    fn apply(&self, frame: &Frame, state: &mut ConversationState) {
        if !state.apply(&self.message_id, frame) {
            tracing::debug!(message_id = %self.message_id, ?frame, "Ignoring frame after terminal");
        }
    }

    fn record_decode_error(&mut self, error: &TransportError) {
        self.decode_errors += 1;
        tracing::warn!(message_id = %self.message_id, %error, "Dropping undecodable line");
    }

    fn is_resolved(&self, state: &ConversationState) -> bool {
        state
            .get(&self.message_id)
            .map_or(true, |message| !message.is_open())
    }

    fn status(&self, state: &ConversationState) -> MessageStatus {
        state
            .get(&self.message_id)
            .map_or(MessageStatus::Error, |message| message.status)
    }
}

/// Drive a byte stream into `state` until the message at `id` is resolved
///
/// Works over any fallible chunk stream (reqwest's `bytes_stream`, an
/// in-memory `futures::stream::iter`, ...). Reading stops at the first
/// terminal frame; the remaining stream is dropped.
pub async fn reassemble<S, B, E>(
    stream: S,
    state: &mut ConversationState,
    id: &MessageId,
) -> MessageStatus
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut reassembler = StreamReassembler::new(id.clone());
    futures::pin_mut!(stream);

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if reassembler.push_chunk(bytes.as_ref(), state) {
                    return reassembler.status(state);
                }
            }
            Err(e) => return reassembler.fail(state, e),
        }
    }

    reassembler.finish(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{encode, Section};
    use pretty_assertions::assert_eq;

    fn wire(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| encode(f).unwrap()).collect()
    }

    #[test]
    fn test_replace_not_append() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());

        let bytes = wire(&[
            Frame::section(Section::Reply, "Hola"),
            Frame::section(Section::Reply, "Hola, ¿cómo estás?"),
        ]);
        assert!(!reassembler.push_chunk(&bytes, &mut state));

        let message = state.get(&id).unwrap();
        assert_eq!(message.reply, "Hola, ¿cómo estás?");
        assert_eq!(message.status, MessageStatus::Streaming);
    }

    #[test]
    fn test_split_line_and_multibyte_char() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());

        let bytes = wire(&[Frame::section(Section::Translation, "ça va"), Frame::Done]);
        // Split inside the two-byte 'ç'
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(!reassembler.push_chunk(&bytes[..split], &mut state));
        assert!(reassembler.push_chunk(&bytes[split..], &mut state));

        let message = state.get(&id).unwrap();
        assert_eq!(message.translation, "ça va");
        assert_eq!(message.status, MessageStatus::Done);
    }

    #[test]
    fn test_frames_after_terminal_ignored() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());

        let bytes = wire(&[
            Frame::section(Section::Reply, "Ja"),
            Frame::error("model crashed"),
            Frame::section(Section::Reply, "late"),
            Frame::Done,
        ]);
        assert!(reassembler.push_chunk(&bytes, &mut state));

        let message = state.get(&id).unwrap();
        assert_eq!(message.reply, "Ja");
        assert_eq!(message.status, MessageStatus::Error);
        assert_eq!(message.error.as_deref(), Some("model crashed"));
    }

    #[test]
    fn test_unterminated_final_line_is_decoded() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());

        let _ = reassembler.push_chunk(br#"{"type":"reply","text":"fin"}"#, &mut state);
        let _ = reassembler.push_chunk(b"\n{\"type\":\"done\"}", &mut state);
        assert_eq!(reassembler.finish(&mut state), MessageStatus::Done);
        assert_eq!(state.get(&id).unwrap().reply, "fin");
    }

    #[test]
    fn test_end_mid_line_synthesizes_error() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());

        let _ = reassembler.push_chunk(b"{\"type\":\"reply\",\"text\":\"Gu", &mut state);
        assert_eq!(reassembler.finish(&mut state), MessageStatus::Error);

        let message = state.get(&id).unwrap();
        assert!(message.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert_eq!(reassembler.decode_errors(), 1);
    }

    #[test]
    fn test_keyed_updates_leave_other_messages_alone() {
        let mut state = ConversationState::new();
        let first = state.open_assistant();
        state.push(ConversationMessage::user("note"));
        let second = state.open_assistant();

        assert!(state.apply(&first, &Frame::section(Section::Reply, "one")));
        assert!(state.apply(&second, &Frame::section(Section::Feedback, "two")));
        assert!(!state.apply(&MessageId("msg_missing".to_string()), &Frame::Done));

        assert_eq!(state.get(&first).unwrap().reply, "one");
        assert_eq!(state.get(&first).unwrap().feedback, "");
        assert_eq!(state.get(&second).unwrap().feedback, "two");
        assert_eq!(state.messages()[1].text, "note");
    }

    #[tokio::test]
    async fn test_reassemble_source_error() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();

        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(wire(&[Frame::section(Section::Reply, "Salut")])),
            Err("connection reset".to_string()),
        ];
        let status = reassemble(futures::stream::iter(chunks), &mut state, &id).await;

        assert_eq!(status, MessageStatus::Error);
        let message = state.get(&id).unwrap();
        assert_eq!(message.reply, "Salut");
        assert_eq!(
            message.error.as_deref(),
            Some("connection lost: connection reset")
        );
    }

    #[tokio::test]
    async fn test_reassemble_stops_at_terminal() {
        let mut state = ConversationState::new();
        let id = state.open_assistant();

        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(wire(&[Frame::Done])),
            Err("never read".to_string()),
        ];
        let status = reassemble(futures::stream::iter(chunks), &mut state, &id).await;
        assert_eq!(status, MessageStatus::Done);
    }
}
