//! Session Management
//!
//! Conversation sessions between a learner and the roleplay partner.
//! Sessions track the language pair, the situation being played out, the
//! selected model and the ordered message history.
//!
//! # Design Philosophy
//!
//! History is append-only. A user message never changes once stored. An
//! assistant message is created empty and filled in section by section as
//! frames arrive, until it reaches a terminal status. Each message carries a
//! stable [`MessageId`] so updates are addressed by key, never by position.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{MessageId, MessageRole, MessageStatus, SessionId};
use crate::transport::{Frame, Section};

/// Default language the learner is practising
pub const DEFAULT_LEARNING_LANGUAGE: &str = "French";
/// Default language the learner already speaks
pub const DEFAULT_NATIVE_LANGUAGE: &str = "English";
/// Default roleplay situation
pub const DEFAULT_SITUATION: &str = "a casual conversation";
/// Default generation model
pub const DEFAULT_MODEL: &str = "llama3";

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// What the learner typed (user messages only)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// In-character reply
    #[serde(default)]
    pub reply: String,
    /// Translation of the reply
    #[serde(default)]
    pub translation: String,
    /// Feedback on the learner's message
    #[serde(default)]
    pub feedback: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: MessageStatus,
    /// Error description when `status` is `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the message was created (Unix timestamp ms)
    #[serde(default)]
    pub timestamp: u64,
}

impl ConversationMessage {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::User,
            text: text.into(),
            reply: String::new(),
            translation: String::new(),
            feedback: String::new(),
            status: MessageStatus::Done,
            error: None,
            timestamp: now_ms(),
        }
    }

    /// Create an empty assistant message awaiting its first frame
    #[must_use]
    pub fn assistant_pending() -> Self {
        Self {
            id: MessageId::new(),
            role: MessageRole::Assistant,
            text: String::new(),
            reply: String::new(),
            translation: String::new(),
            feedback: String::new(),
            status: MessageStatus::Pending,
            error: None,
            timestamp: now_ms(),
        }
    }

    /// Current value of a section
    #[must_use]
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Reply => &self.reply,
            Section::Translation => &self.translation,
            Section::Feedback => &self.feedback,
        }
    }

    fn section_mut(&mut self, section: Section) -> &mut String {
        match section {
            Section::Reply => &mut self.reply,
            Section::Translation => &mut self.translation,
            Section::Feedback => &mut self.feedback,
        }
    }

    /// Fold one frame into this message
    ///
    /// Text frames replace their section and mark the message `Streaming`;
    /// `Done` and `Error` close it. Once terminal, further frames are
    /// ignored and `false` is returned.
    pub fn apply(&mut self, frame: &Frame) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        match frame {
            Frame::Done => self.status = MessageStatus::Done,
            Frame::Error { message } => self.close_with_error(message.clone()),
            text_frame => {
                if let Some((section, text)) = text_frame.as_section() {
                    let field = self.section_mut(section);
                    field.clear();
                    field.push_str(text);
                    self.status = MessageStatus::Streaming;
                }
            }
        }
        true
    }

    /// Resolve an open message as failed, keeping any partial sections
    ///
    /// Does nothing if the message already reached a terminal status.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.close_with_error(message.into());
        true
    }

    fn close_with_error(&mut self, message: String) {
        self.status = MessageStatus::Error;
        self.error = Some(message);
    }

    /// Whether the message is still receiving frames
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Text representing this message in prompt history
    #[must_use]
    pub fn history_text(&self) -> &str {
        match self.role {
            MessageRole::User => &self.text,
            MessageRole::Assistant => &self.reply,
        }
    }
}

/// Language pair, situation and model chosen for a session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Language the learner is practising
    pub learning_language: String,
    /// Language the learner already speaks
    pub native_language: String,
    /// Roleplay situation description
    pub situation: String,
    /// Generation model identifier
    pub model: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            learning_language: DEFAULT_LEARNING_LANGUAGE.to_string(),
            native_language: DEFAULT_NATIVE_LANGUAGE.to_string(),
            situation: DEFAULT_SITUATION.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// A conversation session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Session settings
    #[serde(flatten)]
    pub settings: SessionSettings,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Conversation history
    pub messages: Vec<ConversationMessage>,
}

impl Session {
    /// Create a new session
    #[must_use]
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_id(SessionId::new(), settings)
    }

    /// Create a session with a specific ID
    #[must_use]
    pub fn with_id(id: SessionId, settings: SessionSettings) -> Self {
        Self {
            id,
            settings,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Append a message to the history
    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    /// Get the last N messages for context
    #[must_use]
    pub fn recent_messages(&self, count: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Build context for the LLM (message history as `Role: text` lines)
    ///
    /// Failed assistant turns with nothing to show are left out.
    #[must_use]
    pub fn build_context(&self, max_messages: usize) -> String {
        let mut context = String::new();

        for msg in self.recent_messages(max_messages) {
            let text = msg.history_text().trim();
            if text.is_empty() {
                continue;
            }
            context.push_str(msg.role.label());
            context.push_str(": ");
            context.push_str(text);
            context.push('\n');
        }

        context
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new(SessionSettings::default());
        assert!(session.messages.is_empty());
        assert_eq!(session.settings.learning_language, "French");
        assert_eq!(session.settings.model, "llama3");
    }

    #[test]
    fn test_replace_not_append() {
        let mut msg = ConversationMessage::assistant_pending();
        assert_eq!(msg.status, MessageStatus::Pending);

        msg.apply(&Frame::section(Section::Reply, "Hola"));
        msg.apply(&Frame::section(Section::Reply, "Hola, ¿cómo estás?"));

        assert_eq!(msg.reply, "Hola, ¿cómo estás?");
        assert_eq!(msg.status, MessageStatus::Streaming);
    }

    #[test]
    fn test_terminal_frames_close_message() {
        let mut msg = ConversationMessage::assistant_pending();
        msg.apply(&Frame::section(Section::Translation, "Hi"));
        assert!(msg.apply(&Frame::Done));
        assert_eq!(msg.status, MessageStatus::Done);

        // Nothing changes after a terminal frame
        assert!(!msg.apply(&Frame::section(Section::Translation, "Bye")));
        assert!(!msg.apply(&Frame::error("late")));
        assert!(!msg.fail("late"));
        assert_eq!(msg.translation, "Hi");
        assert_eq!(msg.status, MessageStatus::Done);
        assert_eq!(msg.error, None);
    }

    #[test]
    fn test_error_keeps_partial_sections() {
        let mut msg = ConversationMessage::assistant_pending();
        msg.apply(&Frame::section(Section::Reply, "Ho"));
        msg.apply(&Frame::error("rate limited"));

        assert_eq!(msg.reply, "Ho");
        assert_eq!(msg.status, MessageStatus::Error);
        assert_eq!(msg.error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_build_context() {
        let mut session = Session::new(SessionSettings::default());

        session.push(ConversationMessage::user("Bonjour"));
        let mut reply = ConversationMessage::assistant_pending();
        reply.apply(&Frame::section(Section::Reply, "Bonjour ! Une table ?"));
        reply.apply(&Frame::section(Section::Feedback, "Parfait"));
        reply.apply(&Frame::Done);
        session.push(reply);
        let mut failed = ConversationMessage::assistant_pending();
        failed.fail("timeout");
        session.push(failed);
        session.push(ConversationMessage::user("Oui, pour deux"));

        let context = session.build_context(10);
        assert_eq!(
            context,
            "User: Bonjour\nAssistant: Bonjour ! Une table ?\nUser: Oui, pour deux\n"
        );

        let context = session.build_context(1);
        assert_eq!(context, "User: Oui, pour deux\n");
    }

    #[test]
    fn test_session_json_shape() {
        let mut session = Session::with_id(SessionId::from("s-1"), SessionSettings::default());
        session.push(ConversationMessage::user("Salut"));

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["id"], "s-1");
        assert_eq!(value["learning_language"], "French");
        assert_eq!(value["situation"], "a casual conversation");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["text"], "Salut");
        assert_eq!(value["messages"][0]["status"], "done");

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back, session);
    }
}
