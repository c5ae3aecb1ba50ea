//! Tutor - The Orchestration Core
//!
//! The Tutor ties the pieces of a roleplay turn together:
//! - Session creation and lookup through a [`SessionStore`]
//! - Prompt construction from the session history
//! - Generation through an [`LlmBackend`]
//! - Section multiplexing into a frame stream
//!
//! # Design Philosophy
//!
//! The Tutor is transport-agnostic. It hands out a `mpsc::Receiver<Frame>`
//! per turn and does not know whether the frames end up in an HTTP response,
//! a test harness or a terminal. Everything that can reject a request
//! (validation, unknown session) happens before that receiver exists, so a
//! caller either gets an error or a stream that ends in exactly one terminal
//! frame.
//!
//! Turns within one session are serialized by a per-session lock held for
//! the whole turn. Different sessions never wait on each other.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

use crate::backend::LlmBackend;
use crate::config::TutorConfig;
use crate::messages::SessionId;
use crate::prompt;
use crate::security::{InputValidator, ValidationResult};
use crate::session::{
    ConversationMessage, Session, SessionSettings, DEFAULT_LEARNING_LANGUAGE,
    DEFAULT_NATIVE_LANGUAGE, DEFAULT_SITUATION,
};
use crate::store::{SessionStore, StoreError};
use crate::streaming::{SectionParser, StreamMultiplexer};
use crate::transport::{Frame, Section};

/// Scenarios offered when the model cannot suggest one
const FALLBACK_SITUATIONS: &[&str] = &[
    "ordering coffee at a busy café",
    "asking for directions to the train station",
    "checking in at a small hotel",
    "buying fruit and vegetables at a market",
    "making small talk with a new neighbour",
    "returning a shirt that does not fit",
    "booking a table at a restaurant",
    "chatting with a taxi driver on the way to the airport",
];

/// Errors returned before a turn starts
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TutorError {
    /// The session does not exist
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// The request was rejected by validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model could not be reached
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for TutorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
        }
    }
}

/// Parameters for a new session; absent fields fall back to defaults
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Language being practised
    #[serde(default)]
    pub learning_language: Option<String>,
    /// Learner's native language
    #[serde(default)]
    pub native_language: Option<String>,
    /// Roleplay situation
    #[serde(default)]
    pub situation: Option<String>,
    /// Model identifier
    #[serde(default)]
    pub model: Option<String>,
    /// Precompute an opening turn (overrides `greet_on_create`)
    #[serde(default)]
    pub greet: Option<bool>,
}

/// Opening line produced for a new session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// In-character opening line
    pub reply: String,
    /// Its translation
    pub translation: String,
}

/// A freshly created session
#[derive(Clone, Debug)]
pub struct CreatedSession {
    /// The session, including the greeting turn when one was generated
    pub session: Session,
    /// The greeting, if requested and generated successfully
    pub greeting: Option<Greeting>,
}

/// The Tutor - headless orchestration core
pub struct Tutor<B: LlmBackend, S: SessionStore> {
    /// LLM backend
    backend: Arc<B>,
    /// Session storage
    store: Arc<S>,
    /// Configuration
    config: TutorConfig,
    /// Validator for client input
    validator: InputValidator,
    /// One lock per session, held for the duration of a turn
    turn_locks: Arc<DashMap<SessionId, Arc<Mutex<()>>>>,
    /// Rotates through the fallback situations
    fallback_cursor: AtomicUsize,
}

impl<B: LlmBackend + 'static, S: SessionStore + 'static> Tutor<B, S> {
    /// Create a new Tutor
    pub fn new(backend: B, store: S, config: TutorConfig) -> Self {
        let validator = InputValidator::new(config.limits.clone());
        Self {
            backend: Arc::new(backend),
            store: Arc::new(store),
            config,
            validator,
            turn_locks: Arc::new(DashMap::new()),
            fallback_cursor: AtomicUsize::new(0),
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &TutorConfig {
        &self.config
    }

    /// Get the session store
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Check that the model server is reachable
    pub async fn check_backend(&self) -> Result<(), TutorError> {
        if self.backend.health_check().await {
            Ok(())
        } else {
            Err(TutorError::Backend(format!(
                "{} is not reachable",
                self.backend.name()
            )))
        }
    }

    /// Create a session, optionally with an opening turn
    ///
    /// A failed greeting is logged and the session is returned without one.
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CreatedSession, TutorError> {
        let settings = self.settings_for(&request)?;
        let session = self.store.create(settings).await;
        tracing::info!(
            session_id = %session.id,
            learning = %session.settings.learning_language,
            native = %session.settings.native_language,
            situation = %session.settings.situation,
            "Created session"
        );

        let greet = request.greet.unwrap_or(self.config.greet_on_create);
        if !greet {
            return Ok(CreatedSession {
                session,
                greeting: None,
            });
        }

        let greeting = self.generate_greeting(&session).await;
        let session = match greeting {
            Some(_) => self.store.get(&session.id).await?,
            None => session,
        };
        Ok(CreatedSession { session, greeting })
    }

    /// Snapshot of a session and its full history
    pub async fn get_session(&self, id: &SessionId) -> Result<Session, TutorError> {
        Ok(self.store.get(id).await?)
    }

    /// Start a turn and return its frame stream
    ///
    /// Validation and the session lookup happen before anything is spawned;
    /// a rejected request produces no stream. Dropping the receiver cancels
    /// the turn. The assistant turn is in history by the time the terminal
    /// frame arrives.
    pub async fn send_message(
        &self,
        id: &SessionId,
        text: &str,
        model: Option<String>,
    ) -> Result<mpsc::Receiver<Frame>, TutorError> {
        if let ValidationResult::Invalid(reason) = self.validator.validate_message(text) {
            tracing::warn!(session_id = %id, reason = %reason, "Rejected user message");
            return Err(TutorError::InvalidInput(reason));
        }
        if !self.store.contains(id).await {
            return Err(TutorError::NotFound(id.clone()));
        }

        let (tx, rx) = mpsc::channel(self.config.frame_channel_capacity);
        let turn = Turn {
            backend: Arc::clone(&self.backend),
            store: Arc::clone(&self.store),
            session_id: id.clone(),
            text: text.to_string(),
            model: model.filter(|m| !m.trim().is_empty()),
            max_context_messages: self.config.max_context_messages,
        };
        let lock = self.turn_lock(id);
        let span = tracing::info_span!("turn", session_id = %id);

        tokio::spawn(
            async move {
                let _guard = lock.lock_owned().await;
                turn.run(tx).await;
            }
            .instrument(span),
        );

        Ok(rx)
    }

    /// Suggest a roleplay situation for a language
    ///
    /// Falls back to a built-in scenario when the model fails or answers
    /// with nothing usable.
    pub async fn suggest_situation(&self, learning_language: Option<&str>) -> String {
        let language = learning_language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LEARNING_LANGUAGE);
        let request = prompt::situation_request(language, &self.config.default_model);

        match self.backend.send(&request).await {
            Ok(response) => {
                tracing::debug!(
                    language,
                    tokens = response.tokens_used,
                    duration_ms = response.duration_ms,
                    "Situation generated"
                );
                match clean_situation(&response.content) {
                    Some(situation) => return situation,
                    None => tracing::warn!(language, "Model returned an empty situation"),
                }
            }
            Err(e) => tracing::warn!(language, error = %e, "Situation suggestion failed"),
        }

        let i = self.fallback_cursor.fetch_add(1, Ordering::Relaxed) % FALLBACK_SITUATIONS.len();
        FALLBACK_SITUATIONS[i].to_string()
    }

    fn settings_for(&self, request: &CreateSessionRequest) -> Result<SessionSettings, TutorError> {
        fn pick(value: Option<&String>, default: &str) -> String {
            value
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        }

        let situation = pick(request.situation.as_ref(), DEFAULT_SITUATION);
        if let ValidationResult::Invalid(reason) = self.validator.validate_situation(&situation) {
            return Err(TutorError::InvalidInput(reason));
        }

        Ok(SessionSettings {
            learning_language: pick(request.learning_language.as_ref(), DEFAULT_LEARNING_LANGUAGE),
            native_language: pick(request.native_language.as_ref(), DEFAULT_NATIVE_LANGUAGE),
            situation,
            model: pick(request.model.as_ref(), &self.config.default_model),
        })
    }

    /// Generate and store the opening turn
    async fn generate_greeting(&self, session: &Session) -> Option<Greeting> {
        let request = prompt::greeting_request(&session.settings);
        let response = match self.backend.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "Greeting generation failed");
                return None;
            }
        };

        tracing::debug!(
            session_id = %session.id,
            model = %response.model,
            tokens = response.tokens_used,
            duration_ms = response.duration_ms,
            "Greeting generated"
        );

        let sections = SectionParser::parse_complete(&response.content);
        if sections.reply.is_empty() {
            tracing::warn!(session_id = %session.id, "Greeting had no reply section");
            return None;
        }

        let mut message = ConversationMessage::assistant_pending();
        message.apply(&Frame::section(Section::Reply, sections.reply.clone()));
        if !sections.translation.is_empty() {
            message.apply(&Frame::section(Section::Translation, sections.translation.clone()));
        }
        message.apply(&Frame::Done);

        if let Err(e) = self.store.append(&session.id, message).await {
            tracing::warn!(session_id = %session.id, error = %e, "Could not store greeting");
            return None;
        }

        Some(Greeting {
            reply: sections.reply,
            translation: sections.translation,
        })
    }

    fn turn_lock(&self, id: &SessionId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.turn_locks
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }
}

/// Everything a spawned turn needs
struct Turn<B, S> {
    backend: Arc<B>,
    store: Arc<S>,
    session_id: SessionId,
    text: String,
    model: Option<String>,
    max_context_messages: usize,
}

impl<B: LlmBackend, S: SessionStore> Turn<B, S> {
    async fn run(self, tx: mpsc::Sender<Frame>) {
        let multiplexer = StreamMultiplexer::new(ConversationMessage::assistant_pending(), tx);

        if let Err(e) = self
            .store
            .append(&self.session_id, ConversationMessage::user(self.text.clone()))
            .await
        {
            multiplexer.abort(e.to_string()).await;
            return;
        }

        let session = match self.store.get(&self.session_id).await {
            Ok(session) => session,
            Err(e) => {
                multiplexer.abort(e.to_string()).await;
                return;
            }
        };

        let model = self
            .model
            .clone()
            .unwrap_or_else(|| session.settings.model.clone());
        let request = prompt::turn_request(&session, &model, self.max_context_messages);
        tracing::debug!(model = %model, history = session.messages.len(), "Starting generation");

        let resolved = match self.backend.send_streaming(&request).await {
            Ok(tokens) => multiplexer.resolve(tokens).await,
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Could not start generation"
                );
                multiplexer.fail(format!("failed to start generation: {e}"))
            }
        };

        // Stored before the terminal frame goes out
        if let Err(e) = self.store.append(&self.session_id, resolved.message().clone()).await {
            tracing::warn!(error = %e, "Could not store assistant turn");
        }
        let outcome = resolved.deliver().await;

        tracing::info!(
            status = ?outcome.message.status,
            cancelled = outcome.cancelled,
            tokens = outcome.stats.tokens_received,
            duration_ms = u64::try_from(outcome.stats.duration.as_millis()).unwrap_or(u64::MAX),
            "Turn finished"
        );
    }
}

/// First non-empty line, without surrounding quotes
fn clean_situation(raw: &str) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.trim_matches(|c| c == '"' || c == '\'' || c == '“' || c == '”');
    let line = line.trim();
    (!line.is_empty()).then(|| line.to_string())
}
