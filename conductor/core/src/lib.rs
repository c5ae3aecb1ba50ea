//! Roleplay Core - Streaming Language-Tutor Engine
//!
//! This crate provides the core logic of the roleplay tutor, independent of
//! any transport. A learner chats with a model that plays a role in the
//! language being practised; every assistant turn comes back as three
//! sections (reply, translation, feedback) streamed as line-delimited frames.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── backend ─────────────────────────────┐
//! │                                                                   │
//! │  user text ──► SessionStore ──► prompt ──► LlmBackend (Ollama)   │
//! │                    ▲                            │                 │
//! │                    │                      StreamingToken          │
//! │                    │                            ▼                 │
//! │                  Tutor ◄── TurnOutcome ── StreamMultiplexer       │
//! │                                                 │ Frame           │
//! └─────────────────────────────────────────────────┼─────────────────┘
//!                                                   ▼
//!                                      transport::encode (NDJSON)
//!                                                   │ network
//!                                                   ▼
//! ┌──────────────────────────── client ──────────────┼────────────────┐
//! │                                      FrameDecoder ▼               │
//! │                StreamReassembler ──► ConversationState ──► UI     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Tutor`]: Orchestrates sessions and turns
//! - [`Frame`]: One line on the wire
//! - [`StreamMultiplexer`]: Backend stream to section frames
//! - [`StreamReassembler`]: Byte chunks back into conversation state
//! - [`SessionStore`]: Storage capability for sessions
//!
//! # Quick Start
//!
//! ```ignore
//! use roleplay_core::{
//!     CreateSessionRequest, InMemorySessionStore, OllamaBackend, Tutor, TutorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TutorConfig::from_env();
//!     let backend = OllamaBackend::from_config(&config)?;
//!     let tutor = Tutor::new(backend, InMemorySessionStore::new(), config);
//!
//!     let session = tutor.create_session(CreateSessionRequest::default()).await?.session;
//!     let mut frames = tutor.send_message(&session.id, "Bonjour !", None).await?;
//!     while let Some(frame) = frames.recv().await {
//!         // forward to the client
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Generation adapters (Ollama)
//! - [`config`]: Layered configuration
//! - [`messages`]: Identifiers, roles and statuses
//! - [`prompt`]: Prompt construction and the section marker contract
//! - [`reassembler`]: Client-side frame reassembly
//! - [`security`]: Input validation
//! - [`session`]: Sessions and conversation messages
//! - [`store`]: Session storage
//! - [`streaming`]: Section parser and stream multiplexer
//! - [`transport`]: Frame codec
//! - [`tutor`]: Orchestration

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod messages;
pub mod prompt;
pub mod reassembler;
pub mod security;
pub mod session;
pub mod store;
pub mod streaming;
pub mod transport;
pub mod tutor;

// Re-exports for convenience
pub use backend::{LlmBackend, LlmRequest, LlmResponse, OllamaBackend, StreamingToken};
pub use config::{default_config_path, load_config_from_path, ConfigError, TutorConfig};
pub use messages::{MessageId, MessageRole, MessageStatus, SessionId};
pub use reassembler::{reassemble, ConversationState, StreamReassembler};
pub use security::{InputValidator, TutorLimits, ValidationResult};
pub use session::{ConversationMessage, Session, SessionSettings};
pub use store::{InMemorySessionStore, SessionStore, StoreError};
pub use streaming::{
    ResolvedTurn, SectionParser, SectionState, SectionValues, StreamMultiplexer, TurnOutcome,
    TurnStats,
};
pub use transport::{Frame, FrameDecoder, Section, TransportError};
pub use tutor::{CreateSessionRequest, CreatedSession, Greeting, Tutor, TutorError};
