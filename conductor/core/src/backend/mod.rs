//! LLM Backend Integration
//!
//! Generation adapters behind a common trait. Each adapter turns one provider's
//! native output into a plain stream of text increments.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use roleplay_core::backend::{OllamaBackend, LlmBackend, LlmRequest};
//!
//! let backend = OllamaBackend::from_config(&config)?;
//! let request = LlmRequest::new("Bonjour !", "llama3");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};
