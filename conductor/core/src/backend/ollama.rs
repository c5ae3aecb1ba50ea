//! Ollama Backend Implementation
//!
//! Generation adapter for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions (streaming or batch)
//! - `/api/tags` - List available models (used as a health probe)
//!
//! The streaming generate endpoint answers with newline-delimited JSON. Each
//! line carries a `response` increment; the last one has `"done": true`. A
//! line with an `error` field reports a failure mid-stream.
//!
//! A request with `stream` turned off is sent as one batch call; on the
//! streaming path its whole text arrives as a single `Complete`.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::traits::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};
use crate::config::TutorConfig;

/// Capacity of the token channel handed to the tutor
const TOKEN_CHANNEL_CAPACITY: usize = 100;

/// One line of Ollama's generate stream
#[derive(Debug, Default, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// `timeout` bounds each whole request, streaming included.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            host: host.into(),
            port,
            http_client,
        })
    }

    /// Create from the tutor configuration
    pub fn from_config(config: &TutorConfig) -> anyhow::Result<Self> {
        Self::new(
            config.ollama_host.clone(),
            config.ollama_port,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for the generate endpoint
    fn request_body(request: &LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "prompt": request.full_prompt(),
            "stream": request.stream,
        });

        let mut options = serde_json::Map::new();
        if (request.temperature - 0.7).abs() > f32::EPSILON {
            options.insert("temperature".to_string(), serde_json::json!(request.temperature));
        }
        if request.max_tokens > 0 {
            options.insert("num_predict".to_string(), serde_json::json!(request.max_tokens));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }

        body
    }

    /// POST to the generate endpoint, turning HTTP errors into `Err`
    async fn post_generate(&self, request: &LlmRequest) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http_client
            .post(self.generate_url())
            .json(&Self::request_body(request))
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        Ok(response)
    }
}

/// What one generate-stream line means for the token channel
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    Token(String),
    Done,
    Failed(String),
    Skip,
}

/// Interpret a single generate-stream line
///
/// A line may carry both a final `response` increment and `done`; the caller
/// handles the token first.
fn interpret_line(line: &str) -> Vec<LineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return vec![LineEvent::Skip];
    }

    let chunk: GenerateChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => return vec![LineEvent::Failed(format!("malformed response from Ollama: {e}"))],
    };

    if let Some(error) = chunk.error {
        return vec![LineEvent::Failed(error)];
    }

    let mut events = Vec::with_capacity(2);
    if let Some(token) = chunk.response.filter(|t| !t.is_empty()) {
        events.push(LineEvent::Token(token));
    }
    if chunk.done {
        events.push(LineEvent::Done);
    }
    if events.is_empty() {
        events.push(LineEvent::Skip);
    }
    events
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        if !request.stream {
            let response = self.send(request).await?;
            let (tx, rx) = mpsc::channel(1);
            let _ = tx
                .send(StreamingToken::Complete {
                    message: response.content,
                })
                .await;
            return Ok(rx);
        }

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);
        let response = self.post_generate(request).await?;
        let mut stream = response.bytes_stream();

        // Spawn task to process stream
        tokio::spawn(async move {
            let mut buffer: Vec<u8> = Vec::new();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                buffer.extend_from_slice(&bytes);

                // Parse newline-delimited JSON
                while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    for event in interpret_line(&line) {
                        match event {
                            LineEvent::Token(token) => {
                                full_response.push_str(&token);
                                if tx.send(StreamingToken::Token(token)).await.is_err() {
                                    // Receiver dropped, stop streaming
                                    tracing::debug!(
                                        "Token receiver dropped, abandoning Ollama stream"
                                    );
                                    return;
                                }
                            }
                            LineEvent::Done => {
                                let _ = tx
                                    .send(StreamingToken::Complete {
                                        message: full_response,
                                    })
                                    .await;
                                return;
                            }
                            LineEvent::Failed(message) => {
                                let _ = tx.send(StreamingToken::Error(message)).await;
                                return;
                            }
                            LineEvent::Skip => {}
                        }
                    }
                }
            }

            // Stream ended without done signal
            let _ = tx
                .send(StreamingToken::Error(
                    "Ollama closed the stream before the response was complete".to_string(),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();
        let request = LlmRequest {
            stream: false,
            ..request.clone()
        };
        let response = self.post_generate(&request).await?;

        let data: GenerateChunk = response
            .json()
            .await
            .context("Ollama returned a malformed response")?;

        if let Some(error) = data.error {
            anyhow::bail!("Ollama error: {error}");
        }

        Ok(LlmResponse {
            content: data.response.unwrap_or_default(),
            model: request.model.clone(),
            tokens_used: data.eval_count,
            duration_ms: Some(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)),
        })
    }
}
