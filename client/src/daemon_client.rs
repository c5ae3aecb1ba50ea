//! Daemon Client
//!
//! HTTP client for the roleplay daemon. Session calls are plain JSON; a
//! message turn comes back as an NDJSON body that is fed chunk by chunk into
//! a [`StreamReassembler`], so the caller sees the reply grow while it
//! streams.

use anyhow::{bail, Context};
use futures::StreamExt;
use serde::Deserialize;

use roleplay_core::{
    ConversationMessage, ConversationState, CreateSessionRequest, Greeting, MessageId,
    MessageStatus, Session, SessionId, StreamReassembler,
};

/// Response of `POST /api/session`
#[derive(Debug, Deserialize)]
pub struct CreatedSession {
    /// New session identifier
    pub session_id: SessionId,
    /// Opening line, when the daemon generated one
    #[serde(default)]
    pub greeting: Option<Greeting>,
}

#[derive(Deserialize)]
struct SituationBody {
    situation: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Client for one daemon instance
#[derive(Clone, Debug)]
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    /// Create a client for the daemon at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a session
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> anyhow::Result<CreatedSession> {
        let response = self
            .http
            .post(self.url("/api/session"))
            .json(request)
            .send()
            .await
            .context("Failed to reach the daemon")?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Fetch a session with its history
    pub async fn get_session(&self, id: &SessionId) -> anyhow::Result<Session> {
        let response = self
            .http
            .get(self.url(&format!("/api/session/{id}")))
            .send()
            .await
            .context("Failed to reach the daemon")?;

        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Ask the daemon for a roleplay situation
    pub async fn suggest_situation(
        &self,
        learning_language: Option<&str>,
    ) -> anyhow::Result<String> {
        let mut request = self.http.get(self.url("/api/situation"));
        if let Some(language) = learning_language {
            request = request.query(&[("learning_language", language)]);
        }
        let response = request.send().await.context("Failed to reach the daemon")?;

        let response = check_status(response).await?;
        let body: SituationBody = response.json().await?;
        Ok(body.situation)
    }

    /// Send one learner message and stream the reply into `state`
    ///
    /// Once the daemon accepts the request, the user message and an open
    /// assistant message are appended to `state` and `render` is called with
    /// the assistant message after every chunk. A rejected request is an
    /// `Err` and leaves `state` untouched, matching the daemon's history.
    /// Failures after the response headers resolve the assistant message
    /// instead.
    pub async fn send_message<F>(
        &self,
        session_id: &SessionId,
        text: &str,
        model: Option<&str>,
        state: &mut ConversationState,
        mut render: F,
    ) -> anyhow::Result<MessageId>
    where
        F: FnMut(&ConversationMessage),
    {
        let response = self
            .http
            .post(self.url("/api/message"))
            .json(&serde_json::json!({
                "session_id": session_id,
                "text": text,
                "model": model,
            }))
            .send()
            .await
            .context("Failed to reach the daemon")?;
        let response = check_status(response).await?;

        state.push(ConversationMessage::user(text));
        let id = state.open_assistant();
        let mut reassembler = StreamReassembler::new(id.clone());
        let mut body = response.bytes_stream();

        let status = loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    let done = reassembler.push_chunk(&chunk, state);
                    if let Some(message) = state.get(&id) {
                        render(message);
                    }
                    if done {
                        break state.get(&id).map_or(MessageStatus::Error, |m| m.status);
                    }
                }
                Some(Err(e)) => break reassembler.fail(state, e),
                None => break reassembler.finish(state),
            }
        };

        if reassembler.decode_errors() > 0 {
            tracing::warn!(
                dropped = reassembler.decode_errors(),
                "Reply contained undecodable lines"
            );
        }
        tracing::debug!(message_id = %id, ?status, "Turn finished");
        Ok(id)
    }
}

/// Turn a non-success response into an error carrying the daemon's detail
async fn check_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = match response.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    bail!("{} ({})", detail, status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = DaemonClient::new("http://127.0.0.1:8000/");
        assert_eq!(client.url("/api/session"), "http://127.0.0.1:8000/api/session");
    }

    #[test]
    fn test_created_session_without_greeting() {
        let created: CreatedSession = serde_json::from_str(r#"{"session_id":"abc"}"#).unwrap();
        assert_eq!(created.session_id, SessionId::from("abc"));
        assert!(created.greeting.is_none());
    }

    #[test]
    fn test_created_session_with_greeting() {
        let created: CreatedSession = serde_json::from_str(
            r#"{"session_id":"abc","greeting":{"reply":"Ciao!","translation":"Hi!"}}"#,
        )
        .unwrap();
        let greeting = created.greeting.unwrap();
        assert_eq!(greeting.reply, "Ciao!");
        assert_eq!(greeting.translation, "Hi!");
    }
}
