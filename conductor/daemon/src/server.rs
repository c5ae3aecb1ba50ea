//! Daemon Server Implementation
//!
//! HTTP front end for the tutor:
//! - Session creation and lookup
//! - Per-turn NDJSON frame streams
//! - Situation suggestions
//! - CORS headers on every response, so a browser UI can call it directly
//!
//! # Routes
//!
//! ```text
//! POST    /api/session          create a session (optional greeting)
//! GET     /api/session/{id}     session snapshot with history
//! POST    /api/message          stream one turn as application/x-ndjson
//! GET     /api/situation        suggest a roleplay situation
//! GET     /api/health           model server reachability
//! OPTIONS *                     CORS preflight
//! ```
//!
//! Errors are JSON objects of the form `{"detail": "..."}`.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::Poll;

use anyhow::{Context, Result};
use hyper::body::{Bytes, HttpBody, Sender};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use roleplay_core::transport::encode;
use roleplay_core::{
    CreateSessionRequest, Greeting, LlmBackend, SessionId, SessionStore, Tutor, TutorError,
};

/// Content type of turn streams
pub const NDJSON: &str = "application/x-ndjson";

/// Largest accepted request body
const MAX_BODY_SIZE: usize = 64 * 1024;

/// Errors that map onto HTTP error responses
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiError {
    /// 400
    #[error("{0}")]
    BadRequest(String),
    /// 404
    #[error("{0}")]
    NotFound(String),
    /// 413
    #[error("request body too large")]
    PayloadTooLarge,
    /// 503
    #[error("{0}")]
    Unavailable(String),
}

impl ApiError {
    /// HTTP status for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn into_response(self) -> Response<Body> {
        let status = self.status();
        json_response(
            status,
            &ErrorBody {
                detail: self.to_string(),
            },
        )
    }
}

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        match err {
            TutorError::NotFound(_) => Self::NotFound("session not found".to_string()),
            TutorError::InvalidInput(reason) => Self::BadRequest(reason),
            TutorError::Backend(reason) => Self::Unavailable(reason),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

#[derive(Serialize)]
struct CreatedBody {
    session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    greeting: Option<Greeting>,
}

#[derive(Deserialize)]
struct MessageBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Serialize)]
struct SituationBody {
    situation: String,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    backend: String,
}

/// The HTTP server
pub struct ApiServer<B: LlmBackend, S: SessionStore> {
    tutor: Arc<Tutor<B, S>>,
    addr: SocketAddr,
}

impl<B: LlmBackend + 'static, S: SessionStore + 'static> ApiServer<B, S> {
    /// Create a server for `tutor` listening on `addr`
    pub fn new(tutor: Tutor<B, S>, addr: SocketAddr) -> Self {
        Self {
            tutor: Arc::new(tutor),
            addr,
        }
    }

    /// Serve until `shutdown` resolves, then finish in-flight requests
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if let Err(e) = self.tutor.check_backend().await {
            warn!(error = %e, "Model server not reachable yet, turns will fail until it is");
        }

        let tutor = self.tutor;
        let make_svc = make_service_fn(move |_conn| {
            let tutor = Arc::clone(&tutor);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(Arc::clone(&tutor), req)))
            }
        });

        let server = Server::try_bind(&self.addr)
            .with_context(|| format!("Failed to bind to {}", self.addr))?
            .serve(make_svc);
        info!(addr = %server.local_addr(), "Listening for HTTP requests");

        server
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server error")
    }
}

/// Handle one request; never fails at the hyper level
pub async fn handle<B, S>(
    tutor: Arc<Tutor<B, S>>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible>
where
    B: LlmBackend + 'static,
    S: SessionStore + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match route(tutor, req).await {
        Ok(response) => response,
        Err(e) => {
            debug!(%method, %path, error = %e, "Request rejected");
            e.into_response()
        }
    };
    add_cors_headers(&mut response);
    debug!(%method, %path, status = %response.status(), "Request handled");
    Ok(response)
}

async fn route<B, S>(
    tutor: Arc<Tutor<B, S>>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError>
where
    B: LlmBackend + 'static,
    S: SessionStore + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().trim_end_matches('/').to_string();

    match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => Ok(empty_response(StatusCode::NO_CONTENT)),
        (&Method::POST, "/api/session") => create_session(&tutor, req).await,
        (&Method::GET, p) if p.starts_with("/api/session/") => {
            let id = &p["/api/session/".len()..];
            get_session(&tutor, id).await
        }
        (&Method::POST, "/api/message") => send_message(&tutor, req).await,
        (&Method::GET, "/api/situation") => {
            let language = query_param(req.uri().query(), "learning_language");
            let situation = tutor.suggest_situation(language.as_deref()).await;
            Ok(json_response(StatusCode::OK, &SituationBody { situation }))
        }
        (&Method::GET, "/api/health") => {
            tutor.check_backend().await?;
            Ok(json_response(
                StatusCode::OK,
                &HealthBody {
                    status: "ok",
                    backend: tutor.backend().name().to_string(),
                },
            ))
        }
        _ => Err(ApiError::NotFound("not found".to_string())),
    }
}

async fn create_session<B, S>(
    tutor: &Tutor<B, S>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError>
where
    B: LlmBackend + 'static,
    S: SessionStore + 'static,
{
    let body = read_body(req).await?;
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        parse_json(&body)?
    };

    let created = tutor.create_session(request).await?;
    Ok(json_response(
        StatusCode::OK,
        &CreatedBody {
            session_id: created.session.id,
            greeting: created.greeting,
        },
    ))
}

async fn get_session<B, S>(tutor: &Tutor<B, S>, id: &str) -> Result<Response<Body>, ApiError>
where
    B: LlmBackend + 'static,
    S: SessionStore + 'static,
{
    let session = tutor.get_session(&SessionId::from(id)).await?;
    Ok(json_response(StatusCode::OK, &session))
}

async fn send_message<B, S>(
    tutor: &Tutor<B, S>,
    req: Request<Body>,
) -> Result<Response<Body>, ApiError>
where
    B: LlmBackend + 'static,
    S: SessionStore + 'static,
{
    let body: MessageBody = parse_json(&read_body(req).await?)?;
    let session_id = SessionId(body.session_id.unwrap_or_default());
    let text = body.text.unwrap_or_default();
    info!(session_id = %session_id, chars = text.chars().count(), "Received message");

    let mut frames = tutor.send_message(&session_id, &text, body.model).await?;

    let (mut sender, stream_body) = Body::channel();
    tokio::spawn(async move {
        loop {
            // Dropping `frames` cancels the turn
            let frame = tokio::select! {
                frame = frames.recv() => frame,
                () = hung_up(&mut sender) => {
                    info!(session_id = %session_id, "Client disconnected mid-stream");
                    return;
                }
            };
            let Some(frame) = frame else {
                return;
            };

            let line = match encode(&frame) {
                Ok(line) => line,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to encode frame");
                    sender.abort();
                    return;
                }
            };
            if sender.send_data(Bytes::from(line)).await.is_err() {
                info!(session_id = %session_id, "Client disconnected mid-stream");
                return;
            }
        }
    });

    let mut response = Response::new(stream_body);
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(NDJSON));
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-cache"));
    Ok(response)
}

/// Resolves once the connection has dropped the response body
async fn hung_up(sender: &mut Sender) {
    std::future::poll_fn(|cx| match sender.poll_ready(cx) {
        Poll::Ready(Err(_)) => Poll::Ready(()),
        _ => Poll::Pending,
    })
    .await;
}

/// Read a request body of at most [`MAX_BODY_SIZE`] bytes
///
/// A declared `Content-Length` over the limit is rejected before reading;
/// otherwise reading stops at the first chunk that crosses it.
async fn read_body(req: Request<Body>) -> Result<Bytes, ApiError> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_SIZE) {
        return Err(ApiError::PayloadTooLarge);
    }

    let mut body = req.into_body();
    let mut bytes = Vec::with_capacity(declared.unwrap_or(0));
    while let Some(chunk) = body.data().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        if bytes.len() + chunk.len() > MAX_BODY_SIZE {
            return Err(ApiError::PayloadTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(bytes))
}

fn parse_json<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

/// First value of `key` in a query string, percent-decoded
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if k != key {
            return None;
        }
        let v = v.replace('+', " ");
        urlencoding::decode(&v).ok().map(|v| v.into_owned())
    })
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            warn!(error = %e, "Failed to serialize response");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn add_cors_headers(response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("*"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use roleplay_core::{
        Frame, InMemorySessionStore, LlmRequest, LlmResponse, Section, StreamingToken, TutorConfig,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockBackend {
        /// Stream marker-free text until the receiver closes, then set this
        endless: Option<Arc<AtomicBool>>,
    }

    #[async_trait::async_trait]
    impl LlmBackend for MockBackend {
        fn name(&self) -> &str {
            "Mock"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            _request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            let (tx, rx) = mpsc::channel(4);
            if let Some(closed) = self.endless.clone() {
                tokio::spawn(async move {
                    while tx.send(StreamingToken::Token("mm ".to_string())).await.is_ok() {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                    }
                    closed.store(true, Ordering::SeqCst);
                });
                return Ok(rx);
            }
            tokio::spawn(async move {
                let _ = tx
                    .send(StreamingToken::Token(
                        "<reply>Ciao!</reply><translation>Hi!</translation>".to_string(),
                    ))
                    .await;
                let _ = tx
                    .send(StreamingToken::Complete {
                        message: String::new(),
                    })
                    .await;
            });
            Ok(rx)
        }

        async fn send(&self, _request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            Ok(LlmResponse {
                content: "Ordering gelato".to_string(),
                model: "mock".to_string(),
                tokens_used: None,
                duration_ms: None,
            })
        }
    }

    fn tutor() -> Arc<Tutor<MockBackend, InMemorySessionStore>> {
        tutor_with(MockBackend::default())
    }

    fn tutor_with(backend: MockBackend) -> Arc<Tutor<MockBackend, InMemorySessionStore>> {
        Arc::new(Tutor::new(
            backend,
            InMemorySessionStore::new(),
            TutorConfig::default(),
        ))
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(
        tutor: &Arc<Tutor<MockBackend, InMemorySessionStore>>,
        req: Request<Body>,
    ) -> (StatusCode, Response<Body>) {
        let response = handle(Arc::clone(tutor), req).await.unwrap();
        (response.status(), response)
    }

    async fn json(response: Response<Body>) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(tutor: &Arc<Tutor<MockBackend, InMemorySessionStore>>) -> String {
        let (status, response) = call(
            tutor,
            request(Method::POST, "/api/session", r#"{"learning_language":"Italian"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        json(response).await["session_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let tutor = tutor();
        let id = create(&tutor).await;

        let uri = format!("/api/session/{id}");
        let (status, response) = call(&tutor, request(Method::GET, &uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers()["Access-Control-Allow-Origin"],
            HeaderValue::from_static("*")
        );
        let body = json(response).await;
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["learning_language"], "Italian");
        assert_eq!(body["native_language"], "English");
        assert_eq!(body["messages"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let tutor = tutor();
        let (status, response) =
            call(&tutor, request(Method::GET, "/api/session/missing", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(response).await["detail"], "session not found");

        let (status, _) = call(
            &tutor,
            request(
                Method::POST,
                "/api/message",
                r#"{"session_id":"missing","text":"Ciao"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_message_validation() {
        let tutor = tutor();
        let id = create(&tutor).await;

        let (status, response) = call(
            &tutor,
            request(Method::POST, "/api/message", &format!(r#"{{"session_id":"{id}"}}"#)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["detail"], "missing text");

        let (status, _) = call(&tutor, request(Method::POST, "/api/message", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let oversized = " ".repeat(MAX_BODY_SIZE + 1);
        let (status, _) = call(&tutor, request(Method::POST, "/api/session", &oversized)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_streamed_body_stops_at_limit() {
        let tutor = tutor();

        // No Content-Length, and far more data on offer than the limit
        let (mut sender, body) = Body::channel();
        let feeder = tokio::spawn(async move {
            let mut sent = 0;
            let chunk = Bytes::from(vec![b' '; 8 * 1024]);
            while sent < 64 && sender.send_data(chunk.clone()).await.is_ok() {
                sent += 1;
            }
            sent
        });
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/session")
            .body(body)
            .unwrap();

        let (status, _) = call(&tutor, req).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let sent = feeder.await.unwrap();
        assert!(sent < 64, "whole body was read: {sent} chunks");
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected_unread() {
        let tutor = tutor();

        // The body never arrives, so only the header can decide
        let (_sender, body) = Body::channel();
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/message")
            .header(CONTENT_LENGTH, MAX_BODY_SIZE + 1)
            .body(body)
            .unwrap();

        let (status, response) = tokio::time::timeout(Duration::from_secs(1), call(&tutor, req))
            .await
            .expect("body was awaited despite the declared length");
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json(response).await["detail"], "request body too large");
    }

    #[tokio::test]
    async fn test_message_streams_ndjson_frames() {
        let tutor = tutor();
        let id = create(&tutor).await;

        let (status, response) = call(
            &tutor,
            request(
                Method::POST,
                "/api/message",
                &format!(r#"{{"session_id":"{id}","text":"Buongiorno"}}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], HeaderValue::from_static(NDJSON));

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let frames: Vec<Frame> = std::str::from_utf8(&bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            frames,
            vec![
                Frame::section(Section::Reply, "Ciao!"),
                Frame::section(Section::Translation, "Hi!"),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_response_releases_backend() {
        let closed = Arc::new(AtomicBool::new(false));
        let tutor = tutor_with(MockBackend {
            endless: Some(Arc::clone(&closed)),
        });
        let id = create(&tutor).await;

        let (status, response) = call(
            &tutor,
            request(
                Method::POST,
                "/api/message",
                &format!(r#"{{"session_id":"{id}","text":"Pronto?"}}"#),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(response);

        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(closed.load(Ordering::SeqCst), "backend still streaming");
    }

    #[tokio::test]
    async fn test_situation_options_and_unknown_route() {
        let tutor = tutor();

        let (status, response) = call(
            &tutor,
            request(Method::GET, "/api/situation?learning_language=Italian", ""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(response).await["situation"], "Ordering gelato");

        let (status, response) = call(&tutor, request(Method::OPTIONS, "/api/message", "")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(response.headers().contains_key("Access-Control-Allow-Methods"));

        let (status, _) = call(&tutor, request(Method::GET, "/nowhere", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, response) = call(&tutor, request(Method::GET, "/api/health", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(response).await["backend"], "Mock");
    }

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("a=1&learning_language=Brazilian%20Portuguese"), "learning_language"),
            Some("Brazilian Portuguese".to_string())
        );
        assert_eq!(
            query_param(Some("learning_language=Old+Norse"), "learning_language"),
            Some("Old Norse".to_string())
        );
        assert_eq!(query_param(Some("other=x"), "learning_language"), None);
        assert_eq!(query_param(None, "learning_language"), None);
    }

    #[test]
    fn test_tutor_errors_map_to_status() {
        assert_eq!(
            ApiError::from(TutorError::NotFound(SessionId::from("x"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(TutorError::InvalidInput("missing text".to_string())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(TutorError::Backend("down".to_string())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
