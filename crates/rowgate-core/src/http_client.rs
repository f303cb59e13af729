use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

/// HTTP verbs used by the platform's REST surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Read calls are the only ones eligible for caching.
    pub const fn is_read(self) -> bool {
        matches!(self, Self::Get)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum HttpAuth {
    #[default]
    None,
    BearerToken(String),
    Header { name: String, value: String },
    UserToken(String),
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
            Self::UserToken(token) => {
                headers.insert(
                    String::from("authorization"),
                    format!("QB-USER-TOKEN {token}"),
                );
            }
        }
    }
}

// Credentials never reach logs through `{:?}`.
impl std::fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
            Self::Header { name, .. } => write!(f, "Header({name}: <redacted>)"),
            Self::UserToken(_) => f.write_str("UserToken(<redacted>)"),
        }
    }
}

/// HTTP request envelope handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_ms: 30_000,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// HTTP response envelope returned by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level failure, classified by the transport rather than by message text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("dns resolution failed: {0}")]
    DnsFailure(String),
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Network-class failures are transient; anything the transport could not
    /// place in a known class is treated as fatal.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Transport contract the request pipeline drives.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;
}

/// Production HTTP client backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::with_user_agent(concat!("rowgate/", env!("CARGO_PKG_VERSION")))
    }

    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(user_agent)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    /// Wrap a caller-configured reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };
            let mut builder = self.client.request(method, &request.url);

            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            builder = builder.timeout(Duration::from_millis(request.timeout_ms));

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|error| classify_reqwest_error(&error, request.timeout_ms))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| classify_reqwest_error(&error, request.timeout_ms))?;

            Ok(HttpResponse { status, body })
        })
    }
}

fn classify_reqwest_error(error: &reqwest::Error, timeout_ms: u64) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout { timeout_ms };
    }

    match io_error_kind(error) {
        Some(std::io::ErrorKind::ConnectionRefused) => {
            return TransportError::ConnectionRefused(error.to_string());
        }
        Some(
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof,
        ) => {
            return TransportError::ConnectionReset(error.to_string());
        }
        _ => {}
    }

    if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_body() || error.is_request() {
        TransportError::ConnectionReset(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

fn io_error_kind(error: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
            return Some(io_error.kind());
        }
        source = cause.source();
    }
    None
}

/// One scripted transport reaction.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Respond only after sleeping; used to exercise per-attempt deadlines.
    Delayed {
        delay: Duration,
        response: HttpResponse,
    },
}

/// Deterministic in-process transport: replays a FIFO script, then a fallback.
///
/// Every received request is recorded so tests can assert on attempt counts,
/// URLs and bodies.
#[derive(Debug)]
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    received: Mutex<Vec<HttpRequest>>,
}

impl Default for ScriptedHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHttpClient {
    /// Empty script whose fallback answers `200 {}`.
    pub fn new() -> Self {
        Self::with_fallback(ScriptedReply::Respond(HttpResponse::ok_json("{}")))
    }

    pub fn with_fallback(fallback: ScriptedReply) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: ScriptedReply) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    pub fn respond(&self, status: u16, body: impl Into<String>) -> &Self {
        self.push(ScriptedReply::Respond(HttpResponse::new(status, body)))
    }

    pub fn fail(&self, error: TransportError) -> &Self {
        self.push(ScriptedReply::Fail(error))
    }

    pub fn respond_after(&self, delay: Duration, status: u16, body: impl Into<String>) -> &Self {
        self.push(ScriptedReply::Delayed {
            delay,
            response: HttpResponse::new(status, body),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_reply(&self) -> ScriptedReply {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl HttpClient for ScriptedHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let reply = self.next_reply();

        Box::pin(async move {
            match reply {
                ScriptedReply::Respond(response) => Ok(response),
                ScriptedReply::Fail(error) => Err(error),
                ScriptedReply::Delayed { delay, response } => {
                    tokio::time::sleep(delay).await;
                    Ok(response)
                }
            }
        })
    }
}
