use serde_json::Value;
use thiserror::Error;

use crate::http_client::TransportError;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Upstream rate limiting, timeouts, 5xx and network-class failures.
    Transient,
    /// The remote service rejected the request; retrying will not help.
    Fatal,
    /// Our own pipeline is broken (bad configuration, undecodable body).
    Local,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
            Self::Local => "local",
        }
    }
}

/// Construction-time validation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("requests_per_window must be greater than zero")]
    ZeroRequestsPerWindow,
    #[error("window_length must be greater than zero")]
    ZeroWindow,
    #[error("per_request_timeout must be greater than zero")]
    ZeroRequestTimeout,
    #[error("backoff_factor must be finite and >= 1.0, got {value}")]
    InvalidBackoffFactor { value: String },
    #[error("jitter_fraction must be within [0, 1), got {value}")]
    InvalidJitter { value: String },
    #[error("base_retry_delay ({base_ms}ms) exceeds max_retry_delay ({max_ms}ms)")]
    RetryDelayOrder { base_ms: u128, max_ms: u128 },
    #[error("per_page_limit must be greater than zero")]
    ZeroPageSize,
    #[error("max_iterations must be greater than zero")]
    ZeroIterations,
    #[error("base url must start with http:// or https://: '{value}'")]
    InvalidBaseUrl { value: String },
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// Error produced by the request engine for one logical call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("remote returned status {status}: {message}")]
    Remote {
        status: u16,
        message: String,
        body: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to decode response body: {message}")]
    Decode { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Build a remote error from a non-success response, lifting the
    /// platform's `message`/`description` fields when the body carries them.
    pub fn from_response(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = remote_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
        Self::Remote {
            status,
            message,
            body,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Remote { status, .. } => {
                if is_transient_status(*status) {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Transport(error) => {
                if error.is_transient() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Fatal
                }
            }
            Self::Decode { .. } | Self::Config(_) => ErrorKind::Local,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable reason: the platform's message for remote failures,
    /// otherwise the rendered error.
    pub fn message(&self) -> String {
        match self {
            Self::Remote { message, .. } | Self::Decode { message } => message.clone(),
            Self::Transport(error) => error.to_string(),
            Self::Config(error) => error.to_string(),
        }
    }

    /// Raw remote payload, when the failure came with one.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Remote { body, .. } => Some(body.as_str()),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Remote { status: 429, .. } => "rate_limited",
            Self::Remote { status: 408, .. } => "remote_timeout",
            Self::Remote { status, .. } if *status >= 500 => "remote_unavailable",
            Self::Remote { .. } => "remote_rejected",
            Self::Transport(TransportError::Timeout { .. }) => "timeout",
            Self::Transport(_) => "transport",
            Self::Decode { .. } => "decode",
            Self::Config(_) => "config",
        }
    }
}

/// 408, 429 and every 5xx are worth another attempt.
pub const fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (status >= 500 && status < 600)
}

fn remote_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value.get("message").and_then(Value::as_str)?;
    match value.get("description").and_then(Value::as_str) {
        Some(description) if !description.is_empty() => Some(format!("{message}: {description}")),
        _ => Some(message.to_owned()),
    }
}
