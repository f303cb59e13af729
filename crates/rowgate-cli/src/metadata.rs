use std::fmt::{Display, Formatter};

use rowgate_core::{BreakerTrip, EngineError};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Request identifier (UUID v4) for end-to-end request tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Metadata attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub request_id: RequestId,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Metadata {
    pub fn new(latency_ms: u64, cache_hit: bool, attempts: u32) -> Self {
        Self {
            request_id: RequestId::new_v4(),
            generated_at: OffsetDateTime::now_utc(),
            latency_ms,
            cache_hit,
            attempts,
            warnings: Vec::new(),
        }
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// Structured error entry in the envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeError {
    pub code: String,
    pub message: String,
    pub kind: &'static str,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collected: Option<usize>,
}

impl EnvelopeError {
    pub fn from_engine(error: &EngineError) -> Self {
        Self {
            code: String::from(error.code()),
            message: error.to_string(),
            kind: error.kind().as_str(),
            retryable: error.is_retryable(),
            status: error.status(),
            collected: None,
        }
    }

    pub fn from_trip(trip: &BreakerTrip, collected: usize) -> Self {
        Self {
            code: format!("breaker_{}", trip.code()),
            message: trip.to_string(),
            kind: "partial",
            retryable: false,
            status: None,
            collected: Some(collected),
        }
    }

    pub fn with_collected(mut self, collected: usize) -> Self {
        self.collected = Some(collected);
        self
    }
}

/// Standard response envelope for all machine-readable output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub meta: Metadata,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<EnvelopeError>,
}
