//! # Rowgate Core
//!
//! The resilient request engine behind the rowgate table-platform connector.
//!
//! ## Overview
//!
//! Every resource wrapper (tables, fields, records, apps, users, groups,
//! webhooks, relationships) reduces to "execute this logical request". This
//! crate turns that intent into a safe network call:
//!
//! - **Rate limiting** with a FIFO-serialized sliding window
//! - **Caching** of read responses with lazy TTL expiry
//! - **Retries** with exponential backoff and jitter for transient failures
//! - **Per-attempt deadlines** so a hung call never stalls the retry loop
//! - **Bounded pagination** with breakers against runaway loops
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL cache with enable/disable and prefix invalidation |
//! | [`config`] | Engine, connection and pagination settings |
//! | [`error`] | Engine error taxonomy |
//! | [`http_client`] | Transport trait, reqwest and scripted transports |
//! | [`pagination`] | Multi-page fetch loop and record queries |
//! | [`pipeline`] | The request pipeline |
//! | [`request`] | Request descriptors and cache keys |
//! | [`retry`] | Backoff and retry policy |
//! | [`throttling`] | Sliding-window rate limiter |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rowgate_core::{
//!     ConnectionConfig, EngineConfig, RequestDescriptor, RequestPipeline, ReqwestHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = RequestPipeline::new(
//!         &EngineConfig::from_env()?,
//!         ConnectionConfig::from_env(),
//!         Arc::new(ReqwestHttpClient::new()),
//!     )?;
//!
//!     let app = pipeline.execute(&RequestDescriptor::get("/v1/apps/bqx7")).await?;
//!     println!("{}", app.body);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ RequestDescriptor│
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐  hit  ┌──────────────┐
//! │ RequestPipeline  │──────▶│ CacheStore   │
//! └────────┬─────────┘       └──────────────┘
//!          │ miss
//!          ▼
//! ┌──────────────────┐       ┌──────────────┐
//! │ RetryPolicy loop │──────▶│ RateLimiter  │
//! └────────┬─────────┘       └──────────────┘
//!          ▼
//! ┌──────────────────┐
//! │ HttpClient       │  (per-attempt timeout)
//! └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use rowgate_core::{EngineError, ErrorKind};
//!
//! fn describe(error: &EngineError) -> &'static str {
//!     match error.kind() {
//!         ErrorKind::Transient => "remote busy; retries exhausted",
//!         ErrorKind::Fatal => "remote rejected the request",
//!         ErrorKind::Local => "local pipeline fault",
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod pagination;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod throttling;

pub use cache::CacheStore;
pub use config::{
    ConnectionConfig, EngineConfig, PaginationConfig, DEFAULT_BASE_URL, DEFAULT_USER_AGENT,
};
pub use error::{ConfigError, EngineError, ErrorKind};
pub use http_client::{
    HttpAuth, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient, ScriptedReply, TransportError,
};
pub use pagination::{
    BreakerTrip, FetchError, FetchTermination, Page, PageParams, PagedQuery, PagedResult,
    PaginatedFetch, QueryMetadata, QueryPage, RecordQuery,
};
pub use pipeline::{Executed, RequestPipeline, RequestPipelineBuilder};
pub use request::{CacheKey, RequestDescriptor};
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use throttling::{Admission, RateLimiter};
