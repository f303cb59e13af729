//! Bounded multi-page fetching on top of [`RequestPipeline`].
//!
//! Pages are requested strictly one after another. Every run ends in one of
//! four ways, reported through [`FetchTermination`]:
//!
//! | Termination | Meaning |
//! |-------------|---------|
//! | `Exhausted` | the server returned an empty or short page; no more data exists |
//! | `BudgetMet` | the caller's record budget was filled |
//! | `Aborted`   | a breaker tripped; records collected so far are kept |
//! | `Failed`    | a page request failed after retries; earlier pages are kept |
//!
//! Breakers are checked before each page request, never during one. A run can
//! therefore overshoot `max_duration` by the time one page takes, which is
//! bounded by `(max_retries + 1) * per_request_timeout` plus backoff sleeps
//! and rate-limiter waits.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::PaginationConfig;
use crate::error::{ConfigError, EngineError};
use crate::http_client::HttpMethod;
use crate::pipeline::RequestPipeline;
use crate::request::RequestDescriptor;

/// Records from one page plus whatever total the server reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<Value>,
    pub server_total: Option<u64>,
}

/// A logical query that can be issued one page at a time.
pub trait PagedQuery: Send + Sync {
    fn page_request(&self, skip: u64, top: u64) -> RequestDescriptor;

    fn parse_page(&self, body: Value) -> Result<Page, EngineError>;
}

/// Body of a record query response. Fields the engine does not model are kept
/// in `extra` instead of being merged into the typed view.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryPage {
    #[serde(default)]
    pub data: Vec<Value>,
    #[serde(default)]
    pub metadata: Option<QueryMetadata>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub total_records: Option<u64>,
    pub num_records: Option<u64>,
    pub skip: Option<u64>,
    pub top: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Where `skip`/`top` travel on each page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageParams {
    /// Injected as `options.skip` / `options.top` in the JSON body.
    Body,
    /// Sent as `skip` / `top` query parameters.
    Query,
}

/// Stock [`PagedQuery`] for the platform's record query and list endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    method: HttpMethod,
    path: String,
    body: Map<String, Value>,
    params: PageParams,
}

impl RecordQuery {
    /// `POST /v1/records/query` against one table.
    pub fn records(table_id: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert(String::from("from"), Value::String(table_id.into()));
        Self {
            method: HttpMethod::Post,
            path: String::from("/v1/records/query"),
            body,
            params: PageParams::Body,
        }
    }

    /// A GET listing that pages through `skip`/`top` query parameters.
    pub fn listing(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: Map::new(),
            params: PageParams::Query,
        }
    }

    pub fn with_select(mut self, field_ids: &[u32]) -> Self {
        self.body.insert(
            String::from("select"),
            Value::Array(field_ids.iter().map(|id| Value::from(*id)).collect()),
        );
        self
    }

    pub fn with_where(mut self, clause: impl Into<String>) -> Self {
        self.body
            .insert(String::from("where"), Value::String(clause.into()));
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.body.insert(name.into(), value);
        self
    }
}

impl PagedQuery for RecordQuery {
    fn page_request(&self, skip: u64, top: u64) -> RequestDescriptor {
        match self.params {
            PageParams::Query => RequestDescriptor::new(self.method, self.path.clone())
                .with_query("skip", skip)
                .with_query("top", top),
            PageParams::Body => {
                let mut body = self.body.clone();
                let options = body
                    .entry("options")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(options) = options {
                    options.insert(String::from("skip"), Value::from(skip));
                    options.insert(String::from("top"), Value::from(top));
                }
                RequestDescriptor::new(self.method, self.path.clone()).with_body(Value::Object(body))
            }
        }
    }

    fn parse_page(&self, body: Value) -> Result<Page, EngineError> {
        // Some listings answer with a bare array.
        if let Value::Array(records) = body {
            return Ok(Page {
                records,
                server_total: None,
            });
        }

        let page: QueryPage = serde_json::from_value(body)
            .map_err(|error| EngineError::decode(format!("record page: {error}")))?;
        Ok(Page {
            server_total: page.metadata.and_then(|metadata| metadata.total_records),
            records: page.data,
        })
    }
}

/// Which safety bound stopped a run.
///
/// `MaxDuration` is evaluated between pages, so the elapsed time it reports
/// may exceed the limit by up to one page's worth of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    MaxIterations { limit: u32 },
    MaxDuration { limit: Duration, elapsed: Duration },
    NonMonotonicSkip { previous: u64, next: u64 },
}

impl BreakerTrip {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MaxIterations { .. } => "max_iterations",
            Self::MaxDuration { .. } => "max_duration",
            Self::NonMonotonicSkip { .. } => "non_monotonic_skip",
        }
    }
}

impl Display for BreakerTrip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxIterations { limit } => write!(f, "page limit of {limit} requests reached"),
            Self::MaxDuration { limit, elapsed } => write!(
                f,
                "pagination ran {}ms, over the {}ms limit",
                elapsed.as_millis(),
                limit.as_millis()
            ),
            Self::NonMonotonicSkip { previous, next } => {
                write!(f, "skip did not advance ({previous} -> {next})")
            }
        }
    }
}

/// How a paginated run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchTermination {
    Exhausted,
    /// A reported server total decides `more_available`: `Some(true)` when it
    /// exceeds the records consumed, `Some(false)` when it was reached. With
    /// no total, a truncated or full last page gives `Some(true)`. `None`
    /// only when no page was fetched at all.
    BudgetMet { more_available: Option<bool> },
    Aborted(BreakerTrip),
    Failed(EngineError),
}

/// Everything a paginated run collected.
#[derive(Debug, Clone, PartialEq)]
pub struct PagedResult {
    pub records: Vec<Value>,
    pub total_collected: usize,
    pub pages_fetched: u32,
    pub skips: Vec<u64>,
    pub server_total: Option<u64>,
    pub elapsed: Duration,
    pub termination: FetchTermination,
}

impl PagedResult {
    pub fn is_complete(&self) -> bool {
        matches!(
            self.termination,
            FetchTermination::Exhausted | FetchTermination::BudgetMet { .. }
        )
    }

    /// True when the run knows the server holds records it did not return.
    pub fn more_available(&self) -> bool {
        matches!(
            self.termination,
            FetchTermination::BudgetMet {
                more_available: Some(true)
            }
        )
    }

    /// Records when the run completed; otherwise an error carrying what went
    /// wrong and how much was salvaged.
    pub fn into_complete(self) -> Result<Vec<Value>, FetchError> {
        let collected = self.total_collected;
        match self.termination {
            FetchTermination::Exhausted | FetchTermination::BudgetMet { .. } => Ok(self.records),
            FetchTermination::Aborted(trip) => Err(FetchError::Aborted { trip, collected }),
            FetchTermination::Failed(source) => Err(FetchError::Failed { source, collected }),
        }
    }
}

/// Partial-failure outcomes for callers that want all-or-nothing semantics.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("pagination aborted after {collected} records: {trip}")]
    Aborted { trip: BreakerTrip, collected: usize },
    #[error("page request failed after {collected} records: {source}")]
    Failed {
        #[source]
        source: EngineError,
        collected: usize,
    },
}

/// Bookkeeping for one run.
#[derive(Debug)]
struct PageState {
    records: Vec<Value>,
    skip: u64,
    remaining: u64,
    iterations: u32,
    skips: Vec<u64>,
    server_total: Option<u64>,
}

impl PageState {
    fn new(config: &PaginationConfig) -> Self {
        Self {
            records: Vec::new(),
            skip: config.starting_skip,
            remaining: config.record_budget,
            iterations: 0,
            skips: Vec::new(),
            server_total: None,
        }
    }

    fn append(&mut self, records: Vec<Value>) {
        self.remaining = self.remaining.saturating_sub(records.len() as u64);
        self.records.extend(records);
    }

    /// Only reached after a page that filled its request, or before any page.
    fn more_available_after_full_page(&self) -> Option<bool> {
        match self.server_total {
            Some(total) => Some(total > self.skip),
            None if self.iterations > 0 => Some(true),
            None => None,
        }
    }

    fn finish(self, termination: FetchTermination, elapsed: Duration) -> PagedResult {
        PagedResult {
            total_collected: self.records.len(),
            records: self.records,
            pages_fetched: self.iterations,
            skips: self.skips,
            server_total: self.server_total,
            elapsed,
            termination,
        }
    }
}

/// Drives a [`PagedQuery`] through a [`RequestPipeline`] within the bounds of
/// a [`PaginationConfig`].
#[derive(Debug)]
pub struct PaginatedFetch<'a> {
    pipeline: &'a RequestPipeline,
    config: PaginationConfig,
}

impl<'a> PaginatedFetch<'a> {
    pub fn new(pipeline: &'a RequestPipeline, config: PaginationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { pipeline, config })
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    pub async fn run<Q: PagedQuery + ?Sized>(&self, query: &Q) -> PagedResult {
        let started = Instant::now();
        let mut state = PageState::new(&self.config);

        let termination = loop {
            if state.remaining == 0 {
                break FetchTermination::BudgetMet {
                    more_available: state.more_available_after_full_page(),
                };
            }
            if state.iterations >= self.config.max_iterations {
                break FetchTermination::Aborted(BreakerTrip::MaxIterations {
                    limit: self.config.max_iterations,
                });
            }
            let elapsed = started.elapsed();
            if elapsed >= self.config.max_duration {
                break FetchTermination::Aborted(BreakerTrip::MaxDuration {
                    limit: self.config.max_duration,
                    elapsed,
                });
            }

            let top = state.remaining.min(self.config.per_page_limit);
            let descriptor = query.page_request(state.skip, top);
            state.iterations += 1;
            state.skips.push(state.skip);

            let page = match self.pipeline.execute(&descriptor).await {
                Ok(executed) => match query.parse_page(executed.body) {
                    Ok(page) => page,
                    Err(error) => break FetchTermination::Failed(error),
                },
                Err(error) => break FetchTermination::Failed(error),
            };
            if page.server_total.is_some() {
                state.server_total = page.server_total;
            }

            let mut records = page.records;
            let received = records.len() as u64;
            if received == 0 {
                break FetchTermination::Exhausted;
            }

            let next_skip = state.skip.saturating_add(received);
            if next_skip <= state.skip {
                break FetchTermination::Aborted(BreakerTrip::NonMonotonicSkip {
                    previous: state.skip,
                    next: next_skip,
                });
            }

            if received > state.remaining {
                records.truncate(state.remaining as usize);
                state.append(records);
                state.skip = next_skip;
                break FetchTermination::BudgetMet {
                    more_available: Some(true),
                };
            }

            state.append(records);
            state.skip = next_skip;

            if received < top {
                break FetchTermination::Exhausted;
            }
        };

        let elapsed = started.elapsed();
        match &termination {
            FetchTermination::Aborted(trip) => warn!(
                breaker = trip.code(),
                reason = %trip,
                collected = state.records.len(),
                pages = state.iterations,
                "pagination breaker tripped; returning partial records"
            ),
            FetchTermination::Failed(error) => warn!(
                error = %error,
                collected = state.records.len(),
                pages = state.iterations,
                "page request failed; returning partial records"
            ),
            FetchTermination::Exhausted | FetchTermination::BudgetMet { .. } => info!(
                collected = state.records.len(),
                pages = state.iterations,
                elapsed_ms = elapsed.as_millis() as u64,
                "pagination complete"
            ),
        }

        state.finish(termination, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::{ConnectionConfig, EngineConfig};
    use crate::http_client::ScriptedHttpClient;

    fn page_body(start: u64, count: u64, total: Option<u64>) -> String {
        let data = (start..start + count)
            .map(|id| json!({"3": {"value": id}}))
            .collect::<Vec<_>>();
        let mut body = json!({ "data": data, "fields": [] });
        if let Some(total) = total {
            body["metadata"] = json!({
                "totalRecords": total,
                "numRecords": count,
                "skip": start,
                "numFields": 1,
            });
        }
        body.to_string()
    }

    fn pipeline(client: Arc<ScriptedHttpClient>) -> RequestPipeline {
        let config = EngineConfig {
            requests_per_window: 1_000,
            base_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(2),
            max_retries: 1,
            ..EngineConfig::default()
        };
        RequestPipeline::new(&config, ConnectionConfig::new("https://api.example.test"), client)
            .expect("valid pipeline")
    }

    #[test]
    fn record_query_injects_paging_options_into_body() {
        let query = RecordQuery::records("bck7")
            .with_select(&[3, 6])
            .with_where("{6.EX.'open'}");

        let descriptor = query.page_request(2_000, 500);

        assert_eq!(descriptor.method, HttpMethod::Post);
        assert_eq!(descriptor.path, "/v1/records/query");
        assert_eq!(
            descriptor.body,
            Some(json!({
                "from": "bck7",
                "select": [3, 6],
                "where": "{6.EX.'open'}",
                "options": {"skip": 2000, "top": 500},
            }))
        );
    }

    #[test]
    fn listing_pages_through_query_parameters() {
        let descriptor = RecordQuery::listing("/v1/reports").page_request(10, 5);
        assert_eq!(descriptor.target(), "/v1/reports?skip=10&top=5");
    }

    #[test]
    fn query_page_keeps_unmodelled_fields_aside() {
        let page: QueryPage = serde_json::from_value(json!({
            "data": [{"3": {"value": 1}}],
            "fields": [{"id": 3, "label": "Record ID#"}],
            "metadata": {"totalRecords": 10, "numRecords": 1, "numFields": 1, "skip": 0},
        }))
        .expect("page parses");

        assert_eq!(page.data.len(), 1);
        assert!(page.extra.contains_key("fields"));
        let metadata = page.metadata.expect("metadata present");
        assert_eq!(metadata.total_records, Some(10));
        assert_eq!(metadata.extra.get("numFields"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn truncates_oversized_page_to_budget() {
        let client = Arc::new(ScriptedHttpClient::new());
        // Server ignores `top` and returns more than asked.
        client.respond(200, page_body(0, 50, None));
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 100,
                record_budget: 30,
                ..PaginationConfig::default()
            },
        )
        .expect("valid config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(result.total_collected, 30);
        assert_eq!(
            result.termination,
            FetchTermination::BudgetMet {
                more_available: Some(true)
            }
        );
        assert!(result.more_available());
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn reported_total_resolves_more_available() {
        let client = Arc::new(ScriptedHttpClient::new());
        client
            .respond(200, page_body(0, 10, Some(25)))
            .respond(200, page_body(10, 10, Some(25)));
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 10,
                record_budget: 20,
                ..PaginationConfig::default()
            },
        )
        .expect("valid config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(result.total_collected, 20);
        assert_eq!(result.server_total, Some(25));
        assert!(result.more_available());
    }

    #[tokio::test]
    async fn full_last_page_without_total_reports_more_available() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.respond(200, page_body(0, 10, None));
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 10,
                record_budget: 10,
                ..PaginationConfig::default()
            },
        )
        .expect("valid config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(result.total_collected, 10);
        assert_eq!(
            result.termination,
            FetchTermination::BudgetMet {
                more_available: Some(true)
            }
        );
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn reported_total_reached_exactly_reports_nothing_more() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.respond(200, page_body(0, 10, Some(10)));
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 10,
                record_budget: 10,
                ..PaginationConfig::default()
            },
        )
        .expect("valid config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(
            result.termination,
            FetchTermination::BudgetMet {
                more_available: Some(false)
            }
        );
    }

    #[tokio::test]
    async fn skip_pinned_at_maximum_trips_breaker_and_keeps_records() {
        let client = Arc::new(ScriptedHttpClient::new());
        client
            .respond(200, page_body(0, 1, None))
            .respond(200, page_body(1, 1, None));
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                starting_skip: u64::MAX - 1,
                per_page_limit: 1,
                record_budget: 10,
                ..PaginationConfig::default()
            },
        )
        .expect("valid config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(
            result.termination,
            FetchTermination::Aborted(BreakerTrip::NonMonotonicSkip {
                previous: u64::MAX,
                next: u64::MAX,
            })
        );
        assert_eq!(result.total_collected, 1);
        assert_eq!(result.skips, vec![u64::MAX - 1, u64::MAX]);
        assert_eq!(client.request_count(), 2);
        assert!(matches!(
            result.into_complete(),
            Err(FetchError::Aborted { collected: 1, .. })
        ));
    }

    #[tokio::test]
    async fn empty_first_page_is_exhausted() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.respond(200, r#"{"data":[]}"#);
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(&pipeline, PaginationConfig::default()).expect("config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(result.termination, FetchTermination::Exhausted);
        assert!(result.records.is_empty());
        assert!(result.is_complete());
    }

    #[tokio::test]
    async fn undecodable_page_fails_with_partial_records() {
        let client = Arc::new(ScriptedHttpClient::new());
        client
            .respond(200, page_body(0, 5, None))
            .respond(200, r#"{"data": "not-a-list"}"#);
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 5,
                record_budget: 20,
                ..PaginationConfig::default()
            },
        )
        .expect("config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert_eq!(result.total_collected, 5);
        assert!(matches!(
            result.termination,
            FetchTermination::Failed(EngineError::Decode { .. })
        ));
        let error = result.into_complete().expect_err("partial run is not complete");
        assert!(matches!(error, FetchError::Failed { collected: 5, .. }));
    }

    #[tokio::test]
    async fn zero_budget_makes_no_requests() {
        let client = Arc::new(ScriptedHttpClient::new());
        let pipeline = pipeline(Arc::clone(&client));
        let fetch = PaginatedFetch::new(&pipeline, PaginationConfig::with_budget(0)).expect("config");

        let result = fetch.run(&RecordQuery::records("bck7")).await;

        assert!(result.is_complete());
        assert_eq!(
            result.termination,
            FetchTermination::BudgetMet {
                more_available: None
            }
        );
        assert_eq!(result.pages_fetched, 0);
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let client = Arc::new(ScriptedHttpClient::new());
        let pipeline = pipeline(client);
        let error = PaginatedFetch::new(
            &pipeline,
            PaginationConfig {
                per_page_limit: 0,
                ..PaginationConfig::default()
            },
        )
        .expect_err("page size zero would never advance");
        assert_eq!(error, ConfigError::ZeroPageSize);
    }
}
