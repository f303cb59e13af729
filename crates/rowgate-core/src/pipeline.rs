//! The request pipeline: cache lookup, rate-limit admission, per-attempt
//! deadline, error classification, retry loop and cache population for one
//! logical call.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::cache::CacheStore;
use crate::config::{ConnectionConfig, EngineConfig};
use crate::error::{ConfigError, EngineError};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::request::{CacheKey, RequestDescriptor};
use crate::retry::RetryPolicy;
use crate::throttling::RateLimiter;

/// Successful result of one logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    /// Decoded JSON body; `Value::Null` for an empty body.
    pub body: Value,
    /// Final HTTP status, absent when served from cache.
    pub status: Option<u16>,
    /// Network attempts made; zero on a cache hit.
    pub attempts: u32,
    pub cache_hit: bool,
}

/// Turns [`RequestDescriptor`]s into rate-limited, cached, retried network calls.
#[derive(Clone)]
pub struct RequestPipeline {
    client: Arc<dyn HttpClient>,
    limiter: Arc<RateLimiter>,
    cache: CacheStore,
    retry: RetryPolicy,
    connection: ConnectionConfig,
    request_timeout: Duration,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("connection", &self.connection)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    pub fn new(
        config: &EngineConfig,
        connection: ConnectionConfig,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, ConfigError> {
        Self::builder(client)
            .config(config.clone())
            .connection(connection)
            .build()
    }

    pub fn builder(client: Arc<dyn HttpClient>) -> RequestPipelineBuilder {
        RequestPipelineBuilder::new(client)
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Execute one logical call.
    ///
    /// Remote and transport failures come back as `Err` after the retry
    /// policy gives up; a body that cannot be decoded is reported as
    /// [`EngineError::Decode`].
    #[instrument(
        skip(self, descriptor),
        fields(method = %descriptor.method, path = %descriptor.path)
    )]
    pub async fn execute(&self, descriptor: &RequestDescriptor) -> Result<Executed, EngineError> {
        let cache_key = descriptor.is_cacheable().then(|| descriptor.cache_key());

        if let Some(key) = &cache_key {
            if let Some(body) = self.cache.get(key.as_str()).await {
                debug!(key = %key, "cache hit");
                return Ok(Executed {
                    body,
                    status: None,
                    attempts: 0,
                    cache_hit: true,
                });
            }
            debug!(key = %key, "cache miss");
        }

        let request = self.build_request(descriptor);
        let outcome = self
            .retry
            .run(|attempt| {
                let request = request.clone();
                async move { self.attempt(request, attempt).await }
            })
            .await;
        let response = outcome.result?;
        let body = decode_body(&response.body)?;

        if let Some(key) = cache_key {
            self.cache.set(key.into_string(), body.clone()).await;
        }
        if !descriptor.method.is_read() {
            self.invalidate_after_write(descriptor).await;
        }

        Ok(Executed {
            body,
            status: Some(response.status),
            attempts: outcome.attempts,
            cache_hit: false,
        })
    }

    /// Execute and decode the body into a caller-defined shape.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, EngineError> {
        let executed = self.execute(descriptor).await?;
        serde_json::from_value(executed.body).map_err(|error| EngineError::decode(error.to_string()))
    }

    async fn attempt(&self, request: HttpRequest, attempt: u32) -> Result<HttpResponse, EngineError> {
        let admission = self.limiter.admit().await;
        debug!(
            attempt,
            waited_ms = admission.waited.as_millis() as u64,
            "admitted by rate limiter"
        );

        let response = tokio::time::timeout(self.request_timeout, self.client.execute(request))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: duration_ms(self.request_timeout),
            })??;

        if response.is_success() {
            Ok(response)
        } else {
            Err(EngineError::from_response(response.status, response.body))
        }
    }

    fn build_request(&self, descriptor: &RequestDescriptor) -> HttpRequest {
        let mut request = HttpRequest::new(descriptor.method, descriptor.url(&self.connection.base_url))
            .with_auth(&self.connection.auth)
            .with_header("user-agent", self.connection.user_agent.as_str())
            .with_timeout_ms(duration_ms(self.request_timeout));

        for (name, value) in &self.connection.default_headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        for (name, value) in &descriptor.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if let Some(body) = &descriptor.body {
            request = request
                .with_header("content-type", "application/json")
                .with_body(body.to_string());
        }

        request
    }

    async fn invalidate_after_write(&self, descriptor: &RequestDescriptor) {
        for prefix in &descriptor.invalidates {
            let removed = self.cache.invalidate_prefix(&CacheKey::read_prefix(prefix)).await;
            debug!(prefix = %prefix, removed, "invalidated cached reads after write");
        }
    }
}

/// Builder allowing a rate limiter or cache to be shared between pipelines.
pub struct RequestPipelineBuilder {
    client: Arc<dyn HttpClient>,
    config: EngineConfig,
    connection: ConnectionConfig,
    limiter: Option<Arc<RateLimiter>>,
    cache: Option<CacheStore>,
    retry: Option<RetryPolicy>,
}

impl RequestPipelineBuilder {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            config: EngineConfig::default(),
            connection: ConnectionConfig::default(),
            limiter: None,
            cache: None,
            retry: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn shared_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn shared_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the policy derived from the config (tests use fixed delays).
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<RequestPipeline, ConfigError> {
        self.config.validate()?;
        self.connection.validate()?;

        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(RateLimiter::from_config(&self.config)?),
        };
        let cache = self.cache.unwrap_or_else(|| {
            if self.config.cache_enabled {
                CacheStore::new(self.config.cache_ttl)
            } else {
                CacheStore::disabled(self.config.cache_ttl)
            }
        });
        let retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));

        Ok(RequestPipeline {
            client: self.client,
            limiter,
            cache,
            retry,
            connection: self.connection,
            request_timeout: self.config.per_request_timeout,
        })
    }
}

fn decode_body(body: &str) -> Result<Value, EngineError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|error| EngineError::decode(error.to_string()))
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
