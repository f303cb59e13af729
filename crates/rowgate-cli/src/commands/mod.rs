mod query;
mod request;

use std::sync::Arc;
use std::time::Duration;

use rowgate_core::{
    ConnectionConfig, EngineConfig, HttpClient, RequestPipeline, ReqwestHttpClient,
    ScriptedHttpClient,
};
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::{Envelope, EnvelopeError, Metadata};

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub attempts: u32,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            cache_hit: false,
            attempts: 0,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_error(mut self, error: EnvelopeError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let pipeline = build_pipeline(cli)?;

    let command_result = match &cli.command {
        Command::Request(args) => request::run(args, &pipeline).await?,
        Command::Query(args) => query::run(args, &pipeline).await?,
    };

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        cache_hit,
        attempts,
    } = command_result;

    let mut meta = Metadata::new(latency_ms, cache_hit, attempts);
    if cli.offline {
        meta.push_warning("--offline: responses were generated in-process");
    }
    for warning in warnings {
        meta.push_warning(warning);
    }

    Ok(Envelope { meta, data, errors })
}

fn build_pipeline(cli: &Cli) -> Result<RequestPipeline, CliError> {
    let mut config = EngineConfig::from_env()?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.per_request_timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }

    let mut connection = ConnectionConfig::from_env();
    if let Some(base_url) = &cli.base_url {
        connection.base_url = base_url.clone();
    }

    let client: Arc<dyn HttpClient> = if cli.offline {
        Arc::new(ScriptedHttpClient::new())
    } else {
        Arc::new(ReqwestHttpClient::with_user_agent(&connection.user_agent))
    };

    debug!(
        base_url = %connection.base_url,
        offline = cli.offline,
        max_retries = config.max_retries,
        "building request pipeline"
    );
    RequestPipeline::new(&config, connection, client).map_err(CliError::from)
}

/// Splits `name=value`; the value may itself contain `=`.
pub(crate) fn parse_pair(raw: &str) -> Result<(String, String), CliError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(CliError::Usage(format!(
            "expected NAME=VALUE, got '{raw}'"
        ))),
    }
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
