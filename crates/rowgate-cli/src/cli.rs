//! CLI argument definitions for rowgate.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `request` | Execute one logical request through the engine |
//! | `query` | Fetch table records across as many pages as needed |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings as errors |
//! | `--offline` | `false` | Use an in-process transport that answers `{}` |
//! | `--base-url` | env / platform default | API base URL |
//! | `--timeout-ms` | env / `30000` | Per-attempt deadline |
//! | `--max-retries` | env / `3` | Retries after the first attempt |
//!
//! Engine settings otherwise come from `ROWGATE_*` environment variables.
//!
//! Every invocation builds a fresh engine, so the read cache only lives for
//! one process. Cache bypass and invalidation are library concerns and have
//! no flags here.
//!
//! # Examples
//!
//! ```bash
//! rowgate request GET /v1/apps/bqx7 --pretty
//! rowgate request GET /v1/fields --query tableId=bck7
//! rowgate request POST /v1/tables --query appId=bqx7 --body '{"name":"Tasks"}'
//! rowgate query bck7 --select 3,6,7 --where "{6.EX.'open'}" --limit 3500
//! ```

use clap::{Args, Parser, Subcommand};

/// Rate-limited, cached, retrying access to a table platform's REST API.
#[derive(Debug, Parser)]
#[command(
    name = "rowgate",
    author,
    version,
    about = "Resilient command-line access to a table platform's REST API"
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Treat warnings and errors as failures (exit code 5).
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Answer every request in-process with `{}` instead of calling the network.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// API base URL (overrides ROWGATE_BASE_URL).
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Per-attempt deadline in milliseconds (overrides ROWGATE_REQUEST_TIMEOUT_MS).
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first attempt (overrides ROWGATE_MAX_RETRIES).
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute one request: GET, POST, PUT, PATCH or DELETE.
    ///
    /// # Examples
    ///
    ///   rowgate request GET /v1/apps/bqx7
    ///   rowgate request DELETE /v1/tables/bck7 --query appId=bqx7
    Request(RequestArgs),

    /// Query records from a table, paging until the limit or the data runs out.
    ///
    /// # Examples
    ///
    ///   rowgate query bck7 --limit 5000
    ///   rowgate query bck7 --select 3,6 --page-size 500 --max-pages 20
    Query(QueryArgs),
}

/// Arguments for the `request` command.
#[derive(Debug, Args)]
pub struct RequestArgs {
    /// HTTP method.
    pub method: String,

    /// Path relative to the base URL, e.g. /v1/apps/bqx7.
    pub path: String,

    /// Query parameter as name=value; repeatable.
    #[arg(long = "query", value_name = "NAME=VALUE")]
    pub query: Vec<String>,

    /// Extra header as name=value; repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// JSON request body.
    #[arg(long)]
    pub body: Option<String>,
}

/// Arguments for the `query` command.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Table identifier.
    pub table_id: String,

    /// Field ids to return, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub select: Vec<u32>,

    /// Filter expression in the platform's query language.
    #[arg(long = "where")]
    pub where_clause: Option<String>,

    /// Maximum number of records to return.
    #[arg(long, default_value_t = 1_000)]
    pub limit: u64,

    /// Records requested per page.
    #[arg(long, default_value_t = 1_000)]
    pub page_size: u64,

    /// Offset of the first record.
    #[arg(long, default_value_t = 0)]
    pub skip: u64,

    /// Stop after this many page requests.
    #[arg(long, default_value_t = 100)]
    pub max_pages: u32,

    /// Stop paging after this many milliseconds.
    #[arg(long, default_value_t = 300_000)]
    pub max_duration_ms: u64,
}
