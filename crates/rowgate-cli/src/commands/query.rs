use std::time::Duration;

use rowgate_core::{
    FetchTermination, PaginatedFetch, PaginationConfig, PagedResult, RecordQuery, RequestPipeline,
};
use serde::Serialize;
use serde_json::Value;

use crate::cli::QueryArgs;
use crate::error::CliError;
use crate::metadata::EnvelopeError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct QueryResponseData {
    records: Vec<Value>,
    total_collected: usize,
    pages_fetched: u32,
    skips: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_total: Option<u64>,
    complete: bool,
    more_available: bool,
    termination: &'static str,
}

pub async fn run(args: &QueryArgs, pipeline: &RequestPipeline) -> Result<CommandResult, CliError> {
    let config = PaginationConfig {
        starting_skip: args.skip,
        per_page_limit: args.page_size,
        record_budget: args.limit,
        max_iterations: args.max_pages,
        max_duration: Duration::from_millis(args.max_duration_ms),
    };
    let fetch = PaginatedFetch::new(pipeline, config)?;

    let mut query = RecordQuery::records(args.table_id.as_str());
    if !args.select.is_empty() {
        query = query.with_select(&args.select);
    }
    if let Some(clause) = &args.where_clause {
        query = query.with_where(clause.as_str());
    }

    let result = fetch.run(&query).await;
    summarize(result)
}

fn summarize(result: PagedResult) -> Result<CommandResult, CliError> {
    let latency_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX);
    let collected = result.total_collected;
    let complete = result.is_complete();
    let more_available = result.more_available();

    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let termination = match &result.termination {
        FetchTermination::Exhausted => "exhausted",
        FetchTermination::BudgetMet { .. } => {
            if more_available {
                warnings.push(format!(
                    "record limit reached after {collected} records; more are available"
                ));
            }
            "budget_met"
        }
        FetchTermination::Aborted(trip) => {
            warnings.push(format!("pagination stopped early: {trip}"));
            errors.push(EnvelopeError::from_trip(trip, collected));
            "aborted"
        }
        FetchTermination::Failed(error) => {
            errors.push(EnvelopeError::from_engine(error).with_collected(collected));
            "failed"
        }
    };

    let data = serde_json::to_value(QueryResponseData {
        records: result.records,
        total_collected: collected,
        pages_fetched: result.pages_fetched,
        skips: result.skips,
        server_total: result.server_total,
        complete,
        more_available,
        termination,
    })?;

    let mut command = CommandResult::ok(data)
        .with_latency(latency_ms)
        .with_attempts(result.pages_fetched);
    for warning in warnings {
        command = command.with_warning(warning);
    }
    for error in errors {
        command = command.with_error(error);
    }
    Ok(command)
}

#[cfg(test)]
mod tests {
    use rowgate_core::{BreakerTrip, EngineError};
    use serde_json::json;

    use super::*;

    fn result(termination: FetchTermination) -> PagedResult {
        PagedResult {
            records: vec![json!({"3": {"value": 1}}), json!({"3": {"value": 2}})],
            total_collected: 2,
            pages_fetched: 2,
            skips: vec![0, 1],
            server_total: Some(10),
            elapsed: Duration::from_millis(40),
            termination,
        }
    }

    #[test]
    fn budget_met_with_more_data_warns_without_errors() {
        let command = summarize(result(FetchTermination::BudgetMet {
            more_available: Some(true),
        }))
        .expect("summary serializes");

        assert!(command.errors.is_empty());
        assert_eq!(command.warnings.len(), 1);
        assert_eq!(command.data["complete"], true);
        assert_eq!(command.data["more_available"], true);
        assert_eq!(command.data["termination"], "budget_met");
    }

    #[test]
    fn aborted_run_keeps_partial_records() {
        let command = summarize(result(FetchTermination::Aborted(
            BreakerTrip::MaxIterations { limit: 2 },
        )))
        .expect("summary serializes");

        assert_eq!(command.errors.len(), 1);
        assert_eq!(command.errors[0].collected, Some(2));
        assert_eq!(command.data["records"].as_array().map(Vec::len), Some(2));
        assert_eq!(command.data["complete"], false);
    }

    #[test]
    fn failed_run_reports_engine_error() {
        let command = summarize(result(FetchTermination::Failed(EngineError::from_response(
            404, "",
        ))))
        .expect("summary serializes");

        assert_eq!(command.errors[0].status, Some(404));
        assert_eq!(command.data["termination"], "failed");
    }
}
