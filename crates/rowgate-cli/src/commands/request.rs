use std::time::Instant;

use rowgate_core::{HttpMethod, RequestDescriptor, RequestPipeline};
use serde_json::Value;
use tracing::info;

use crate::cli::RequestArgs;
use crate::error::CliError;
use crate::metadata::EnvelopeError;

use super::{elapsed_ms, parse_pair, CommandResult};

pub async fn run(args: &RequestArgs, pipeline: &RequestPipeline) -> Result<CommandResult, CliError> {
    let descriptor = build_descriptor(args)?;
    info!(method = %descriptor.method, target = %descriptor.target(), "executing request");

    let started = Instant::now();
    match pipeline.execute(&descriptor).await {
        Ok(executed) => Ok(CommandResult::ok(executed.body)
            .with_latency(elapsed_ms(started))
            .with_cache_hit(executed.cache_hit)
            .with_attempts(executed.attempts)),
        Err(error) => Ok(CommandResult::ok(Value::Null)
            .with_error(EnvelopeError::from_engine(&error))
            .with_latency(elapsed_ms(started))),
    }
}

fn build_descriptor(args: &RequestArgs) -> Result<RequestDescriptor, CliError> {
    let method = HttpMethod::parse(&args.method)
        .ok_or_else(|| CliError::Usage(format!("unsupported method '{}'", args.method)))?;
    if !args.path.starts_with('/') {
        return Err(CliError::Usage(format!(
            "path must start with '/', got '{}'",
            args.path
        )));
    }

    let mut descriptor = RequestDescriptor::new(method, args.path.as_str());
    for raw in &args.query {
        let (name, value) = parse_pair(raw)?;
        descriptor = descriptor.with_query(name, value);
    }
    for raw in &args.headers {
        let (name, value) = parse_pair(raw)?;
        descriptor = descriptor.with_header(name, value);
    }
    if let Some(body) = &args.body {
        let body: Value = serde_json::from_str(body)
            .map_err(|error| CliError::Usage(format!("--body is not valid JSON: {error}")))?;
        descriptor = descriptor.with_body(body);
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn args(method: &str, path: &str) -> RequestArgs {
        RequestArgs {
            method: method.to_string(),
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn builds_write_descriptor_with_query_and_body() {
        let mut request = args("post", "/v1/tables");
        request.query.push(String::from("appId=bqx7"));
        request.body = Some(String::from(r#"{"name":"Tasks"}"#));

        let descriptor = build_descriptor(&request).expect("valid descriptor");
        assert_eq!(descriptor.method, HttpMethod::Post);
        assert_eq!(descriptor.target(), "/v1/tables?appId=bqx7");
        assert_eq!(descriptor.body, Some(json!({"name": "Tasks"})));
        assert!(descriptor.invalidates.is_empty());
    }

    #[test]
    fn rejects_unknown_method_and_bad_body() {
        assert!(matches!(
            build_descriptor(&args("TRACE", "/v1/apps")),
            Err(CliError::Usage(_))
        ));

        let mut request = args("POST", "/v1/records");
        request.body = Some(String::from("{not json"));
        assert!(matches!(build_descriptor(&request), Err(CliError::Usage(_))));
    }

    #[test]
    fn rejects_relative_path() {
        assert!(matches!(
            build_descriptor(&args("GET", "v1/apps")),
            Err(CliError::Usage(_))
        ));
    }
}
