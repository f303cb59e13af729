//! Behavior-driven tests for the request pipeline.
//!
//! These tests verify HOW one logical request moves through cache, rate
//! limiter, retry loop and transport, using a scripted transport.

use rowgate_tests::*;
use serde_json::json;

// =============================================================================
// Retry: transient failures
// =============================================================================

#[tokio::test]
async fn when_server_is_busy_three_times_fourth_attempt_succeeds() {
    // Given: A server that answers 503 three times and then succeeds
    let client = Arc::new(ScriptedHttpClient::new());
    client
        .respond(503, r#"{"message":"Service Unavailable"}"#)
        .respond(503, r#"{"message":"Service Unavailable"}"#)
        .respond(503, r#"{"message":"Service Unavailable"}"#)
        .respond(200, r#"{"id":"bqx7","name":"Inventory"}"#);
    let pipeline = pipeline(&client, fast_engine_config());

    // When: The app is fetched with the default retry budget of three
    let executed = pipeline
        .execute(&RequestDescriptor::get("/v1/apps/bqx7"))
        .await
        .expect("fourth attempt succeeds");

    // Then: Four network attempts were made and the final body is returned
    assert_eq!(executed.attempts, 4);
    assert_eq!(client.request_count(), 4);
    assert_eq!(executed.body["name"], "Inventory");
    assert!(!executed.cache_hit);
}

#[tokio::test]
async fn when_retries_are_exhausted_last_error_is_returned() {
    // Given: A server that is always rate limited
    let client = Arc::new(ScriptedHttpClient::with_fallback(ScriptedReply::Respond(
        rowgate_core::HttpResponse::new(429, r#"{"message":"Too Many Requests"}"#),
    )));
    let config = EngineConfig {
        max_retries: 2,
        ..fast_engine_config()
    };
    let pipeline = pipeline(&client, config);

    // When: A read is attempted
    let error = pipeline
        .execute(&RequestDescriptor::get("/v1/tables/bck7"))
        .await
        .expect_err("every attempt is rate limited");

    // Then: maxRetries + 1 attempts were made and only the final failure surfaces
    assert_eq!(client.request_count(), 3);
    assert_eq!(error.status(), Some(429));
    assert_eq!(error.kind(), ErrorKind::Transient);
    assert_eq!(error.code(), "rate_limited");
}

#[tokio::test]
async fn when_connection_resets_request_is_retried() {
    // Given: A transport that drops the connection once
    let client = Arc::new(ScriptedHttpClient::new());
    client
        .fail(TransportError::ConnectionReset(String::from("peer reset")))
        .respond(200, r#"[{"id":6,"label":"Status"}]"#);
    let pipeline = pipeline(&client, fast_engine_config());

    // When: The field list is requested
    let executed = pipeline
        .execute(&RequestDescriptor::get("/v1/fields").with_query("tableId", "bck7"))
        .await
        .expect("second attempt succeeds");

    // Then: The reset counted as transient and was retried
    assert_eq!(executed.attempts, 2);
    assert!(executed.body.is_array());
}

#[tokio::test]
async fn when_a_call_hangs_per_attempt_deadline_fails_it() {
    // Given: A server slower than the per-attempt deadline and no retries
    let client = Arc::new(ScriptedHttpClient::new());
    client.respond_after(Duration::from_millis(600), 200, "{}");
    let config = EngineConfig {
        max_retries: 0,
        per_request_timeout: Duration::from_millis(100),
        ..fast_engine_config()
    };
    let pipeline = pipeline(&client, config);

    // When: The request is executed
    let error = pipeline
        .execute(&RequestDescriptor::get("/v1/apps/bqx7"))
        .await
        .expect_err("deadline elapses first");

    // Then: A transient timeout is reported
    assert!(matches!(
        error,
        EngineError::Transport(TransportError::Timeout { .. })
    ));
    assert!(error.is_retryable());
}

// =============================================================================
// Retry: fatal failures
// =============================================================================

#[tokio::test]
async fn when_resource_is_missing_no_retry_is_attempted() {
    // Given: A server answering 404
    let client = Arc::new(ScriptedHttpClient::new());
    client.respond(
        404,
        r#"{"message":"Not Found","description":"Table bck7 does not exist"}"#,
    );
    let pipeline = pipeline(&client, fast_engine_config());

    // When: The table is requested
    let error = pipeline
        .execute(&RequestDescriptor::get("/v1/tables/bck7"))
        .await
        .expect_err("404 is fatal");

    // Then: Exactly one attempt was made and the error is classified fatal
    assert_eq!(client.request_count(), 1);
    assert_eq!(error.status(), Some(404));
    assert_eq!(error.kind(), ErrorKind::Fatal);
    assert!(!error.is_retryable());
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn when_same_read_repeats_within_ttl_no_network_call_is_made() {
    // Given: A pipeline with caching enabled
    let client = Arc::new(ScriptedHttpClient::new());
    client.respond(200, r#"{"id":"bqx7","name":"Inventory"}"#);
    let pipeline = pipeline(&client, fast_engine_config());
    let descriptor = RequestDescriptor::get("/v1/apps/bqx7");

    // When: The same read runs twice
    let first = pipeline.execute(&descriptor).await.expect("first read");
    let second = pipeline.execute(&descriptor).await.expect("second read");

    // Then: The second is served from cache with zero attempts
    assert_eq!(client.request_count(), 1);
    assert!(second.cache_hit);
    assert_eq!(second.attempts, 0);
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn when_a_write_succeeds_related_cached_reads_are_invalidated() {
    // Given: A cached table listing
    let client = Arc::new(ScriptedHttpClient::new());
    client
        .respond(200, r#"[{"id":"bck7","name":"Tasks"}]"#)
        .respond(200, r#"{"id":"bck8","name":"Projects"}"#)
        .respond(
            200,
            r#"[{"id":"bck7","name":"Tasks"},{"id":"bck8","name":"Projects"}]"#,
        );
    let pipeline = pipeline(&client, fast_engine_config());
    let listing = RequestDescriptor::get("/v1/tables").with_query("appId", "bqx7");
    pipeline.execute(&listing).await.expect("initial listing");

    // When: A table is created with invalidation of the listing prefix
    let create = RequestDescriptor::post("/v1/tables")
        .with_query("appId", "bqx7")
        .with_body(json!({"name": "Projects"}))
        .invalidating("/v1/tables");
    pipeline.execute(&create).await.expect("create succeeds");
    let refreshed = pipeline.execute(&listing).await.expect("listing refetched");

    // Then: The listing went back to the network and sees the new table
    assert_eq!(client.request_count(), 3);
    assert!(!refreshed.cache_hit);
    assert_eq!(refreshed.body.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn when_cache_is_disabled_every_read_reaches_the_network() {
    // Given: A pipeline whose cache is turned off
    let client = Arc::new(ScriptedHttpClient::new());
    let config = EngineConfig {
        cache_enabled: false,
        ..fast_engine_config()
    };
    let pipeline = pipeline(&client, config);
    let descriptor = RequestDescriptor::get("/v1/apps/bqx7");

    // When: The same read runs twice
    pipeline.execute(&descriptor).await.expect("first read");
    let second = pipeline.execute(&descriptor).await.expect("second read");

    // Then: Both reads hit the transport
    assert_eq!(client.request_count(), 2);
    assert!(!second.cache_hit);
}

#[tokio::test]
async fn when_caller_skips_cache_fresh_data_is_fetched() {
    // Given: A cached read
    let client = Arc::new(ScriptedHttpClient::new());
    client
        .respond(200, r#"{"version":1}"#)
        .respond(200, r#"{"version":2}"#);
    let pipeline = pipeline(&client, fast_engine_config());
    pipeline
        .execute(&RequestDescriptor::get("/v1/apps/bqx7"))
        .await
        .expect("prime cache");

    // When: The caller opts out of the cache
    let fresh = pipeline
        .execute(&RequestDescriptor::get("/v1/apps/bqx7").skip_cache())
        .await
        .expect("bypass read");

    // Then: The newer body is returned
    assert_eq!(fresh.body["version"], 2);
    assert_eq!(client.request_count(), 2);
}

#[tokio::test]
async fn when_writes_repeat_each_one_reaches_the_network() {
    // Given: A pipeline with caching enabled
    let client = Arc::new(ScriptedHttpClient::new());
    let pipeline = pipeline(&client, fast_engine_config());
    let upsert = RequestDescriptor::post("/v1/records")
        .with_body(json!({"to": "bck7", "data": [{"6": {"value": "open"}}]}));

    // When: The same write is sent twice
    pipeline.execute(&upsert).await.expect("first write");
    let second = pipeline.execute(&upsert).await.expect("second write");

    // Then: Writes are never served from cache
    assert_eq!(client.request_count(), 2);
    assert!(!second.cache_hit);
}

// =============================================================================
// Request shape
// =============================================================================

#[tokio::test]
async fn when_request_is_sent_credentials_and_json_body_are_attached() {
    // Given: A pipeline configured with a user token
    let client = Arc::new(ScriptedHttpClient::new());
    let pipeline = pipeline(&client, fast_engine_config());

    // When: A write with a JSON body is executed
    pipeline
        .execute(
            &RequestDescriptor::post("/v1/records/query")
                .with_body(json!({"from": "bck7", "select": [3]})),
        )
        .await
        .expect("query succeeds");

    // Then: The transport saw the full URL, the token and the serialized body
    let sent = client.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, HttpMethod::Post);
    assert_eq!(sent[0].url, format!("{BASE_URL}/v1/records/query"));
    assert_eq!(
        sent[0].headers.get("authorization").map(String::as_str),
        Some("QB-USER-TOKEN b7x_token")
    );
    let body: serde_json::Value =
        serde_json::from_str(sent[0].body.as_deref().expect("body present")).expect("json body");
    assert_eq!(body["from"], "bck7");
}
