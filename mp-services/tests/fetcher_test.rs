//! End-to-end fetch paths: API stream into the store, single-range and
//! parallel, with dedup across overlapping fetches.

use mp_client::{ApiClient, EngageParams, ExportParams, RetryPolicy};
use mp_core::{CancellationToken, Credentials, Region};
use mp_services::{FetchOptions, Fetcher, ParallelFetchOptions};
use mp_store::{Store, TableKind};
use serde_json::json;
use std::fmt::Write as _;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher_for(server: &MockServer) -> Fetcher {
    let credentials = Credentials::new("u", "s", "123", Region::Us);
    let retry = RetryPolicy { max_attempts: 2, base: Duration::from_millis(1), ..Default::default() };
    Fetcher::new(ApiClient::with_base_url(credentials, retry, server.uri()).unwrap())
}

fn export_body(range: std::ops::Range<u32>) -> String {
    let mut body = String::new();
    for i in range {
        writeln!(
            body,
            r#"{{"event":"Purchase","properties":{{"time":{},"distinct_id":"user-{}","$insert_id":"evt_{i}"}}}}"#,
            1_704_067_200 + i * 60,
            i % 10,
        )
        .unwrap();
    }
    body
}

fn params() -> ExportParams {
    ExportParams::new("2024-01-01".parse().unwrap(), "2024-01-14".parse().unwrap())
}

#[tokio::test]
async fn fetch_events_streams_into_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string(export_body(0..500)))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let mut seen = Vec::new();
    let mut progress = |n: u64| seen.push(n);
    let options = FetchOptions { progress: Some(&mut progress), ..Default::default() };
    let result = fetcher
        .fetch_events(&mut store, "purchases", params(), options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.rows, 500);
    assert_eq!(result.kind, TableKind::Events);
    assert_eq!(seen, vec![500]);
    let metadata = store.get_metadata("purchases").unwrap();
    assert_eq!(metadata.row_count, 500);
    assert_eq!(metadata.fetch.from_date, Some("2024-01-01".parse().unwrap()));
    // The table is queryable immediately.
    let count = store.sql_scalar("SELECT count(*) FROM purchases").unwrap();
    assert_eq!(count, json!(500));
}

#[tokio::test]
async fn fetch_into_existing_table_without_append_fails_before_network() {
    let server = MockServer::start().await;
    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    store
        .create_events_table("t", Vec::new(), &Default::default(), Default::default())
        .unwrap();
    let err = fetcher
        .fetch_events(&mut store, "t", params(), FetchOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TABLE_EXISTS");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_fetch_with_nothing_committed_leaves_no_table() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let err = fetcher
        .fetch_events(&mut store, "t", params(), FetchOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SERVER_ERROR");
    assert_eq!(store.get_metadata("t").unwrap_err().code(), "TABLE_NOT_FOUND");
    assert!(store.list_tables().unwrap().is_empty());
}

#[tokio::test]
async fn parallel_fetch_merges_chunks_with_dedup() {
    let server = MockServer::start().await;
    // Every chunk gets the same 200 events; dedup keeps one copy of each.
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string(export_body(0..200)))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let options = ParallelFetchOptions { chunk_days: 7, max_workers: 4, ..Default::default() };
    let result = fetcher
        .fetch_events_parallel(
            &mut store,
            "purchases",
            params(),
            options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    // 14 days / 7 = 2 chunks, each streaming 200 records, 200 unique rows.
    assert_eq!(result.chunks.len(), 2);
    assert!(result.chunks.iter().all(|c| c.is_success()));
    assert_eq!(result.chunks.iter().map(|c| c.records).sum::<u64>(), 400);
    assert_eq!(result.rows, 200);
}

#[tokio::test]
async fn refetching_the_same_range_with_append_adds_zero_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string(export_body(0..100)))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let cancel = CancellationToken::new();
    let first = fetcher
        .fetch_events(&mut store, "t", params(), FetchOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.rows, 100);

    let options = ParallelFetchOptions { append: true, max_workers: 4, ..Default::default() };
    let again = fetcher
        .fetch_events_parallel(&mut store, "t", params(), options, &cancel)
        .await
        .unwrap();
    assert_eq!(again.rows, 100);
    assert_eq!(store.get_metadata("t").unwrap().row_count, 100);
}

#[tokio::test]
async fn failed_chunks_are_reported_and_good_chunks_kept() {
    let server = MockServer::start().await;
    // The second chunk's date range persistently fails.
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .and(wiremock::matchers::query_param("from_date", "2024-01-08"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/export"))
        .respond_with(ResponseTemplate::new(200).set_body_string(export_body(0..50)))
        .with_priority(5)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let result = fetcher
        .fetch_events_parallel(
            &mut store,
            "t",
            params(),
            ParallelFetchOptions { max_workers: 2, ..Default::default() },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let failed: Vec<_> = result.failed_chunks().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].from_date, "2024-01-08".parse().unwrap());
    assert!(failed[0].error.as_deref().unwrap().contains("SERVER_ERROR"));
    // The good chunk's rows are committed and the metadata row exists.
    assert_eq!(result.rows, 50);
    assert_eq!(store.get_metadata("t").unwrap().row_count, 50);
}

#[tokio::test]
async fn fetch_profiles_paginates_and_dedups() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/engage"))
        .and(body_string_contains("session_id=s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [],
            "session_id": "s1"
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/2.0/engage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"$distinct_id": "u1", "$properties": {"$name": "Ada"}},
                {"$distinct_id": "u2", "$properties": {"$name": "Grace"}},
                {"$distinct_id": "u1", "$properties": {"$name": "Ada again"}}
            ],
            "session_id": "s1",
            "page": 0
        })))
        .with_priority(5)
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let mut store = Store::in_memory().unwrap();
    let result = fetcher
        .fetch_profiles(
            &mut store,
            "people",
            EngageParams::default(),
            FetchOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.kind, TableKind::Profiles);
    // Three records streamed, two distinct ids.
    assert_eq!(result.rows, 2);
}
