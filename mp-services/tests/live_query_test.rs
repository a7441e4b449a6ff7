//! Live-query normalization against a mock server.

use mp_client::{ApiClient, FlowsQueryType, FunnelParams, RetentionParams, RetryPolicy, SegmentationParams, Unit};
use mp_core::{CancellationToken, Credentials, Region};
use mp_services::{InsightsKind, LiveQuery};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn live_for(server: &MockServer) -> LiveQuery {
    let credentials = Credentials::new("u", "s", "123", Region::Us);
    let retry = RetryPolicy { max_attempts: 2, base: Duration::from_millis(1), ..Default::default() };
    LiveQuery::new(ApiClient::with_base_url(credentials, retry, server.uri()).unwrap())
}

#[tokio::test]
async fn segmentation_normalizes_series_and_total() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query/segmentation"))
        .and(query_param("event", "Purchase"))
        .and(query_param("on", "properties[\"country\"]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "series": ["2024-01-01", "2024-01-02"],
                "values": {"US": {"2024-01-01": 10, "2024-01-02": 20}}
            },
            "legend_size": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let mut params = SegmentationParams::new(
        "Purchase",
        "2024-01-01".parse().unwrap(),
        "2024-01-02".parse().unwrap(),
    );
    // Bare name wrapped to the canonical expression by the service.
    params.on = Some("country".to_string());
    let result = live.segmentation(params, &CancellationToken::new()).await.unwrap();

    assert_eq!(result.total, 30.0);
    let table = result.to_table();
    assert_eq!(table.columns, vec!["date", "segment", "count"]);
    assert_eq!(
        table.rows,
        vec![
            vec![json!("2024-01-01"), json!("US"), json!(10)],
            vec![json!("2024-01-02"), json!("US"), json!(20)],
        ]
    );
}

#[tokio::test]
async fn funnel_aggregates_dates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query/funnels"))
        .and(query_param("funnel_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"dates": ["2024-01-01"]},
            "data": {
                "2024-01-01": {
                    "steps": [
                        {"goal": "Signup", "count": 100},
                        {"goal": "Purchase", "count": 25}
                    ],
                    "analysis": {"completion": 25, "starting_amount": 100}
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let params = FunnelParams {
        funnel_id: 42,
        from_date: "2024-01-01".parse().unwrap(),
        to_date: "2024-01-01".parse().unwrap(),
        unit: None,
    };
    let result = live.funnel(params, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.funnel_id, 42);
    assert_eq!(result.steps.len(), 2);
    assert!((result.conversion_rate - 0.25).abs() < 1e-9);
}

#[tokio::test]
async fn retention_normalizes_cohorts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query/retention"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "2024-01-01": {"counts": [50, 10], "first": 100}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let params = RetentionParams {
        born_event: "Signup".into(),
        return_event: Some("Login".into()),
        from_date: "2024-01-01".parse().unwrap(),
        to_date: "2024-01-31".parse().unwrap(),
        unit: Unit::Week,
        born_where: None,
        where_expr: None,
        interval_count: None,
    };
    let result = live.retention(params, &CancellationToken::new()).await.unwrap();
    assert_eq!(result.cohorts[0].size, 100);
    assert_eq!(result.cohorts[0].retention, vec![0.5, 0.1]);
    let table = result.to_table();
    assert_eq!(table.columns, vec!["cohort_date", "cohort_size", "period_0", "period_1"]);
}

#[tokio::test]
async fn saved_reports_route_through_insights() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query/insights"))
        .and(query_param("bookmark_id", "77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "headers": ["$retention"],
            "series": {"cohort": {"2024-01-01": 0.4}},
            "computed_at": "2024-01-02T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let result = live.query_saved_report(77, &CancellationToken::new()).await.unwrap();
    // A retention bookmark served through the unified endpoint.
    assert_eq!(result.kind, InsightsKind::Retention);
    assert_eq!(result.bookmark_id, 77);
}

#[tokio::test]
async fn flows_route_through_arb_funnels_with_query_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query/arb_funnels"))
        .and(query_param("bookmark_id", "9"))
        .and(query_param("query_type", "flows_sankey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "steps": [{"event": "Open"}],
            "breakdowns": [],
            "overallConversionRate": 0.5,
            "metadata": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let result = live
        .query_flows(9, FlowsQueryType::FlowsSankey, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.query_type, "flows_sankey");
    assert_eq!(result.overall_conversion_rate, Some(0.5));
}

#[tokio::test]
async fn jql_syntax_errors_carry_the_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/query/jql"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"error": "bad script"})))
        .expect(1)
        .mount(&server)
        .await;

    let live = live_for(&server);
    let err = live.jql("nope", None, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.code(), "JQL_SYNTAX");
}

#[tokio::test]
async fn numeric_queries_require_on() {
    let server = MockServer::start().await;
    let live = live_for(&server);
    let params = SegmentationParams::new(
        "Purchase",
        "2024-01-01".parse().unwrap(),
        "2024-01-02".parse().unwrap(),
    );
    let err = live.segmentation_sum(params, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.code(), "QUERY_FAILED");
    assert!(server.received_requests().await.unwrap().is_empty());
}
