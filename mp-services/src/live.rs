//! Live queries against Mixpanel, normalized into typed result records.

use crate::results::{
    ActivityFeedResult, EventCountsResult, FlowsResult, FrequencyResult, FunnelResult,
    InsightsResult, JqlResult, NumericAverageResult, NumericBucketResult, NumericSumResult,
    PropertyCountsResult, RetentionResult, SegmentationResult, TopEventsResult,
};
use chrono::NaiveDate;
use mp_client::{
    ApiClient, EventCountsParams, FlowsQueryType, FrequencyParams, FunnelParams,
    PropertyCountsParams, RetentionParams, SegmentationParams,
};
use mp_core::{CancellationToken, Error, Result};
use serde_json::Value;

/// One method per query family. Each sends the request, receives the wire
/// payload, and constructs the family's immutable result record.
#[derive(Debug, Clone)]
pub struct LiveQuery {
    client: ApiClient,
}

impl LiveQuery {
    pub fn new(client: ApiClient) -> Self {
        LiveQuery { client }
    }

    pub async fn segmentation(
        &self,
        mut params: SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<SegmentationResult> {
        params.on = params.on.map(|on| normalize_on(&on));
        let payload = self.client.segmentation(&params, cancel).await?;
        SegmentationResult::from_wire(&params, &payload)
    }

    pub async fn segmentation_numeric(
        &self,
        params: SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<NumericBucketResult> {
        let params = require_on(params, "segmentation_numeric")?;
        let payload = self.client.segmentation_numeric(&params, cancel).await?;
        NumericBucketResult::from_wire(&params, &payload)
    }

    pub async fn segmentation_sum(
        &self,
        params: SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<NumericSumResult> {
        let params = require_on(params, "segmentation_sum")?;
        let payload = self.client.segmentation_sum(&params, cancel).await?;
        NumericSumResult::from_wire(&params, &payload)
    }

    pub async fn segmentation_average(
        &self,
        params: SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<NumericAverageResult> {
        let params = require_on(params, "segmentation_average")?;
        let payload = self.client.segmentation_average(&params, cancel).await?;
        NumericAverageResult::from_wire(&params, &payload)
    }

    pub async fn funnel(
        &self,
        params: FunnelParams,
        cancel: &CancellationToken,
    ) -> Result<FunnelResult> {
        let payload = self.client.funnel(&params, cancel).await?;
        FunnelResult::from_wire(&params, &payload)
    }

    pub async fn retention(
        &self,
        params: RetentionParams,
        cancel: &CancellationToken,
    ) -> Result<RetentionResult> {
        let payload = self.client.retention(&params, cancel).await?;
        RetentionResult::from_wire(&params, &payload)
    }

    pub async fn frequency(
        &self,
        params: FrequencyParams,
        cancel: &CancellationToken,
    ) -> Result<FrequencyResult> {
        let payload = self.client.frequency(&params, cancel).await?;
        FrequencyResult::from_wire(&params, &payload)
    }

    pub async fn jql(
        &self,
        script: &str,
        params: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<JqlResult> {
        let payload = self.client.jql(script, params, cancel).await?;
        Ok(JqlResult::from_wire(script, payload))
    }

    pub async fn event_counts(
        &self,
        params: EventCountsParams,
        cancel: &CancellationToken,
    ) -> Result<EventCountsResult> {
        let payload = self.client.event_counts(&params, cancel).await?;
        EventCountsResult::from_wire(&params, &payload)
    }

    pub async fn property_counts(
        &self,
        params: PropertyCountsParams,
        cancel: &CancellationToken,
    ) -> Result<PropertyCountsResult> {
        let payload = self.client.property_counts(&params, cancel).await?;
        PropertyCountsResult::from_wire(&params, &payload)
    }

    pub async fn top_events(
        &self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<TopEventsResult> {
        let payload = self.client.top_events(limit, cancel).await?;
        TopEventsResult::from_wire(&payload)
    }

    pub async fn activity_feed(
        &self,
        distinct_ids: &[String],
        from_date: NaiveDate,
        to_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<ActivityFeedResult> {
        if distinct_ids.is_empty() {
            return Err(Error::query("activity feed requires at least one distinct_id"));
        }
        let payload = self.client.activity_feed(distinct_ids, from_date, to_date, cancel).await?;
        ActivityFeedResult::from_wire(distinct_ids, &payload)
    }

    /// Query a saved report of any insights-served type (insights,
    /// retention, funnel) through the unified endpoint.
    pub async fn query_saved_report(
        &self,
        bookmark_id: i64,
        cancel: &CancellationToken,
    ) -> Result<InsightsResult> {
        let payload = self.client.insights(bookmark_id, cancel).await?;
        InsightsResult::from_wire(bookmark_id, &payload)
    }

    /// Query a saved flows report through the arb-funnels endpoint.
    pub async fn query_flows(
        &self,
        bookmark_id: i64,
        query_type: FlowsQueryType,
        cancel: &CancellationToken,
    ) -> Result<FlowsResult> {
        let payload = self.client.flows(bookmark_id, query_type, cancel).await?;
        FlowsResult::from_wire(bookmark_id, query_type.as_str(), &payload)
    }
}

/// `on` accepts a bare property name or a full filter expression; bare
/// names are wrapped into `properties["name"]`, expressions pass through.
fn normalize_on(on: &str) -> String {
    let looks_like_expression = on.contains('[')
        || on.contains('(')
        || on.contains('"')
        || on.contains(' ')
        || on.starts_with("user.");
    if looks_like_expression {
        on.to_string()
    } else {
        format!("properties[\"{on}\"]")
    }
}

fn require_on(mut params: SegmentationParams, operation: &str) -> Result<SegmentationParams> {
    match params.on.take() {
        Some(on) => {
            params.on = Some(normalize_on(&on));
            Ok(params)
        }
        None => Err(Error::query(format!("{operation} requires an 'on' expression"))),
    }
}
