//! Request parameter structs, one per endpoint family.
//!
//! Mutual-exclusion rules are validated locally before any network I/O;
//! violations surface as `QUERY_FAILED` argument errors. Filter-expression
//! strings (`where`, `on`) are passed through verbatim; their grammar is
//! validated by Mixpanel.

use chrono::NaiveDate;
use mp_core::{Error, Result};
use serde_json::Value;
use std::fmt;

/// Soft cap on `distinct_ids` list size. Not authoritative: the service may
/// enforce its own limit, and its 4xx is surfaced unchanged.
pub const MAX_DISTINCT_IDS: usize = 2000;

/// Bucketing unit for time-series query families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Unit {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Hour => "hour",
            Unit::Day => "day",
            Unit::Week => "week",
            Unit::Month => "month",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw event export over the JSONL endpoint.
#[derive(Debug, Clone)]
pub struct ExportParams {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Restrict the export to these event names.
    pub events: Option<Vec<String>>,
    /// Filter-expression selector applied server-side.
    pub where_expr: Option<String>,
    pub limit: Option<u64>,
}

impl ExportParams {
    pub fn new(from_date: NaiveDate, to_date: NaiveDate) -> Self {
        ExportParams { from_date, to_date, events: None, where_expr: None, limit: None }
    }

    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
        ];
        if let Some(events) = &self.events {
            query.push(("event".to_string(), Value::from(events.clone()).to_string()));
        }
        if let Some(where_expr) = &self.where_expr {
            query.push(("where".to_string(), where_expr.clone()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        query
    }
}

/// Engage profile query. Paginated with `{session_id, page}` cursors.
#[derive(Debug, Clone, Default)]
pub struct EngageParams {
    pub where_expr: Option<String>,
    pub cohort_id: Option<i64>,
    pub output_properties: Option<Vec<String>>,
    pub distinct_id: Option<String>,
    pub distinct_ids: Option<Vec<String>>,
    /// Group analytics data group; selects group profiles.
    pub data_group_id: Option<String>,
    /// Raw behaviors selector JSON. Mutually exclusive with `cohort_id`.
    pub behaviors: Option<String>,
    /// Required for paginated behavior queries; auto-filled with the current
    /// time at send when absent.
    pub as_of_timestamp: Option<i64>,
    /// Only meaningful together with `cohort_id`; defaults to true there.
    pub include_all_users: Option<bool>,
}

impl EngageParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.distinct_id.is_some() && self.distinct_ids.is_some() {
            return Err(Error::query(
                "'distinct_id' and 'distinct_ids' are mutually exclusive; pass one of them",
            ));
        }
        if let Some(ids) = &self.distinct_ids {
            if ids.len() > MAX_DISTINCT_IDS {
                return Err(Error::query(format!(
                    "'distinct_ids' holds {} ids; the limit is {MAX_DISTINCT_IDS}",
                    ids.len()
                )));
            }
        }
        if self.behaviors.is_some() && self.cohort_id.is_some() {
            return Err(Error::query(
                "'behaviors' and 'cohort_id' are mutually exclusive; pass one of them",
            ));
        }
        if self.include_all_users.is_some() && self.cohort_id.is_none() {
            return Err(Error::query("'include_all_users' requires 'cohort_id'"));
        }
        Ok(())
    }

    /// Form fields for one page request. `as_of_timestamp` for behavior
    /// queries is filled by the client at send.
    pub(crate) fn to_form(&self, as_of_fallback: i64) -> Vec<(String, String)> {
        let mut form = Vec::new();
        if let Some(where_expr) = &self.where_expr {
            form.push(("where".to_string(), where_expr.clone()));
        }
        if let Some(cohort_id) = self.cohort_id {
            form.push(("filter_by_cohort".to_string(), format!("{{\"id\":{cohort_id}}}")));
            form.push((
                "include_all_users".to_string(),
                self.include_all_users.unwrap_or(true).to_string(),
            ));
        }
        if let Some(output_properties) = &self.output_properties {
            form.push((
                "output_properties".to_string(),
                Value::from(output_properties.clone()).to_string(),
            ));
        }
        if let Some(distinct_id) = &self.distinct_id {
            form.push(("distinct_id".to_string(), distinct_id.clone()));
        }
        if let Some(distinct_ids) = &self.distinct_ids {
            form.push(("distinct_ids".to_string(), Value::from(distinct_ids.clone()).to_string()));
        }
        if let Some(data_group_id) = &self.data_group_id {
            form.push(("data_group_id".to_string(), data_group_id.clone()));
        }
        if let Some(behaviors) = &self.behaviors {
            form.push(("behaviors".to_string(), behaviors.clone()));
            form.push((
                "as_of_timestamp".to_string(),
                self.as_of_timestamp.unwrap_or(as_of_fallback).to_string(),
            ));
        }
        form
    }
}

/// Segmentation over one event, optionally split by a property expression.
#[derive(Debug, Clone)]
pub struct SegmentationParams {
    pub event: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: Unit,
    /// Property expression to segment on; bare names are wrapped by the
    /// service layer.
    pub on: Option<String>,
    pub where_expr: Option<String>,
}

impl SegmentationParams {
    pub fn new(event: impl Into<String>, from_date: NaiveDate, to_date: NaiveDate) -> Self {
        SegmentationParams {
            event: event.into(),
            from_date,
            to_date,
            unit: Unit::Day,
            on: None,
            where_expr: None,
        }
    }

    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("event".to_string(), self.event.clone()),
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
            ("unit".to_string(), self.unit.to_string()),
        ];
        if let Some(on) = &self.on {
            query.push(("on".to_string(), on.clone()));
        }
        if let Some(where_expr) = &self.where_expr {
            query.push(("where".to_string(), where_expr.clone()));
        }
        query
    }
}

/// Saved funnel query by id.
#[derive(Debug, Clone)]
pub struct FunnelParams {
    pub funnel_id: i64,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: Option<Unit>,
}

impl FunnelParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("funnel_id".to_string(), self.funnel_id.to_string()),
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
        ];
        if let Some(unit) = self.unit {
            query.push(("unit".to_string(), unit.to_string()));
        }
        query
    }
}

/// Cohort retention: users born on `born_event` returning for `return_event`.
#[derive(Debug, Clone)]
pub struct RetentionParams {
    pub born_event: String,
    pub return_event: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: Unit,
    pub born_where: Option<String>,
    pub where_expr: Option<String>,
    pub interval_count: Option<u32>,
}

impl RetentionParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("born_event".to_string(), self.born_event.clone()),
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
            ("unit".to_string(), self.unit.to_string()),
            ("retention_type".to_string(), "birth".to_string()),
        ];
        if let Some(event) = &self.return_event {
            query.push(("event".to_string(), event.clone()));
        }
        if let Some(born_where) = &self.born_where {
            query.push(("born_where".to_string(), born_where.clone()));
        }
        if let Some(where_expr) = &self.where_expr {
            query.push(("where".to_string(), where_expr.clone()));
        }
        if let Some(n) = self.interval_count {
            query.push(("interval_count".to_string(), n.to_string()));
        }
        query
    }
}

/// Frequency-of-use ("addiction") query.
#[derive(Debug, Clone)]
pub struct FrequencyParams {
    pub event: Option<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Cohort bucket unit; hour buckets inside a day, day buckets inside a week.
    pub unit: Unit,
    pub addiction_unit: Unit,
    pub where_expr: Option<String>,
}

impl FrequencyParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
            ("unit".to_string(), self.unit.to_string()),
            ("addiction_unit".to_string(), self.addiction_unit.to_string()),
        ];
        if let Some(event) = &self.event {
            query.push(("event".to_string(), event.clone()));
        }
        if let Some(where_expr) = &self.where_expr {
            query.push(("where".to_string(), where_expr.clone()));
        }
        query
    }
}

/// Per-event counts over a date range.
#[derive(Debug, Clone)]
pub struct EventCountsParams {
    pub events: Vec<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: Unit,
}

impl EventCountsParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        vec![
            ("event".to_string(), Value::from(self.events.clone()).to_string()),
            ("type".to_string(), "general".to_string()),
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
            ("unit".to_string(), self.unit.to_string()),
        ]
    }
}

/// Per-property-value counts for one event property.
#[derive(Debug, Clone)]
pub struct PropertyCountsParams {
    pub event: String,
    pub property: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: Unit,
    /// Restrict to these property values.
    pub values: Option<Vec<String>>,
    pub limit: Option<u32>,
}

impl PropertyCountsParams {
    pub(crate) fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("event".to_string(), self.event.clone()),
            ("name".to_string(), self.property.clone()),
            ("type".to_string(), "general".to_string()),
            ("from_date".to_string(), self.from_date.to_string()),
            ("to_date".to_string(), self.to_date.to_string()),
            ("unit".to_string(), self.unit.to_string()),
        ];
        if let Some(values) = &self.values {
            query.push(("values".to_string(), Value::from(values.clone()).to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        query
    }
}

/// Query type selector for the arb-funnels (flows) endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowsQueryType {
    #[default]
    Flows,
    FlowsSankey,
}

impl FlowsQueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowsQueryType::Flows => "flows",
            FlowsQueryType::FlowsSankey => "flows_sankey",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn export_query_encodes_event_list_as_json() {
        let mut params = ExportParams::new(date("2024-01-01"), date("2024-01-07"));
        params.events = Some(vec!["Purchase".into(), "Signup".into()]);
        let query = params.to_query();
        assert!(query.contains(&("event".to_string(), "[\"Purchase\",\"Signup\"]".to_string())));
    }

    #[test]
    fn engage_rejects_both_id_forms() {
        let params = EngageParams {
            distinct_id: Some("a".into()),
            distinct_ids: Some(vec!["b".into()]),
            ..Default::default()
        };
        let err = params.validate().unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn engage_rejects_behaviors_with_cohort() {
        let params = EngageParams {
            behaviors: Some("{}".into()),
            cohort_id: Some(7),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn engage_rejects_include_all_users_without_cohort() {
        let params = EngageParams { include_all_users: Some(false), ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn engage_rejects_oversized_id_list() {
        let ids = (0..=MAX_DISTINCT_IDS).map(|i| i.to_string()).collect();
        let params = EngageParams { distinct_ids: Some(ids), ..Default::default() };
        assert!(params.validate().is_err());
    }

    #[test]
    fn engage_behaviors_fills_as_of_timestamp() {
        let params = EngageParams { behaviors: Some("{\"window\":\"7d\"}".into()), ..Default::default() };
        params.validate().unwrap();
        let form = params.to_form(1_700_000_000);
        assert!(form.contains(&("as_of_timestamp".to_string(), "1700000000".to_string())));
    }

    #[test]
    fn engage_cohort_defaults_include_all_users() {
        let params = EngageParams { cohort_id: Some(42), ..Default::default() };
        let form = params.to_form(0);
        assert!(form.contains(&("filter_by_cohort".to_string(), "{\"id\":42}".to_string())));
        assert!(form.contains(&("include_all_users".to_string(), "true".to_string())));
    }
}
