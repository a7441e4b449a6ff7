//! Saved-report results: the unified insights endpoint and flows.

use super::{TableCache, impl_dict, number_cell};
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of saved report the insights endpoint returned, inferred from
/// the `headers` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightsKind {
    Insights,
    Retention,
    Funnel,
}

/// Normalized payload of `/query/insights`. The endpoint serves insights,
/// retention, and funnel bookmarks through one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsResult {
    pub bookmark_id: i64,
    pub kind: InsightsKind,
    pub headers: Vec<String>,
    pub series: Value,
    pub meta: Value,
    pub computed_at: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(InsightsResult);

impl InsightsResult {
    pub(crate) fn from_wire(bookmark_id: i64, payload: &Value) -> Result<Self> {
        let headers: Vec<String> = payload
            .get("headers")
            .and_then(Value::as_array)
            .map(|h| h.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let series = payload.get("series").cloned().unwrap_or(Value::Null);
        if series.is_null() {
            return Err(Error::query("insights payload is missing 'series'"));
        }
        let kind = if headers.iter().any(|h| h.contains("$retention")) {
            InsightsKind::Retention
        } else if headers.iter().any(|h| h.contains("$funnel") || h.contains("$overall")) {
            InsightsKind::Funnel
        } else {
            InsightsKind::Insights
        };
        let date_range = payload.get("date_range");
        Ok(InsightsResult {
            bookmark_id,
            kind,
            headers,
            series,
            meta: payload.get("meta").cloned().unwrap_or(Value::Null),
            computed_at: payload
                .get("computed_at")
                .and_then(Value::as_str)
                .map(String::from),
            from_date: date_range
                .and_then(|r| r.get("from_date"))
                .and_then(Value::as_str)
                .map(String::from),
            to_date: date_range
                .and_then(|r| r.get("to_date"))
                .and_then(Value::as_str)
                .map(String::from),
            table: TableCache::default(),
        })
    }

    /// Best-effort flattening of the nested series into
    /// `{key..., date, value}` rows.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let mut rows = Vec::new();
            flatten_series(&self.series, &mut Vec::new(), &mut rows);
            let depth = rows.iter().map(|(path, _)| path.len()).max().unwrap_or(0);
            let mut columns: Vec<String> = (0..depth.saturating_sub(1))
                .map(|i| format!("key_{i}"))
                .collect();
            columns.push("date".to_string());
            columns.push("value".to_string());
            let rows = rows
                .into_iter()
                .map(|(mut path, value)| {
                    let date = path.pop().unwrap_or_default();
                    let mut row: Vec<Value> =
                        path.into_iter().map(Value::String).collect();
                    while row.len() < depth.saturating_sub(1) {
                        row.push(Value::Null);
                    }
                    row.push(Value::String(date));
                    row.push(number_cell(value));
                    row
                })
                .collect();
            Table::new(columns, rows)
        })
    }
}

/// Depth-first walk of nested objects down to numeric leaves.
fn flatten_series(value: &Value, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, f64)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                flatten_series(child, path, out);
                path.pop();
            }
        }
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                out.push((path.clone(), f));
            }
        }
        _ => {}
    }
}

/// Native result of the arb-funnels flows endpoint; the shape is distinct
/// from the unified insights payload and kept mostly intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowsResult {
    pub bookmark_id: i64,
    pub query_type: String,
    pub steps: Value,
    pub breakdowns: Value,
    pub overall_conversion_rate: Option<f64>,
    pub meta: Value,
    pub computed_at: Option<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(FlowsResult);

impl FlowsResult {
    pub(crate) fn from_wire(bookmark_id: i64, query_type: &str, payload: &Value) -> Result<Self> {
        let steps = payload.get("steps").cloned().unwrap_or(Value::Null);
        if steps.is_null() {
            return Err(Error::query("flows payload is missing 'steps'"));
        }
        Ok(FlowsResult {
            bookmark_id,
            query_type: query_type.to_string(),
            steps,
            breakdowns: payload.get("breakdowns").cloned().unwrap_or(Value::Null),
            overall_conversion_rate: payload
                .get("overallConversionRate")
                .and_then(Value::as_f64),
            meta: payload.get("metadata").cloned().unwrap_or(Value::Null),
            computed_at: payload
                .get("computed_at")
                .and_then(Value::as_str)
                .map(String::from),
            table: TableCache::default(),
        })
    }

    /// One row per step object, rendered as `{step, detail}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let rows = self
                .steps
                .as_array()
                .map(|steps| {
                    steps
                        .iter()
                        .enumerate()
                        .map(|(i, step)| vec![Value::from(i as u64), step.clone()])
                        .collect()
                })
                .unwrap_or_default();
            Table::new(vec!["step".into(), "detail".into()], rows)
        })
    }
}
