//! Event-count, property-count, and top-event results.

use super::{TableCache, impl_dict, number_cell, segmentation::decode_series};
use chrono::NaiveDate;
use mp_client::{EventCountsParams, PropertyCountsParams};
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Counts per event per date bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCountsResult {
    pub events: Vec<String>,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    /// event -> date -> count
    pub series: BTreeMap<String, BTreeMap<String, f64>>,
    pub dates: Vec<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(EventCountsResult);

impl EventCountsResult {
    pub(crate) fn from_wire(params: &EventCountsParams, payload: &Value) -> Result<Self> {
        let (dates, series) = decode_series(payload)?;
        Ok(EventCountsResult {
            events: params.events.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            series,
            dates,
            table: TableCache::default(),
        })
    }

    /// Columns `{date, event, count}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            super::segmentation::series_table(&self.dates, &self.series, &["date", "event", "count"])
        })
    }
}

/// Counts per property value per date bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCountsResult {
    pub event: String,
    pub property: String,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub unit: String,
    /// property value -> date -> count
    pub series: BTreeMap<String, BTreeMap<String, f64>>,
    pub dates: Vec<String>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(PropertyCountsResult);

impl PropertyCountsResult {
    pub(crate) fn from_wire(params: &PropertyCountsParams, payload: &Value) -> Result<Self> {
        let (dates, series) = decode_series(payload)?;
        Ok(PropertyCountsResult {
            event: params.event.clone(),
            property: params.property.clone(),
            from_date: params.from_date,
            to_date: params.to_date,
            unit: params.unit.to_string(),
            series,
            dates,
            table: TableCache::default(),
        })
    }

    /// Columns `{date, value, count}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            super::segmentation::series_table(&self.dates, &self.series, &["date", "value", "count"])
        })
    }
}

/// One entry of the top-events ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEvent {
    pub event: String,
    pub amount: u64,
    pub percent_change: Option<f64>,
}

/// Today's most common events, in server ranking order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopEventsResult {
    pub events: Vec<TopEvent>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(TopEventsResult);

impl TopEventsResult {
    pub(crate) fn from_wire(payload: &Value) -> Result<Self> {
        let events = payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::query("top events payload is missing 'events'"))?
            .iter()
            .map(|entry| TopEvent {
                event: entry
                    .get("event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                amount: entry.get("amount").and_then(Value::as_u64).unwrap_or(0),
                percent_change: entry.get("percent_change").and_then(Value::as_f64),
            })
            .collect();
        Ok(TopEventsResult { events, table: TableCache::default() })
    }

    /// Columns `{event, amount, percent_change}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let rows = self
                .events
                .iter()
                .map(|e| {
                    vec![
                        Value::String(e.event.clone()),
                        Value::from(e.amount),
                        e.percent_change.map(number_cell).unwrap_or(Value::Null),
                    ]
                })
                .collect();
            Table::new(vec!["event".into(), "amount".into(), "percent_change".into()], rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mp_client::Unit;
    use serde_json::json;

    #[test]
    fn event_counts_tabulate_date_major() {
        let params = EventCountsParams {
            events: vec!["A".into(), "B".into()],
            from_date: "2024-01-01".parse().unwrap(),
            to_date: "2024-01-02".parse().unwrap(),
            unit: Unit::Day,
        };
        let payload = json!({
            "data": {
                "series": ["2024-01-01", "2024-01-02"],
                "values": {
                    "A": {"2024-01-01": 5, "2024-01-02": 6},
                    "B": {"2024-01-01": 1, "2024-01-02": 2}
                }
            }
        });
        let result = EventCountsResult::from_wire(&params, &payload).unwrap();
        let table = result.to_table();
        assert_eq!(table.columns, vec!["date", "event", "count"]);
        assert_eq!(table.rows[0], vec![json!("2024-01-01"), json!("A"), json!(5)]);
        assert_eq!(table.rows[1], vec![json!("2024-01-01"), json!("B"), json!(1)]);
        assert_eq!(table.rows.len(), 4);
    }

    #[test]
    fn top_events_preserve_ranking_order() {
        let payload = json!({
            "events": [
                {"event": "Play", "amount": 900, "percent_change": 0.12},
                {"event": "Pause", "amount": 300}
            ],
            "type": "general"
        });
        let result = TopEventsResult::from_wire(&payload).unwrap();
        assert_eq!(result.events[0].event, "Play");
        assert_eq!(result.events[1].percent_change, None);
        assert_eq!(result.to_table().rows.len(), 2);
    }

    #[test]
    fn dict_roundtrip() {
        let payload = json!({"events": [{"event": "X", "amount": 1}]});
        let result = TopEventsResult::from_wire(&payload).unwrap();
        assert_eq!(TopEventsResult::from_dict(&result.to_dict()).unwrap(), result);
    }
}
