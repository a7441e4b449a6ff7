//! Activity-feed results: the raw event stream of specific users.

use super::{TableCache, impl_dict};
use chrono::{DateTime, Utc};
use mp_core::{Error, Result, Table};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub distinct_id: String,
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFeedResult {
    pub distinct_ids: Vec<String>,
    /// Sorted by `event_time` ascending.
    pub events: Vec<ActivityEvent>,
    #[serde(skip)]
    table: TableCache,
}

impl_dict!(ActivityFeedResult);

impl ActivityFeedResult {
    pub(crate) fn from_wire(distinct_ids: &[String], payload: &Value) -> Result<Self> {
        let raw_events = payload
            .get("results")
            .and_then(|r| r.get("events"))
            .and_then(Value::as_array)
            .ok_or_else(|| Error::query("activity payload is missing 'results.events'"))?;
        let mut events = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            let properties = raw.get("properties").cloned().unwrap_or(Value::Null);
            let time = properties
                .get("time")
                .and_then(Value::as_i64)
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| Error::query("activity event is missing 'time'"))?;
            events.push(ActivityEvent {
                distinct_id: properties
                    .get("distinct_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                event_name: raw
                    .get("event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                event_time: time,
                properties,
            });
        }
        events.sort_by_key(|e| e.event_time);
        Ok(ActivityFeedResult {
            distinct_ids: distinct_ids.to_vec(),
            events,
            table: TableCache::default(),
        })
    }

    /// Columns `{event_time, distinct_id, event}`.
    pub fn to_table(&self) -> &Table {
        self.table.get_or_init(|| {
            let rows = self
                .events
                .iter()
                .map(|e| {
                    vec![
                        Value::String(e.event_time.to_rfc3339()),
                        Value::String(e.distinct_id.clone()),
                        Value::String(e.event_name.clone()),
                    ]
                })
                .collect();
            Table::new(vec!["event_time".into(), "distinct_id".into(), "event".into()], rows)
        })
    }
}
