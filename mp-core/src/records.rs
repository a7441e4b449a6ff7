//! Logical event and profile records and their wire decoders.
//!
//! The Export endpoint emits one JSON object per line shaped
//! `{"event": ..., "properties": {...}}` with `time`, `distinct_id` and
//! `$insert_id` nested inside the properties; Engage pages carry
//! `{"$distinct_id": ..., "$properties": {...}}` entries. Decoding lifts the
//! reserved keys into typed columns and leaves everything else in the
//! `properties` JSON payload.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event row. `insert_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub distinct_id: String,
    pub insert_id: String,
    pub properties: Value,
}

impl EventRecord {
    /// Decode one Export JSONL line.
    pub fn from_export_json(line: Value) -> Result<Self> {
        let Value::Object(mut obj) = line else {
            return Err(Error::query("export line is not a JSON object"));
        };
        let event_name = match obj.remove("event") {
            Some(Value::String(s)) => s,
            _ => return Err(Error::query("export line is missing 'event'")),
        };
        let mut properties = match obj.remove("properties") {
            Some(Value::Object(map)) => map,
            _ => return Err(Error::query("export line is missing 'properties'")),
        };

        let event_time = match properties.remove("time") {
            Some(Value::Number(n)) => {
                let secs = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
                secs.and_then(|s| DateTime::from_timestamp(s, 0))
                    .ok_or_else(|| Error::query("export line has an invalid 'time'"))?
            }
            _ => return Err(Error::query("export line is missing 'time'")),
        };

        let distinct_id = match properties.remove("distinct_id") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };

        // $insert_id is normally supplied by Mixpanel; older events can lack
        // it, so fall back to a deterministic composite to keep dedup stable.
        let insert_id = match properties.remove("$insert_id") {
            Some(Value::String(s)) => s,
            _ => format!("{event_name}-{}-{distinct_id}", event_time.timestamp()),
        };

        Ok(EventRecord {
            event_name,
            event_time,
            distinct_id,
            insert_id,
            properties: Value::Object(properties),
        })
    }
}

/// One profile row, keyed by `distinct_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub distinct_id: String,
    pub properties: Value,
    pub last_seen: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Decode one Engage page entry.
    pub fn from_engage_json(entry: Value) -> Result<Self> {
        let Value::Object(mut obj) = entry else {
            return Err(Error::query("engage entry is not a JSON object"));
        };
        let distinct_id = match obj.remove("$distinct_id") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => return Err(Error::query("engage entry is missing '$distinct_id'")),
        };
        let properties = obj.remove("$properties").unwrap_or_else(|| Value::Object(Default::default()));
        let last_seen = properties
            .get("$last_seen")
            .and_then(Value::as_str)
            .and_then(parse_profile_timestamp);
        Ok(ProfileRecord { distinct_id, properties, last_seen })
    }
}

/// Engage renders `$last_seen` either as RFC 3339 or as a bare
/// `YYYY-MM-DDTHH:MM:SS` local-less timestamp; both are read as UTC.
fn parse_profile_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_export_line() {
        let record = EventRecord::from_export_json(json!({
            "event": "Purchase",
            "properties": {
                "time": 1704067200,
                "distinct_id": "user-1",
                "$insert_id": "abc123",
                "amount": 9.99,
                "$browser": "Firefox"
            }
        }))
        .unwrap();
        assert_eq!(record.event_name, "Purchase");
        assert_eq!(record.distinct_id, "user-1");
        assert_eq!(record.insert_id, "abc123");
        assert_eq!(record.event_time.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        // Reserved keys are lifted out, the rest stays.
        assert!(record.properties.get("time").is_none());
        assert_eq!(record.properties["amount"], json!(9.99));
        assert_eq!(record.properties["$browser"], json!("Firefox"));
    }

    #[test]
    fn missing_insert_id_gets_deterministic_fallback() {
        let line = json!({
            "event": "Signup",
            "properties": {"time": 1704067200, "distinct_id": "u"}
        });
        let a = EventRecord::from_export_json(line.clone()).unwrap();
        let b = EventRecord::from_export_json(line).unwrap();
        assert_eq!(a.insert_id, b.insert_id);
    }

    #[test]
    fn rejects_malformed_export_line() {
        let err = EventRecord::from_export_json(json!({"properties": {}})).unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
    }

    #[test]
    fn decodes_engage_entry_with_last_seen() {
        let record = ProfileRecord::from_engage_json(json!({
            "$distinct_id": "user-1",
            "$properties": {"$name": "Ada", "$last_seen": "2024-02-01T10:30:00"}
        }))
        .unwrap();
        assert_eq!(record.distinct_id, "user-1");
        assert_eq!(record.last_seen.unwrap().to_rfc3339(), "2024-02-01T10:30:00+00:00");
        assert_eq!(record.properties["$name"], json!("Ada"));
    }

    #[test]
    fn engage_entry_without_properties_is_valid() {
        let record = ProfileRecord::from_engage_json(json!({"$distinct_id": "x"})).unwrap();
        assert!(record.last_seen.is_none());
        assert_eq!(record.properties, json!({}));
    }
}
