//! Introspection: listings, schemas, sampling, summaries, and column stats.

use crate::ingest::{TableKind, TableMetadata};
use crate::store::{Store, quote_ident, quote_literal};
use chrono::{DateTime, Utc};
use mp_core::{Error, Result, Table};
use serde::Serialize;
use serde_json::Value;

/// One user table as shown by `list_tables`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    pub row_count: u64,
    pub fetched_at: DateTime<Utc>,
}

/// One column of a table schema, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub column: String,
    pub type_name: String,
    pub nullable: bool,
}

/// Per-column statistics from the engine's `SUMMARIZE`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub column: String,
    pub type_name: String,
    pub min: Value,
    pub max: Value,
    pub approx_unique: Option<u64>,
    pub count: u64,
    pub null_pct: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub q25: Option<f64>,
    pub q50: Option<f64>,
    pub q75: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub row_count: u64,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBreakdownRow {
    pub event_name: String,
    pub count: u64,
    pub unique_users: u64,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub pct_of_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventBreakdown {
    pub total_events: u64,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub events: Vec<EventBreakdownRow>,
}

/// Distribution of one column or JSON path expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub count: u64,
    pub null_count: u64,
    pub null_pct: f64,
    pub unique_count: u64,
    pub unique_pct: f64,
    pub top_values: Vec<(Value, u64)>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl Store {
    /// User tables only; `_metadata` never appears.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        Ok(self
            .list_metadata()?
            .into_iter()
            .map(|m| TableInfo {
                name: m.table_name,
                kind: m.kind,
                row_count: m.row_count,
                fetched_at: m.fetched_at,
            })
            .collect())
    }

    /// Ordered column schema of a table.
    pub fn get_schema(&self, name: &str) -> Result<Vec<ColumnInfo>> {
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        let table = self.sql_rows(&format!("PRAGMA table_info({})", quote_literal(name)))?;
        let idx = index_of(&table, &["name", "type", "notnull"])?;
        Ok(table
            .rows
            .iter()
            .map(|row| ColumnInfo {
                column: row[idx[0]].as_str().unwrap_or_default().to_string(),
                type_name: row[idx[1]].as_str().unwrap_or_default().to_string(),
                nullable: !row[idx[2]].as_bool().unwrap_or(false),
            })
            .collect())
    }

    /// The stored metadata row for a user table.
    pub fn get_metadata(&self, name: &str) -> Result<TableMetadata> {
        self.read_metadata(name)?.ok_or_else(|| Error::table_not_found(name))
    }

    /// Random sample of up to `n` rows (reservoir, not a prefix). An empty
    /// table yields zero rows.
    pub fn sample(&self, name: &str, n: usize) -> Result<Table> {
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        self.sql_rows(&format!(
            "SELECT * FROM {} USING SAMPLE reservoir({n} ROWS)",
            quote_ident(name)
        ))
    }

    /// Whole-table summary: per-column type, range, approximate uniques,
    /// null percentage, and numeric distribution.
    pub fn summarize(&self, name: &str) -> Result<TableSummary> {
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        let quoted = quote_ident(name);
        let row_count = self
            .sql_scalar(&format!("SELECT count(*) FROM {quoted}"))?
            .as_u64()
            .unwrap_or(0);
        let table = self.sql_rows(&format!("SUMMARIZE SELECT * FROM {quoted}"))?;
        let col = |row: &[Value], label: &str| -> Value {
            table
                .columns
                .iter()
                .position(|c| c == label)
                .map(|i| row[i].clone())
                .unwrap_or(Value::Null)
        };
        let columns = table
            .rows
            .iter()
            .map(|row| ColumnSummary {
                column: col(row, "column_name").as_str().unwrap_or_default().to_string(),
                type_name: col(row, "column_type").as_str().unwrap_or_default().to_string(),
                min: col(row, "min"),
                max: col(row, "max"),
                approx_unique: as_u64_loose(&col(row, "approx_unique")),
                count: as_u64_loose(&col(row, "count")).unwrap_or(row_count),
                null_pct: as_f64_loose(&col(row, "null_percentage")),
                mean: as_f64_loose(&col(row, "avg")),
                std: as_f64_loose(&col(row, "std")),
                q25: as_f64_loose(&col(row, "q25")),
                q50: as_f64_loose(&col(row, "q50")),
                q75: as_f64_loose(&col(row, "q75")),
            })
            .collect();
        Ok(TableSummary { row_count, columns })
    }

    /// Per-event counts, uniques, and first/last seen, sorted by count
    /// descending. Requires the events-table columns.
    pub fn event_breakdown(&self, name: &str) -> Result<EventBreakdown> {
        let schema = self.get_schema(name)?;
        for required in ["event_name", "event_time", "distinct_id"] {
            if !schema.iter().any(|c| c.column == required) {
                return Err(Error::query(format!(
                    "event_breakdown requires an events table; '{name}' has no '{required}' column"
                )));
            }
        }
        let quoted = quote_ident(name);
        let totals = self.sql_rows(&format!(
            "SELECT count(*), min(event_time), max(event_time) FROM {quoted}"
        ))?;
        let totals_row = totals.rows.first().cloned().unwrap_or_default();
        let total_events = totals_row.first().and_then(Value::as_u64).unwrap_or(0);
        let first_seen = totals_row.get(1).and_then(|v| v.as_str().map(String::from));
        let last_seen = totals_row.get(2).and_then(|v| v.as_str().map(String::from));

        let per_event = self.sql_rows(&format!(
            "SELECT event_name, count(*) AS count, count(DISTINCT distinct_id) AS unique_users, \
                    min(event_time) AS first_seen, max(event_time) AS last_seen \
             FROM {quoted} GROUP BY event_name ORDER BY count DESC, event_name"
        ))?;
        let events = per_event
            .rows
            .iter()
            .map(|row| {
                let count = row[1].as_u64().unwrap_or(0);
                EventBreakdownRow {
                    event_name: row[0].as_str().unwrap_or_default().to_string(),
                    count,
                    unique_users: row[2].as_u64().unwrap_or(0),
                    first_seen: row[3].as_str().map(String::from),
                    last_seen: row[4].as_str().map(String::from),
                    pct_of_total: if total_events == 0 {
                        0.0
                    } else {
                        count as f64 * 100.0 / total_events as f64
                    },
                }
            })
            .collect();
        Ok(EventBreakdown { total_events, first_seen, last_seen, events })
    }

    /// Alphabetically sorted distinct top-level JSON keys in `properties`,
    /// optionally scoped to one event name.
    pub fn property_keys(&self, name: &str, event: Option<&str>) -> Result<Vec<String>> {
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        let filter = match event {
            Some(event) => format!(" WHERE event_name = {}", quote_literal(event)),
            None => String::new(),
        };
        let table = self.sql_rows(&format!(
            "SELECT DISTINCT key FROM \
             (SELECT unnest(json_keys(properties)) AS key FROM {}{filter}) ORDER BY key",
            quote_ident(name)
        ))?;
        Ok(table
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().and_then(|v| v.as_str().map(String::from)))
            .collect())
    }

    /// Distribution of a raw column or JSON path expression, e.g.
    /// `properties->>'$.country'`. Numeric stats appear when the values
    /// cast to numbers.
    pub fn column_stats(&self, name: &str, column_expr: &str, top_n: usize) -> Result<ColumnStats> {
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        let expr = if is_plain_identifier(column_expr) {
            quote_ident(column_expr)
        } else {
            column_expr.to_string()
        };
        let quoted = quote_ident(name);

        let totals = self.sql_rows(&format!(
            "SELECT count(*), count({expr}), count(DISTINCT {expr}) FROM {quoted}"
        ))?;
        let totals_row = totals.rows.first().cloned().unwrap_or_default();
        let count = totals_row.first().and_then(Value::as_u64).unwrap_or(0);
        let non_null = totals_row.get(1).and_then(Value::as_u64).unwrap_or(0);
        let unique_count = totals_row.get(2).and_then(Value::as_u64).unwrap_or(0);
        let null_count = count.saturating_sub(non_null);

        let top = self.sql_rows(&format!(
            "SELECT {expr} AS value, count(*) AS count FROM {quoted} \
             WHERE {expr} IS NOT NULL GROUP BY value ORDER BY count DESC, value LIMIT {top_n}"
        ))?;
        let top_values = top
            .rows
            .into_iter()
            .map(|mut row| {
                let count = row.get(1).and_then(Value::as_u64).unwrap_or(0);
                (row.remove(0), count)
            })
            .collect();

        let numeric = self.sql_rows(&format!(
            "SELECT min(x), max(x), avg(x), stddev(x) FROM \
             (SELECT TRY_CAST({expr} AS DOUBLE) AS x FROM {quoted}) WHERE x IS NOT NULL"
        ))?;
        let numeric_row = numeric.rows.first().cloned().unwrap_or_default();
        let numeric_at = |i: usize| numeric_row.get(i).and_then(as_f64_loose_ref);

        let pct = |part: u64| if count == 0 { 0.0 } else { part as f64 * 100.0 / count as f64 };
        Ok(ColumnStats {
            count,
            null_count,
            null_pct: pct(null_count),
            unique_count,
            unique_pct: pct(unique_count),
            top_values,
            min: numeric_at(0),
            max: numeric_at(1),
            mean: numeric_at(2),
            std: numeric_at(3),
        })
    }
}

fn index_of(table: &Table, labels: &[&str]) -> Result<Vec<usize>> {
    labels
        .iter()
        .map(|label| {
            table
                .columns
                .iter()
                .position(|c| c == label)
                .ok_or_else(|| Error::query(format!("engine output is missing '{label}'")))
        })
        .collect()
}

fn is_plain_identifier(expr: &str) -> bool {
    !expr.is_empty()
        && expr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn as_f64_loose(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_f64_loose_ref(value: &Value) -> Option<f64> {
    as_f64_loose(value)
}

fn as_u64_loose(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FetchMetadata, IngestOptions};
    use chrono::TimeZone;
    use mp_core::EventRecord;
    use serde_json::json;

    fn seeded_store() -> Store {
        let mut store = Store::in_memory().unwrap();
        let events: Vec<EventRecord> = (0..100)
            .map(|i| EventRecord {
                event_name: if i % 3 == 0 { "Purchase".into() } else { "View".into() },
                event_time: Utc.with_ymd_and_hms(2024, 1, 1 + (i % 7), 8, 0, 0).unwrap(),
                distinct_id: format!("user-{}", i % 20),
                insert_id: format!("evt_{i}"),
                properties: json!({
                    "country": if i % 2 == 0 { "US" } else { "DE" },
                    "amount": i,
                }),
            })
            .collect();
        store
            .create_events_table("events", events, &FetchMetadata::default(), IngestOptions::default())
            .unwrap();
        store
    }

    #[test]
    fn list_tables_excludes_metadata() {
        let store = seeded_store();
        let tables = store.list_tables().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "events");
        assert_eq!(tables[0].row_count, 100);
    }

    #[test]
    fn schema_is_ordered_and_typed() {
        let store = seeded_store();
        let schema = store.get_schema("events").unwrap();
        let names: Vec<&str> = schema.iter().map(|c| c.column.as_str()).collect();
        assert_eq!(names, vec!["event_name", "event_time", "distinct_id", "insert_id", "properties"]);
        assert!(!schema[0].nullable);
    }

    #[test]
    fn schema_of_missing_table_fails() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.get_schema("nope").unwrap_err().code(), "TABLE_NOT_FOUND");
    }

    #[test]
    fn sample_bounds_and_empty() {
        let mut store = seeded_store();
        let sample = store.sample("events", 10).unwrap();
        assert_eq!(sample.rows.len(), 10);
        store
            .create_events_table("empty", Vec::new(), &FetchMetadata::default(), IngestOptions::default())
            .unwrap();
        assert!(store.sample("empty", 5).unwrap().rows.is_empty());
    }

    #[test]
    fn summarize_reports_rows_and_columns() {
        let store = seeded_store();
        let summary = store.summarize("events").unwrap();
        assert_eq!(summary.row_count, 100);
        assert!(summary.columns.iter().any(|c| c.column == "event_name"));
    }

    #[test]
    fn event_breakdown_sorted_by_count() {
        let store = seeded_store();
        let breakdown = store.event_breakdown("events").unwrap();
        assert_eq!(breakdown.total_events, 100);
        assert_eq!(breakdown.events[0].event_name, "View");
        assert!(breakdown.events[0].count >= breakdown.events[1].count);
        let pct_sum: f64 = breakdown.events.iter().map(|e| e.pct_of_total).sum();
        assert!((pct_sum - 100.0).abs() < 1e-9);
    }

    #[test]
    fn event_breakdown_requires_event_columns() {
        let mut store = seeded_store();
        store.execute_raw("CREATE TABLE plain (x INTEGER)").unwrap();
        let err = store.event_breakdown("plain").unwrap_err();
        assert!(err.to_string().contains("event_name"));
    }

    #[test]
    fn property_keys_sorted() {
        let store = seeded_store();
        let keys = store.property_keys("events", None).unwrap();
        assert_eq!(keys, vec!["amount", "country"]);
        let scoped = store.property_keys("events", Some("Purchase")).unwrap();
        assert_eq!(scoped, vec!["amount", "country"]);
    }

    #[test]
    fn column_stats_on_plain_column() {
        let store = seeded_store();
        let stats = store.column_stats("events", "event_name", 5).unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.null_count, 0);
        assert_eq!(stats.unique_count, 2);
        assert_eq!(stats.top_values[0].0, json!("View"));
        // Strings do not cast to numbers.
        assert!(stats.mean.is_none());
    }

    #[test]
    fn column_stats_on_json_path() {
        let store = seeded_store();
        let stats = store
            .column_stats("events", "properties->>'$.amount'", 3)
            .unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.unique_count, 100);
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(99.0));
        assert!(stats.mean.is_some());
    }
}
