//! SQL execution in the three public shapes, plus cell conversion.

use crate::store::Store;
use chrono::DateTime;
use duckdb::types::{TimeUnit, ValueRef};
use mp_core::{Error, Result, Table};
use serde_json::{Number, Value};

/// A typed column of a [`DataFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub type_name: String,
}

/// Tabular query result with column types. Types are observed from the
/// returned values; columns that were null throughout report `"NULL"`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl DataFrame {
    /// Collapse to the plain `{columns, rows}` shape.
    pub fn into_table(self) -> Table {
        Table::new(self.columns.into_iter().map(|c| c.name).collect(), self.rows)
    }
}

impl Store {
    /// Execute SQL and return a typed tabular result.
    pub fn sql(&self, sql: &str) -> Result<DataFrame> {
        let (columns, rows, types) = self.run(sql)?;
        let columns = columns
            .into_iter()
            .zip(types)
            .map(|(name, type_name)| Column { name, type_name: type_name.to_string() })
            .collect();
        Ok(DataFrame { columns, rows })
    }

    /// Execute SQL and return labeled columns plus row tuples. The
    /// canonical shape for CLI and host consumers.
    pub fn sql_rows(&self, sql: &str) -> Result<Table> {
        let (columns, rows, _) = self.run(sql)?;
        Ok(Table::new(columns, rows))
    }

    /// Execute SQL that must produce exactly one row and one column.
    pub fn sql_scalar(&self, sql: &str) -> Result<Value> {
        let (columns, mut rows, _) = self.run(sql)?;
        if columns.len() != 1 || rows.len() != 1 {
            return Err(Error::query_with(
                format!(
                    "scalar query produced {} row(s) x {} column(s), expected exactly 1x1",
                    rows.len(),
                    columns.len()
                ),
                sql,
            ));
        }
        Ok(rows.remove(0).remove(0))
    }

    /// Execute one or more statements for their side effects (DDL, DML).
    pub fn execute_raw(&mut self, sql: &str) -> Result<()> {
        self.ensure_writable()?;
        self.conn.execute_batch(sql).map_err(|e| Error::query_with(e.to_string(), sql))
    }

    /// Escape hatch: the engine-native connection, for advanced composition
    /// (relation APIs, extensions). The store still owns it.
    pub fn raw_connection(&self) -> &duckdb::Connection {
        &self.conn
    }

    fn run(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<Value>>, Vec<&'static str>)> {
        let mut stmt =
            self.conn.prepare(sql).map_err(|e| Error::query_with(e.to_string(), sql))?;
        let mut rows_iter =
            stmt.query([]).map_err(|e| Error::query_with(e.to_string(), sql))?;

        let column_count = rows_iter.as_ref().map_or(0, duckdb::Statement::column_count);
        let columns: Vec<String> = (0..column_count)
            .map(|i| {
                rows_iter
                    .as_ref()
                    .and_then(|s| s.column_name(i).ok())
                    .map_or_else(|| format!("col{i}"), String::clone)
            })
            .collect();

        let mut types: Vec<&'static str> = vec!["NULL"; column_count];
        let mut rows = Vec::new();
        while let Some(row) =
            rows_iter.next().map_err(|e| Error::query_with(e.to_string(), sql))?
        {
            let mut cells = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value_ref =
                    row.get_ref(i).map_err(|e| Error::query_with(e.to_string(), sql))?;
                if types[i] == "NULL" {
                    let observed = type_name_of(&value_ref);
                    if observed != "NULL" {
                        types[i] = observed;
                    }
                }
                cells.push(value_ref_to_json(value_ref));
            }
            rows.push(cells);
        }
        Ok((columns, rows, types))
    }
}

pub(crate) fn type_name_of(value: &ValueRef<'_>) -> &'static str {
    match value {
        ValueRef::Null => "NULL",
        ValueRef::Boolean(_) => "BOOLEAN",
        ValueRef::TinyInt(_) | ValueRef::SmallInt(_) | ValueRef::Int(_) | ValueRef::BigInt(_) => {
            "BIGINT"
        }
        ValueRef::HugeInt(_) => "HUGEINT",
        ValueRef::UTinyInt(_)
        | ValueRef::USmallInt(_)
        | ValueRef::UInt(_)
        | ValueRef::UBigInt(_) => "UBIGINT",
        ValueRef::Float(_) | ValueRef::Double(_) => "DOUBLE",
        ValueRef::Decimal(_) => "DECIMAL",
        ValueRef::Text(_) => "VARCHAR",
        ValueRef::Blob(_) => "BLOB",
        ValueRef::Date32(_) => "DATE",
        ValueRef::Time64(..) => "TIME",
        ValueRef::Timestamp(..) => "TIMESTAMP",
        _ => "OTHER",
    }
}

/// Convert one engine cell to a JSON scalar. Timestamps and dates become
/// ISO-8601 strings.
pub(crate) fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(v) => Value::from(v),
        ValueRef::SmallInt(v) => Value::from(v),
        ValueRef::Int(v) => Value::from(v),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(small) => Value::from(small),
            Err(_) => Value::String(v.to_string()),
        },
        ValueRef::UTinyInt(v) => Value::from(v),
        ValueRef::USmallInt(v) => Value::from(v),
        ValueRef::UInt(v) => Value::from(v),
        ValueRef::UBigInt(v) => Value::from(v),
        ValueRef::Float(v) => float_to_json(v as f64),
        ValueRef::Double(v) => float_to_json(v),
        ValueRef::Decimal(d) => {
            let rendered = d.to_string();
            match rendered.parse::<f64>() {
                Ok(f) => float_to_json(f),
                Err(_) => Value::String(rendered),
            }
        }
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => {
            let date = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .expect("unix epoch is a valid date")
                .checked_add_signed(chrono::Duration::days(days as i64));
            match date {
                Some(d) => Value::String(d.to_string()),
                None => Value::Null,
            }
        }
        ValueRef::Time64(unit, v) => {
            let micros = to_micros(unit, v);
            let secs = (micros / 1_000_000) as u32;
            let sub_micros = (micros % 1_000_000) as u32;
            match chrono::NaiveTime::from_num_seconds_from_midnight_opt(secs, sub_micros * 1000) {
                Some(t) => Value::String(t.to_string()),
                None => Value::Null,
            }
        }
        ValueRef::Timestamp(unit, v) => {
            let micros = to_micros(unit, v);
            match DateTime::from_timestamp_micros(micros) {
                Some(dt) => Value::String(dt.to_rfc3339()),
                None => Value::Null,
            }
        }
        other => Value::String(format!("{other:?}")),
    }
}

fn to_micros(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v.saturating_mul(1_000_000),
        TimeUnit::Millisecond => v.saturating_mul(1_000),
        TimeUnit::Microsecond => v,
        TimeUnit::Nanosecond => v / 1_000,
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sql_rows_labels_columns() {
        let store = Store::in_memory().unwrap();
        let table = store.sql_rows("SELECT 'foo' AS name, 123 AS count").unwrap();
        assert_eq!(table.columns, vec!["name", "count"]);
        assert_eq!(table.rows, vec![vec![json!("foo"), json!(123)]]);
        assert_eq!(table.to_csv(), "name,count\nfoo,123");
    }

    #[test]
    fn sql_reports_column_types() {
        let store = Store::in_memory().unwrap();
        let df = store.sql("SELECT 1 AS n, 'x' AS s, 1.5 AS f, true AS b").unwrap();
        let types: Vec<&str> = df.columns.iter().map(|c| c.type_name.as_str()).collect();
        assert_eq!(types, vec!["BIGINT", "VARCHAR", "DOUBLE", "BOOLEAN"]);
    }

    #[test]
    fn sql_scalar_returns_single_value() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.sql_scalar("SELECT 41 + 1").unwrap(), json!(42));
    }

    #[test]
    fn sql_scalar_rejects_multi_column() {
        let store = Store::in_memory().unwrap();
        let err = store.sql_scalar("SELECT 1, 2").unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
    }

    #[test]
    fn sql_scalar_rejects_multi_row() {
        let store = Store::in_memory().unwrap();
        let err = store.sql_scalar("SELECT * FROM (VALUES (1), (2))").unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
    }

    #[test]
    fn engine_error_carries_query_text() {
        let store = Store::in_memory().unwrap();
        let err = store.sql_rows("SELECT FROM nowhere !!").unwrap_err();
        let payload = err.to_payload();
        assert_eq!(payload["code"], "QUERY_FAILED");
        assert!(payload["details"]["query"].as_str().unwrap().contains("nowhere"));
    }

    #[test]
    fn timestamps_render_iso8601() {
        let store = Store::in_memory().unwrap();
        let value = store.sql_scalar("SELECT TIMESTAMP '2024-01-01 12:30:00'").unwrap();
        assert_eq!(value, json!("2024-01-01T12:30:00+00:00"));
        let date = store.sql_scalar("SELECT DATE '2024-03-05'").unwrap();
        assert_eq!(date, json!("2024-03-05"));
    }
}
