//! Fetch outcomes: single-range and parallel chunked.

use super::{TableCache, impl_dict, number_cell};
use chrono::{DateTime, NaiveDate, Utc};
use mp_core::Table;
use mp_store::TableKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one single-range fetch into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub table: String,
    pub rows: u64,
    pub kind: TableKind,
    pub duration_seconds: f64,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) cache: TableCache,
}

impl_dict!(FetchResult);

impl FetchResult {
    pub fn to_table(&self) -> &Table {
        self.cache.get_or_init(|| {
            Table::new(
                vec![
                    "table".into(),
                    "rows".into(),
                    "type".into(),
                    "duration_seconds".into(),
                    "from_date".into(),
                    "to_date".into(),
                    "fetched_at".into(),
                ],
                vec![vec![
                    Value::String(self.table.clone()),
                    Value::from(self.rows),
                    Value::String(self.kind.as_str().to_string()),
                    number_cell(self.duration_seconds),
                    self.from_date.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null),
                    self.to_date.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null),
                    Value::String(self.fetched_at.to_rfc3339()),
                ]],
            )
        })
    }
}

/// Outcome of one date chunk of a parallel fetch. `error` is `None` on
/// success; failed chunks keep their range so the caller can retry them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    /// Records streamed out of this chunk (before dedup).
    pub records: u64,
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a parallel chunked fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelFetchResult {
    pub table: String,
    /// Rows in the target table after the merge.
    pub rows: u64,
    pub duration_seconds: f64,
    pub chunks: Vec<ChunkOutcome>,
    pub fetched_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) cache: TableCache,
}

impl_dict!(ParallelFetchResult);

impl ParallelFetchResult {
    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.chunks.iter().filter(|c| !c.is_success())
    }

    /// Columns `{from_date, to_date, records, status}`, one row per chunk.
    pub fn to_table(&self) -> &Table {
        self.cache.get_or_init(|| {
            let rows = self
                .chunks
                .iter()
                .map(|chunk| {
                    vec![
                        Value::String(chunk.from_date.to_string()),
                        Value::String(chunk.to_date.to_string()),
                        Value::from(chunk.records),
                        Value::String(
                            chunk.error.clone().unwrap_or_else(|| "ok".to_string()),
                        ),
                    ]
                })
                .collect();
            Table::new(
                vec!["from_date".into(), "to_date".into(), "records".into(), "status".into()],
                rows,
            )
        })
    }
}
