//! Table creation, batched ingestion, and the `_metadata` bookkeeping.
//!
//! Ingestion drains iterator-shaped input in batches, one transaction per
//! batch to bound memory. Insert statements carry `OR IGNORE` keyed on the
//! dedup column (`insert_id` for events, `distinct_id` for profiles), which
//! makes append idempotent and chunk ordering irrelevant.

use crate::query::value_ref_to_json;
use crate::store::{METADATA_TABLE, Store, quote_ident};
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::params;
use mp_core::{Error, EventRecord, ProfileRecord, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const MIN_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Events,
    Profiles,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Events => "events",
            TableKind::Profiles => "profiles",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "events" => Ok(TableKind::Events),
            "profiles" => Ok(TableKind::Profiles),
            other => Err(Error::query(format!("unknown table type '{other}' in metadata"))),
        }
    }
}

/// Fetch provenance recorded alongside a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchMetadata {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub filter_events: Option<Vec<String>>,
    pub filter_where: Option<String>,
    pub filter_cohort_id: Option<i64>,
    pub filter_group_id: Option<String>,
    pub filter_behaviors: Option<String>,
}

/// One `_metadata` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table_name: String,
    pub kind: TableKind,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fetch: FetchMetadata,
    pub row_count: u64,
}

/// Per-call ingestion knobs. `progress` is invoked after each committed
/// batch with the cumulative count of consumed records; the invoking task
/// is unspecified.
#[derive(Default)]
pub struct IngestOptions<'a> {
    /// Records per transaction; `None` means [`DEFAULT_BATCH_SIZE`].
    pub batch_size: Option<usize>,
    /// Append to an existing table instead of failing with `TABLE_EXISTS`.
    pub append: bool,
    pub progress: Option<&'a mut dyn FnMut(u64)>,
}

impl IngestOptions<'_> {
    fn effective_batch_size(&self) -> Result<usize> {
        let size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
            return Err(Error::query(format!(
                "batch_size {size} is out of range ({MIN_BATCH_SIZE}..={MAX_BATCH_SIZE})"
            )));
        }
        Ok(size)
    }
}

/// How a writer treats a pre-existing target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fresh table; an existing one is `TABLE_EXISTS`.
    Create,
    /// Existing table required; a missing one is `TABLE_NOT_FOUND`.
    Append,
    /// Create when missing, append when present.
    CreateOrAppend,
}

/// Row types the store can ingest.
pub trait Ingestible {
    const KIND: TableKind;
    fn create_sql(table: &str) -> String;
    fn insert_sql(table: &str) -> String;
    fn insert(&self, stmt: &mut duckdb::Statement<'_>) -> duckdb::Result<usize>;
}

impl Ingestible for EventRecord {
    const KIND: TableKind = TableKind::Events;

    fn create_sql(table: &str) -> String {
        format!(
            "CREATE TABLE {} (
                event_name VARCHAR NOT NULL,
                event_time TIMESTAMP NOT NULL,
                distinct_id VARCHAR NOT NULL,
                insert_id VARCHAR PRIMARY KEY,
                properties JSON
            )",
            quote_ident(table)
        )
    }

    fn insert_sql(table: &str) -> String {
        format!(
            "INSERT OR IGNORE INTO {} \
             (event_name, event_time, distinct_id, insert_id, properties) \
             VALUES (?, ?::TIMESTAMP, ?, ?, ?::JSON)",
            quote_ident(table)
        )
    }

    fn insert(&self, stmt: &mut duckdb::Statement<'_>) -> duckdb::Result<usize> {
        stmt.execute(params![
            self.event_name,
            sql_timestamp(&self.event_time),
            self.distinct_id,
            self.insert_id,
            self.properties.to_string(),
        ])
    }
}

impl Ingestible for ProfileRecord {
    const KIND: TableKind = TableKind::Profiles;

    fn create_sql(table: &str) -> String {
        format!(
            "CREATE TABLE {} (
                distinct_id VARCHAR PRIMARY KEY,
                properties JSON,
                last_seen TIMESTAMP
            )",
            quote_ident(table)
        )
    }

    fn insert_sql(table: &str) -> String {
        format!(
            "INSERT OR IGNORE INTO {} (distinct_id, properties, last_seen) \
             VALUES (?, ?::JSON, ?::TIMESTAMP)",
            quote_ident(table)
        )
    }

    fn insert(&self, stmt: &mut duckdb::Statement<'_>) -> duckdb::Result<usize> {
        stmt.execute(params![
            self.distinct_id,
            self.properties.to_string(),
            self.last_seen.as_ref().map(sql_timestamp),
        ])
    }
}

/// Incremental writer used by the fetcher to interleave network reads with
/// per-batch transactions. [`Store::create_events_table`] and friends drive
/// it over a whole iterator in one call.
pub struct TableWriter<'s, R: Ingestible> {
    store: &'s mut Store,
    table: String,
    consumed: u64,
    created: bool,
    _marker: PhantomData<R>,
}

impl<'s, R: Ingestible> TableWriter<'s, R> {
    pub fn begin(store: &'s mut Store, table: &str, mode: WriteMode) -> Result<Self> {
        store.ensure_writable()?;
        validate_table_name(table)?;
        let exists = store.table_exists(table)?;
        match (exists, mode) {
            (true, WriteMode::Create) => return Err(Error::table_exists(table)),
            (false, WriteMode::Append) => return Err(Error::table_not_found(table)),
            (false, _) => {
                store
                    .conn
                    .execute_batch(&R::create_sql(table))
                    .map_err(|e| Error::query(format!("failed to create '{table}': {e}")))?;
            }
            (true, _) => {}
        }
        Ok(TableWriter {
            store,
            table: table.to_string(),
            consumed: 0,
            created: !exists,
            _marker: PhantomData,
        })
    }

    /// Whether this writer created the target table.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Best-effort removal of a table this writer created, for error paths
    /// where no metadata row exists yet. A no-op on appends.
    pub fn discard(self) {
        if self.created {
            let _ = self
                .store
                .conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&self.table)));
        }
    }

    /// Insert one batch in its own transaction. Returns the cumulative
    /// count of consumed records (duplicates are consumed but ignored).
    pub fn write(&mut self, batch: &[R]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(self.consumed);
        }
        let tx = self
            .store
            .conn
            .transaction()
            .map_err(|e| Error::query(format!("failed to begin transaction: {e}")))?;
        {
            let mut stmt = tx
                .prepare(&R::insert_sql(&self.table))
                .map_err(|e| Error::query(format!("failed to prepare insert: {e}")))?;
            for record in batch {
                record
                    .insert(&mut stmt)
                    .map_err(|e| Error::query(format!("insert into '{}' failed: {e}", self.table)))?;
            }
        }
        tx.commit()
            .map_err(|e| Error::query(format!("failed to commit batch: {e}")))?;
        self.consumed += batch.len() as u64;
        Ok(self.consumed)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Upsert the `_metadata` row (widening the covered date range on
    /// append) and return the table's actual row count.
    pub fn finish(self, fetch: &FetchMetadata) -> Result<u64> {
        let row_count: i64 = self
            .store
            .conn
            .query_row(
                &format!("SELECT count(*) FROM {}", quote_ident(&self.table)),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::query(format!("failed to count '{}': {e}", self.table)))?;

        let merged = match self.store.read_metadata(&self.table)? {
            Some(existing) => FetchMetadata {
                from_date: min_opt(existing.fetch.from_date, fetch.from_date),
                to_date: max_opt(existing.fetch.to_date, fetch.to_date),
                ..fetch.clone()
            },
            None => fetch.clone(),
        };

        let meta = TableMetadata {
            table_name: self.table.clone(),
            kind: R::KIND,
            fetched_at: Utc::now(),
            fetch: merged,
            row_count: row_count as u64,
        };
        self.store.upsert_metadata(&meta)?;
        tracing::debug!(table = %self.table, rows = meta.row_count, "table write finished");
        Ok(meta.row_count)
    }
}

impl Store {
    /// Create an events table from an iterator of records. With
    /// `options.append` an existing table is appended to instead.
    pub fn create_events_table<I>(
        &mut self,
        name: &str,
        records: I,
        metadata: &FetchMetadata,
        options: IngestOptions<'_>,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        let mode = if options.append { WriteMode::CreateOrAppend } else { WriteMode::Create };
        self.ingest::<EventRecord, I>(name, records, metadata, options, mode)
    }

    /// Create a profiles table from an iterator of records.
    pub fn create_profiles_table<I>(
        &mut self,
        name: &str,
        records: I,
        metadata: &FetchMetadata,
        options: IngestOptions<'_>,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = ProfileRecord>,
    {
        let mode = if options.append { WriteMode::CreateOrAppend } else { WriteMode::Create };
        self.ingest::<ProfileRecord, I>(name, records, metadata, options, mode)
    }

    /// Append into an existing events table; `TABLE_NOT_FOUND` otherwise.
    pub fn append_events<I>(
        &mut self,
        name: &str,
        records: I,
        metadata: &FetchMetadata,
        options: IngestOptions<'_>,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = EventRecord>,
    {
        self.ingest::<EventRecord, I>(name, records, metadata, options, WriteMode::Append)
    }

    /// Append into an existing profiles table; `TABLE_NOT_FOUND` otherwise.
    pub fn append_profiles<I>(
        &mut self,
        name: &str,
        records: I,
        metadata: &FetchMetadata,
        options: IngestOptions<'_>,
    ) -> Result<u64>
    where
        I: IntoIterator<Item = ProfileRecord>,
    {
        self.ingest::<ProfileRecord, I>(name, records, metadata, options, WriteMode::Append)
    }

    fn ingest<R, I>(
        &mut self,
        name: &str,
        records: I,
        metadata: &FetchMetadata,
        mut options: IngestOptions<'_>,
        mode: WriteMode,
    ) -> Result<u64>
    where
        R: Ingestible,
        I: IntoIterator<Item = R>,
    {
        let batch_size = options.effective_batch_size()?;
        let mut writer = TableWriter::<R>::begin(self, name, mode)?;
        let mut batch = Vec::with_capacity(batch_size);
        for record in records {
            batch.push(record);
            if batch.len() >= batch_size {
                let consumed = match writer.write(&batch) {
                    Ok(consumed) => consumed,
                    Err(e) => {
                        writer.discard();
                        return Err(e);
                    }
                };
                batch.clear();
                if let Some(progress) = options.progress.as_mut() {
                    progress(consumed);
                }
            }
        }
        if !batch.is_empty() {
            let consumed = match writer.write(&batch) {
                Ok(consumed) => consumed,
                Err(e) => {
                    writer.discard();
                    return Err(e);
                }
            };
            if let Some(progress) = options.progress.as_mut() {
                progress(consumed);
            }
        }
        writer.finish(metadata)
    }

    /// Drop a user table and its metadata row in one transaction.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        self.ensure_writable()?;
        validate_table_name(name)?;
        if !self.table_exists(name)? {
            return Err(Error::table_not_found(name));
        }
        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::query(format!("failed to begin transaction: {e}")))?;
        tx.execute_batch(&format!("DROP TABLE {}", quote_ident(name)))
            .map_err(|e| Error::query(format!("failed to drop '{name}': {e}")))?;
        tx.execute(&format!("DELETE FROM {METADATA_TABLE} WHERE table_name = ?"), params![name])
            .map_err(|e| Error::query(format!("failed to drop metadata for '{name}': {e}")))?;
        tx.commit()
            .map_err(|e| Error::query(format!("failed to commit drop: {e}")))?;
        tracing::info!(table = name, "table dropped");
        Ok(())
    }

    /// Drop every user table. Returns the dropped names.
    pub fn drop_all(&mut self) -> Result<Vec<String>> {
        let names: Vec<String> = self.list_metadata()?.into_iter().map(|m| m.table_name).collect();
        for name in &names {
            self.drop_table(name)?;
        }
        Ok(names)
    }

    pub(crate) fn read_metadata(&self, name: &str) -> Result<Option<TableMetadata>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT table_name, table_type, fetched_at, from_date, to_date, \
                        filter_events, filter_where, filter_cohort_id, filter_group_id, \
                        filter_behaviors, row_count \
                 FROM {METADATA_TABLE} WHERE table_name = ?"
            ))
            .map_err(|e| Error::query(format!("failed to read metadata: {e}")))?;
        let mut rows = stmt
            .query(params![name])
            .map_err(|e| Error::query(format!("failed to read metadata: {e}")))?;
        let Some(row) = rows.next().map_err(|e| Error::query(format!("failed to read metadata: {e}")))?
        else {
            return Ok(None);
        };
        metadata_from_row(row).map(Some)
    }

    pub(crate) fn list_metadata(&self) -> Result<Vec<TableMetadata>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT table_name, table_type, fetched_at, from_date, to_date, \
                        filter_events, filter_where, filter_cohort_id, filter_group_id, \
                        filter_behaviors, row_count \
                 FROM {METADATA_TABLE} ORDER BY table_name"
            ))
            .map_err(|e| Error::query(format!("failed to list metadata: {e}")))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| Error::query(format!("failed to list metadata: {e}")))?;
        let mut out = Vec::new();
        while let Some(row) =
            rows.next().map_err(|e| Error::query(format!("failed to list metadata: {e}")))?
        {
            out.push(metadata_from_row(row)?);
        }
        Ok(out)
    }

    pub(crate) fn upsert_metadata(&self, meta: &TableMetadata) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO {METADATA_TABLE} \
                     (table_name, table_type, fetched_at, from_date, to_date, filter_events, \
                      filter_where, filter_cohort_id, filter_group_id, filter_behaviors, row_count) \
                     VALUES (?, ?, ?::TIMESTAMP, ?::DATE, ?::DATE, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    meta.table_name,
                    meta.kind.as_str(),
                    sql_timestamp(&meta.fetched_at),
                    meta.fetch.from_date.map(|d| d.to_string()),
                    meta.fetch.to_date.map(|d| d.to_string()),
                    meta.fetch
                        .filter_events
                        .as_ref()
                        .map(|events| Value::from(events.clone()).to_string()),
                    meta.fetch.filter_where,
                    meta.fetch.filter_cohort_id,
                    meta.fetch.filter_group_id,
                    meta.fetch.filter_behaviors,
                    meta.row_count as i64,
                ],
            )
            .map_err(|e| Error::query(format!("failed to write metadata: {e}")))?;
        Ok(())
    }
}

fn metadata_from_row(row: &duckdb::Row<'_>) -> Result<TableMetadata> {
    let get_err = |e: duckdb::Error| Error::query(format!("malformed metadata row: {e}"));
    let table_name: String = row.get(0).map_err(get_err)?;
    let kind_raw: String = row.get(1).map_err(get_err)?;
    let fetched_at = match value_ref_to_json(row.get_ref(2).map_err(get_err)?) {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .map_err(|e| Error::query(format!("malformed fetched_at: {e}")))?
            .with_timezone(&Utc),
        other => return Err(Error::query(format!("malformed fetched_at: {other}"))),
    };
    let date_at = |idx: usize| -> Result<Option<NaiveDate>> {
        match value_ref_to_json(row.get_ref(idx).map_err(get_err)?) {
            Value::Null => Ok(None),
            Value::String(s) => s
                .parse()
                .map(Some)
                .map_err(|e| Error::query(format!("malformed date in metadata: {e}"))),
            other => Err(Error::query(format!("malformed date in metadata: {other}"))),
        }
    };
    let filter_events: Option<String> = row.get(5).map_err(get_err)?;
    let filter_events = match filter_events {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::query(format!("malformed filter_events: {e}")))?,
        None => None,
    };
    let row_count: i64 = row.get(10).map_err(get_err)?;
    Ok(TableMetadata {
        table_name,
        kind: TableKind::parse(&kind_raw)?,
        fetched_at,
        fetch: FetchMetadata {
            from_date: date_at(3)?,
            to_date: date_at(4)?,
            filter_events,
            filter_where: row.get(6).map_err(get_err)?,
            filter_cohort_id: row.get(7).map_err(get_err)?,
            filter_group_id: row.get(8).map_err(get_err)?,
            filter_behaviors: row.get(9).map_err(get_err)?,
        },
        row_count: row_count as u64,
    })
}

fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::query("table name must not be empty"));
    }
    if name == METADATA_TABLE {
        return Err(Error::query(format!("'{METADATA_TABLE}' is a reserved table name")));
    }
    Ok(())
}

pub(crate) fn sql_timestamp(dt: &DateTime<Utc>) -> String {
    dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

fn min_opt(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (x, None) | (None, x) => x,
    }
}

fn max_opt(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (x, None) | (None, x) => x,
    }
}
