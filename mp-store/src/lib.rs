//! Embedded analytical store for fetched Mixpanel data.
//!
//! A thin, deliberately narrow facade over DuckDB: explicit non-clobbering
//! table lifecycle, batched deduplicating ingestion of iterator-shaped data,
//! an internal `_metadata` table, three SQL result shapes, and introspection
//! helpers. Single writer per store file; concurrent in-process reads are
//! fine, a second cross-process writer fails fast with `DATABASE_LOCKED`.

mod ephemeral;
mod ingest;
mod introspect;
mod query;
mod store;

pub use ephemeral::cleanup_registered;
pub use ingest::{
    DEFAULT_BATCH_SIZE, FetchMetadata, IngestOptions, Ingestible, MAX_BATCH_SIZE, MIN_BATCH_SIZE,
    TableKind, TableMetadata, TableWriter, WriteMode,
};
pub use introspect::{
    ColumnInfo, ColumnStats, ColumnSummary, EventBreakdown, EventBreakdownRow, TableInfo,
    TableSummary,
};
pub use query::{Column, DataFrame};
pub use store::{METADATA_TABLE, Store};
