//! Immutable result records with lazily computed tabular views.
//!
//! Every record carries its structured fields eagerly and a [`TableCache`]
//! slot filled on the first `to_table()` call. The cache is write-once and
//! invisible: it is skipped by serde, compares equal regardless of state,
//! and clones empty, so filling it is not a logical mutation.
//!
//! `to_dict` renders a record as a nested map of plain scalars (timestamps
//! as ISO-8601 strings) and `from_dict(to_dict(r))` reproduces `r`
//! field-wise.

mod activity;
mod counts;
mod fetch;
mod funnel;
mod insights;
mod jql;
mod retention;
mod segmentation;

pub use activity::{ActivityEvent, ActivityFeedResult};
pub use counts::{EventCountsResult, PropertyCountsResult, TopEvent, TopEventsResult};
pub use fetch::{ChunkOutcome, FetchResult, ParallelFetchResult};
pub use funnel::{FunnelResult, FunnelStep};
pub use insights::{FlowsResult, InsightsKind, InsightsResult};
pub use jql::JqlResult;
pub use retention::{FrequencyResult, RetentionCohort, RetentionResult};
pub use segmentation::{
    NumericAverageResult, NumericBucketResult, NumericSumResult, SegmentationResult,
};

use mp_core::Table;
use serde_json::{Number, Value};
use std::sync::OnceLock;

/// Write-once tabular cache. Not part of a record's value: equality ignores
/// it, clones start empty, serde skips it.
#[derive(Default)]
pub struct TableCache(OnceLock<Table>);

impl TableCache {
    pub fn get_or_init(&self, init: impl FnOnce() -> Table) -> &Table {
        self.0.get_or_init(init)
    }
}

impl Clone for TableCache {
    fn clone(&self) -> Self {
        TableCache::default()
    }
}

impl PartialEq for TableCache {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.get() {
            Some(_) => f.write_str("TableCache(computed)"),
            None => f.write_str("TableCache(empty)"),
        }
    }
}

/// Counts arrive as JSON numbers that may or may not carry a fraction;
/// render whole values as integers in tabular cells.
pub(crate) fn number_cell(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// `to_dict` / `from_dict` for a serde-backed result record.
macro_rules! impl_dict {
    ($ty:ty) => {
        impl $ty {
            /// Nested map of plain scalars; loses no declared field.
            pub fn to_dict(&self) -> serde_json::Value {
                serde_json::to_value(self).expect("result records always serialize")
            }

            /// Inverse of `to_dict`, field-wise.
            pub fn from_dict(value: &serde_json::Value) -> mp_core::Result<Self> {
                serde_json::from_value(value.clone()).map_err(|e| {
                    mp_core::Error::query(format!(
                        concat!("malformed ", stringify!($ty), " payload: {}"),
                        e
                    ))
                })
            }
        }
    };
}
pub(crate) use impl_dict;
