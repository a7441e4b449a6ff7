//! # mixpanel-data
//!
//! Ingest Mixpanel data into a local analytical store, discover schemas,
//! and run live or local queries, as a library or through the `mp` CLI.
//!
//! This crate re-exports the public API of the member crates:
//!
//! - [`mp_core`]: credentials, accounts, errors, shared records
//! - [`mp_client`]: the streaming API client
//! - [`mp_store`]: the embedded analytical store
//! - [`mp_services`]: fetcher, discovery, live queries, result records
//!
//! ```no_run
//! use mixpanel_data::{ApiClient, CancellationToken, Fetcher, Store};
//! use mixpanel_data::{ExportParams, FetchOptions, resolve_credentials};
//!
//! # async fn demo() -> mixpanel_data::Result<()> {
//! let credentials = resolve_credentials(None)?;
//! let client = ApiClient::new(credentials)?;
//! let mut store = Store::for_project(client.project_id())?;
//!
//! let params = ExportParams::new(
//!     "2024-01-01".parse().unwrap(),
//!     "2024-01-07".parse().unwrap(),
//! );
//! let result = Fetcher::new(client)
//!     .fetch_events(
//!         &mut store,
//!         "jan_events",
//!         params,
//!         FetchOptions::default(),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} rows in {}", result.rows, result.table);
//! # Ok(())
//! # }
//! ```

pub use mp_core::{
    Account, AccountInfo, CancellationToken, ConfigStore, Credentials, Error, EventRecord,
    ProfileRecord, Region, Result, Secret, Table, resolve_credentials,
};

pub use mp_client::{
    ApiClient, EngageParams, EventCountsParams, ExportParams, Filter, FlowsQueryType,
    FrequencyParams, FunnelParams, PropertyCountsParams, RecordStream, RetentionParams,
    RetryPolicy, SegmentationParams, Unit, filter,
};

pub use mp_store::{
    Column, ColumnInfo, ColumnStats, ColumnSummary, DataFrame, EventBreakdown, EventBreakdownRow,
    FetchMetadata, IngestOptions, Store, TableInfo, TableKind, TableMetadata, TableSummary,
};

pub use mp_services::{
    ActivityEvent, ActivityFeedResult, BookmarkInfo, ChunkOutcome, CohortInfo, Discovery,
    EventCountsResult, FetchOptions, FetchResult, Fetcher, FlowsResult, FrequencyResult,
    FunnelInfo, FunnelResult, FunnelStep, InsightsKind, InsightsResult, JqlResult, LiveQuery,
    NumericAverageResult, NumericBucketResult, NumericSumResult, ParallelFetchOptions,
    ParallelFetchResult, PropertyCountsResult, RetentionCohort, RetentionResult,
    SegmentationResult, TopEvent, TopEventsResult,
};
