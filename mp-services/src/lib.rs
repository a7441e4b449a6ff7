//! Service layer: fetcher, discovery, live queries, and result records.
//!
//! Services borrow an [`mp_client::ApiClient`] (and, for the fetcher, a
//! mutable [`mp_store::Store`]) and compose the lower layers: the fetcher
//! streams records into the store in bounded batches, discovery wraps the
//! list endpoints with a session cache, and the live-query service
//! normalizes each wire family into an immutable result record with a lazy
//! tabular view.

pub mod discovery;
pub mod fetcher;
pub mod live;
pub mod results;

pub use discovery::{BookmarkInfo, CohortInfo, Discovery, FunnelInfo};
pub use fetcher::{Fetcher, FetchOptions, ParallelFetchOptions};
pub use live::LiveQuery;
pub use results::{
    ActivityEvent, ActivityFeedResult, ChunkOutcome, EventCountsResult, FetchResult, FlowsResult,
    FrequencyResult, FunnelResult, FunnelStep, InsightsKind, InsightsResult, JqlResult,
    NumericAverageResult, NumericBucketResult, NumericSumResult, ParallelFetchResult,
    PropertyCountsResult, RetentionCohort, RetentionResult, SegmentationResult, TopEvent,
    TopEventsResult,
};
