//! Asynchronous Mixpanel API client.
//!
//! One [`ApiClient`] per resolved credential set. All outbound HTTP lives
//! here: regional base URLs, basic auth, query encoding, JSONL streaming
//! decode, Engage cursor pagination, and rate-limit-aware retries. Endpoint
//! methods return raw `serde_json::Value` payloads; the typed result layer
//! in `mp-services` normalizes them.

pub mod client;
pub mod filter;
pub mod params;
pub mod retry;
mod stream;

pub use client::ApiClient;
pub use filter::Filter;
pub use params::{
    EngageParams, EventCountsParams, ExportParams, FlowsQueryType, FrequencyParams, FunnelParams,
    PropertyCountsParams, RetentionParams, SegmentationParams, Unit, MAX_DISTINCT_IDS,
};
pub use retry::RetryPolicy;
pub use stream::RecordStream;
