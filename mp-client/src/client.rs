//! The HTTP core and endpoint families.

use crate::params::{
    EngageParams, EventCountsParams, FlowsQueryType, FrequencyParams, FunnelParams,
    PropertyCountsParams, RetentionParams, SegmentationParams,
};
use crate::retry::{self, RetryPolicy};
use mp_core::{CancellationToken, Credentials, Error, Region, Result};
use reqwest::RequestBuilder;
use serde_json::Value;

const QUERY_BASE: &str = "/api/query";
const EXPORT_PATH: &str = "/api/2.0/export";
const ENGAGE_PATH: &str = "/api/2.0/engage";

/// Bodies echoed into error messages are clipped to this length.
const BODY_CLIP: usize = 2000;

/// Transport-level failures carry this pseudo-status; they are retried like
/// any other 5xx.
pub(crate) const TRANSPORT_STATUS: u16 = 599;

/// Authenticated client bound to one project and region.
///
/// Cloning is cheap (the underlying connection pool is shared) and every
/// method takes `&self`, so one client serves concurrent callers.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    credentials: Credentials,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_policy(credentials, RetryPolicy::default())
    }

    pub fn with_policy(credentials: Credentials, retry: RetryPolicy) -> Result<Self> {
        let base_url = credentials.region.base_url().to_string();
        Self::with_base_url(credentials, retry, base_url)
    }

    /// Override the regional authority. For tests and proxies.
    pub fn with_base_url(
        credentials: Credentials,
        retry: RetryPolicy,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mixpanel-data/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(ApiClient {
            http,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.credentials.project_id
    }

    pub fn region(&self) -> Region {
        self.credentials.region
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Base request: basic auth plus the project selector every endpoint
    /// expects.
    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.credentials.username, Some(self.credentials.secret.expose()))
            .query(&[("project_id", self.credentials.project_id.as_str())])
    }

    pub(crate) fn get(&self, path: &str, query: &[(String, String)]) -> RequestBuilder {
        self.request(self.http.get(self.url(path))).query(query)
    }

    pub(crate) fn post_form_request(&self, path: &str, form: &[(String, String)]) -> RequestBuilder {
        self.request(self.http.post(self.url(path))).form(form)
    }

    pub(crate) async fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let response = self
            .execute_with_retry(|| self.get(path, query), context, cancel)
            .await?;
        decode_json(response, context).await
    }

    pub(crate) async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let response = self
            .execute_with_retry(|| self.post_form_request(path, form), context, cancel)
            .await?;
        decode_json(response, context).await
    }

    /// Send with the [`RetryPolicy`] budget. Auth failures are terminal,
    /// 429/5xx/transport errors are retried with backoff, everything else
    /// maps straight into the error taxonomy.
    pub(crate) async fn execute_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                sent = build().send() => sent,
            };

            let (status, retry_after, error) = match outcome {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    if status == 401 || status == 403 {
                        return Err(Error::auth(format!(
                            "the API rejected the credentials (HTTP {status})"
                        )));
                    }
                    let retry_after = retry::retry_after(response.headers());
                    if !retry::is_retryable_status(status) {
                        let body = clip(&response.text().await.unwrap_or_default());
                        return Err(Error::QueryFailed {
                            message: if body.is_empty() {
                                format!("HTTP {status}")
                            } else {
                                body
                            },
                            query: Some(context.to_string()),
                            status: Some(status),
                        });
                    }
                    let body = clip(&response.text().await.unwrap_or_default());
                    (status, retry_after, body)
                }
                Err(e) => (TRANSPORT_STATUS, None, format!("transport failure: {e}")),
            };

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(if status == 429 {
                    Error::RateLimited { retry_after: retry_after.map(|d| d.as_secs()) }
                } else {
                    Error::server(status, error)
                });
            }

            let delay = self.retry.delay(attempt - 1, retry_after);
            tracing::debug!(
                status,
                attempt,
                delay_ms = delay.as_millis() as u64,
                context,
                "retrying after transient failure"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    // --- query families ---------------------------------------------------

    pub async fn segmentation(
        &self,
        params: &SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let context = format!("segmentation event={}", params.event);
        self.get_json(&format!("{QUERY_BASE}/segmentation"), &params.to_query(), &context, cancel)
            .await
    }

    async fn segmentation_variant(
        &self,
        variant: &str,
        params: &SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let context = format!("segmentation/{variant} event={}", params.event);
        self.get_json(
            &format!("{QUERY_BASE}/segmentation/{variant}"),
            &params.to_query(),
            &context,
            cancel,
        )
        .await
    }

    /// Numeric bucketing over the `on` expression.
    pub async fn segmentation_numeric(
        &self,
        params: &SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.segmentation_variant("numeric", params, cancel).await
    }

    /// Per-bucket sums of the `on` expression.
    pub async fn segmentation_sum(
        &self,
        params: &SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.segmentation_variant("sum", params, cancel).await
    }

    /// Per-bucket averages of the `on` expression.
    pub async fn segmentation_average(
        &self,
        params: &SegmentationParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.segmentation_variant("average", params, cancel).await
    }

    pub async fn funnel(&self, params: &FunnelParams, cancel: &CancellationToken) -> Result<Value> {
        let context = format!("funnel id={}", params.funnel_id);
        self.get_json(&format!("{QUERY_BASE}/funnels"), &params.to_query(), &context, cancel)
            .await
    }

    pub async fn list_funnels(&self, cancel: &CancellationToken) -> Result<Value> {
        self.get_json(&format!("{QUERY_BASE}/funnels/list"), &[], "funnels/list", cancel)
            .await
    }

    pub async fn retention(
        &self,
        params: &RetentionParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let context = format!("retention born_event={}", params.born_event);
        self.get_json(&format!("{QUERY_BASE}/retention"), &params.to_query(), &context, cancel)
            .await
    }

    pub async fn frequency(
        &self,
        params: &FrequencyParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.get_json(
            &format!("{QUERY_BASE}/retention/addiction"),
            &params.to_query(),
            "retention/addiction",
            cancel,
        )
        .await
    }

    /// Run a JQL script. A 422 is decoded as a JQL syntax error.
    pub async fn jql(
        &self,
        script: &str,
        params: Option<&Value>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut form = vec![("script".to_string(), script.to_string())];
        if let Some(params) = params {
            form.push(("params".to_string(), params.to_string()));
        }
        let result = self.post_form(&format!("{QUERY_BASE}/jql"), &form, "jql", cancel).await;
        match result {
            Err(Error::QueryFailed { message, status: Some(422), .. }) => {
                Err(Error::JqlSyntax { message: jql_error_message(&message) })
            }
            other => other,
        }
    }

    pub async fn event_counts(
        &self,
        params: &EventCountsParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        self.get_json(&format!("{QUERY_BASE}/events"), &params.to_query(), "events", cancel)
            .await
    }

    pub async fn property_counts(
        &self,
        params: &PropertyCountsParams,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let context = format!("events/properties name={}", params.property);
        self.get_json(
            &format!("{QUERY_BASE}/events/properties"),
            &params.to_query(),
            &context,
            cancel,
        )
        .await
    }

    pub async fn top_events(&self, limit: Option<u32>, cancel: &CancellationToken) -> Result<Value> {
        let mut query = vec![("type".to_string(), "general".to_string())];
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        self.get_json(&format!("{QUERY_BASE}/events/top"), &query, "events/top", cancel)
            .await
    }

    pub async fn event_names(&self, limit: Option<u32>, cancel: &CancellationToken) -> Result<Value> {
        let mut query = vec![("type".to_string(), "general".to_string())];
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        self.get_json(&format!("{QUERY_BASE}/events/names"), &query, "events/names", cancel)
            .await
    }

    pub async fn top_event_properties(
        &self,
        event: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut query = vec![("event".to_string(), event.to_string())];
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        let context = format!("events/properties/top event={event}");
        self.get_json(&format!("{QUERY_BASE}/events/properties/top"), &query, &context, cancel)
            .await
    }

    pub async fn property_values(
        &self,
        event: &str,
        property: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut query = vec![
            ("event".to_string(), event.to_string()),
            ("name".to_string(), property.to_string()),
        ];
        if let Some(limit) = limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
        let context = format!("events/properties/values event={event} name={property}");
        self.get_json(&format!("{QUERY_BASE}/events/properties/values"), &query, &context, cancel)
            .await
    }

    pub async fn activity_feed(
        &self,
        distinct_ids: &[String],
        from_date: chrono::NaiveDate,
        to_date: chrono::NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let query = vec![
            ("distinct_ids".to_string(), Value::from(distinct_ids.to_vec()).to_string()),
            ("from_date".to_string(), from_date.to_string()),
            ("to_date".to_string(), to_date.to_string()),
        ];
        self.get_json(&format!("{QUERY_BASE}/stream/query"), &query, "stream/query", cancel)
            .await
    }

    /// The unified saved-report endpoint. Accepts insights, retention, and
    /// funnel bookmark ids alike.
    pub async fn insights(&self, bookmark_id: i64, cancel: &CancellationToken) -> Result<Value> {
        let query = vec![("bookmark_id".to_string(), bookmark_id.to_string())];
        let context = format!("insights bookmark_id={bookmark_id}");
        self.get_json(&format!("{QUERY_BASE}/insights"), &query, &context, cancel)
            .await
    }

    /// Saved flows report over the arb-funnels endpoint.
    pub async fn flows(
        &self,
        bookmark_id: i64,
        query_type: FlowsQueryType,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let query = vec![
            ("bookmark_id".to_string(), bookmark_id.to_string()),
            ("query_type".to_string(), query_type.as_str().to_string()),
        ];
        let context = format!("arb_funnels bookmark_id={bookmark_id}");
        self.get_json(&format!("{QUERY_BASE}/arb_funnels"), &query, &context, cancel)
            .await
    }

    pub async fn list_cohorts(&self, cancel: &CancellationToken) -> Result<Value> {
        self.post_form(&format!("{QUERY_BASE}/cohorts/list"), &[], "cohorts/list", cancel)
            .await
    }

    pub async fn list_bookmarks(&self, cancel: &CancellationToken) -> Result<Value> {
        let path = format!("/api/app/projects/{}/bookmarks", self.credentials.project_id);
        self.get_json(&path, &[], "bookmarks", cancel).await
    }

    pub async fn lexicon_schemas(&self, cancel: &CancellationToken) -> Result<Value> {
        let path = format!("/api/app/projects/{}/schemas", self.credentials.project_id);
        self.get_json(&path, &[], "lexicon schemas", cancel).await
    }

    pub(crate) fn export_path(&self) -> &'static str {
        EXPORT_PATH
    }

    pub(crate) fn engage_path(&self) -> &'static str {
        ENGAGE_PATH
    }

    pub(crate) fn engage_validate(params: &EngageParams) -> Result<()> {
        params.validate()
    }
}

async fn decode_json(response: reqwest::Response, context: &str) -> Result<Value> {
    let body = response
        .text()
        .await
        .map_err(|e| Error::server(TRANSPORT_STATUS, format!("failed to read response: {e}")))?;
    serde_json::from_str(&body).map_err(|e| Error::QueryFailed {
        message: format!("response is not valid JSON: {e}"),
        query: Some(context.to_string()),
        status: None,
    })
}

fn clip(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > BODY_CLIP {
        let mut end = BODY_CLIP;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}

/// JQL failures arrive as `{"error": "..."}`; fall back to the raw body.
fn jql_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(String::from))
        .unwrap_or_else(|| body.to_string())
}
