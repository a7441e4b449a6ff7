//! Schema discovery with a session-scoped cache.
//!
//! Cache entries are keyed by the full argument tuple of the call and live
//! as long as the service instance. Names and properties are sorted
//! alphabetically at this layer; property values keep server order. Top
//! events reflect a time-of-day signal and bookmarks change under the user,
//! so neither is cached.

use mp_client::ApiClient;
use mp_core::{CancellationToken, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelInfo {
    pub funnel_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortInfo {
    pub id: i64,
    pub name: String,
    pub count: u64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkInfo {
    pub id: i64,
    pub name: String,
    /// Report type as the service names it: insights, funnels, retention,
    /// flows, ...
    pub kind: String,
}

/// Method discriminant plus normalized argument tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Events { limit: Option<u32> },
    EventProperties { event: String, limit: Option<u32> },
    PropertyValues { event: String, property: String, limit: Option<u32> },
    Funnels,
    Cohorts,
    LexiconSchemas,
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Names(Vec<String>),
    Funnels(Vec<FunnelInfo>),
    Cohorts(Vec<CohortInfo>),
    Raw(Value),
}

pub struct Discovery {
    client: ApiClient,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl Discovery {
    pub fn new(client: ApiClient) -> Self {
        Discovery { client, cache: Mutex::new(HashMap::new()) }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().expect("discovery cache poisoned").clear();
    }

    fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.lock().expect("discovery cache poisoned").get(key).cloned()
    }

    fn store(&self, key: CacheKey, entry: CacheEntry) {
        self.cache.lock().expect("discovery cache poisoned").insert(key, entry);
    }

    /// Event names, sorted alphabetically. Cached.
    pub async fn list_events(
        &self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let key = CacheKey::Events { limit };
        if let Some(CacheEntry::Names(names)) = self.cached(&key) {
            return Ok(names);
        }
        let payload = self.client.event_names(limit, cancel).await?;
        let mut names = string_array(&payload, "event names")?;
        names.sort();
        self.store(key, CacheEntry::Names(names.clone()));
        Ok(names)
    }

    /// Property names seen on one event, sorted alphabetically. Cached.
    pub async fn list_properties(
        &self,
        event: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let key = CacheKey::EventProperties { event: event.to_string(), limit };
        if let Some(CacheEntry::Names(names)) = self.cached(&key) {
            return Ok(names);
        }
        let payload = self.client.top_event_properties(event, limit, cancel).await?;
        let mut names: Vec<String> = payload
            .as_object()
            .ok_or_else(|| Error::query("event properties payload is not an object"))?
            .keys()
            .cloned()
            .collect();
        names.sort();
        self.store(key, CacheEntry::Names(names.clone()));
        Ok(names)
    }

    /// Sample values of one property, in server order. Cached.
    pub async fn list_property_values(
        &self,
        event: &str,
        property: &str,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let key = CacheKey::PropertyValues {
            event: event.to_string(),
            property: property.to_string(),
            limit,
        };
        if let Some(CacheEntry::Names(values)) = self.cached(&key) {
            return Ok(values);
        }
        let payload = self.client.property_values(event, property, limit, cancel).await?;
        let values = string_array(&payload, "property values")?;
        self.store(key, CacheEntry::Names(values.clone()));
        Ok(values)
    }

    /// Saved funnels, sorted by name. Cached.
    pub async fn list_funnels(&self, cancel: &CancellationToken) -> Result<Vec<FunnelInfo>> {
        if let Some(CacheEntry::Funnels(funnels)) = self.cached(&CacheKey::Funnels) {
            return Ok(funnels);
        }
        let payload = self.client.list_funnels(cancel).await?;
        let mut funnels: Vec<FunnelInfo> = serde_json::from_value(payload)
            .map_err(|e| Error::query(format!("malformed funnels list: {e}")))?;
        funnels.sort_by(|a, b| a.name.cmp(&b.name));
        self.store(CacheKey::Funnels, CacheEntry::Funnels(funnels.clone()));
        Ok(funnels)
    }

    /// Saved cohorts, sorted by name. Cached.
    pub async fn list_cohorts(&self, cancel: &CancellationToken) -> Result<Vec<CohortInfo>> {
        if let Some(CacheEntry::Cohorts(cohorts)) = self.cached(&CacheKey::Cohorts) {
            return Ok(cohorts);
        }
        let payload = self.client.list_cohorts(cancel).await?;
        let mut cohorts: Vec<CohortInfo> = serde_json::from_value(payload)
            .map_err(|e| Error::query(format!("malformed cohorts list: {e}")))?;
        cohorts.sort_by(|a, b| a.name.cmp(&b.name));
        self.store(CacheKey::Cohorts, CacheEntry::Cohorts(cohorts.clone()));
        Ok(cohorts)
    }

    /// Saved reports of every type. Not cached: the list changes under the
    /// user as reports are created and deleted.
    pub async fn list_bookmarks(&self, cancel: &CancellationToken) -> Result<Vec<BookmarkInfo>> {
        let payload = self.client.list_bookmarks(cancel).await?;
        let results = payload
            .get("results")
            .cloned()
            .unwrap_or(payload);
        let results = results
            .as_array()
            .ok_or_else(|| Error::query("bookmarks payload is not a list"))?;
        Ok(results
            .iter()
            .map(|b| BookmarkInfo {
                id: b.get("id").and_then(Value::as_i64).unwrap_or_default(),
                name: b.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                kind: b.get("type").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// Today's most common events, in ranking order. Not cached: the
    /// ranking is a time-of-day signal.
    pub async fn list_top_events(
        &self,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let payload = self.client.top_events(limit, cancel).await?;
        let events = payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::query("top events payload is missing 'events'"))?;
        Ok(events
            .iter()
            .filter_map(|e| e.get("event").and_then(Value::as_str).map(String::from))
            .collect())
    }

    /// Lexicon schema definitions, raw. Cached.
    pub async fn lexicon_schemas(&self, cancel: &CancellationToken) -> Result<Value> {
        if let Some(CacheEntry::Raw(raw)) = self.cached(&CacheKey::LexiconSchemas) {
            return Ok(raw);
        }
        let payload = self.client.lexicon_schemas(cancel).await?;
        self.store(CacheKey::LexiconSchemas, CacheEntry::Raw(payload.clone()));
        Ok(payload)
    }
}

fn string_array(payload: &Value, what: &str) -> Result<Vec<String>> {
    payload
        .as_array()
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .ok_or_else(|| Error::query(format!("{what} payload is not a list")))
}
