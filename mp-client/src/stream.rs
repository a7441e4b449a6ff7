//! Streaming endpoints: JSONL export and paginated Engage profiles.
//!
//! Records are decoded one at a time; the full body is never buffered.
//! Cancellation is observed between chunks and between records, and closing
//! the stream drops the HTTP body. Records already yielded stay valid after
//! a cancel.

use crate::client::{ApiClient, TRANSPORT_STATUS};
use crate::params::{EngageParams, ExportParams};
use async_stream::try_stream;
use chrono::Utc;
use futures::{Stream, StreamExt};
use mp_core::{CancellationToken, Error, EventRecord, ProfileRecord, Result};
use serde_json::Value;
use std::pin::Pin;

/// Lazy record iterator returned by the streaming endpoints.
pub type RecordStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

impl ApiClient {
    /// Stream raw events from the Export endpoint as decoded records.
    pub fn export_events(
        &self,
        params: ExportParams,
        cancel: CancellationToken,
    ) -> RecordStream<EventRecord> {
        let client = self.clone();
        Box::pin(try_stream! {
            let context = format!("export {}..{}", params.from_date, params.to_date);
            let query = params.to_query();
            let response = client
                .execute_with_retry(|| client.get(client.export_path(), &query), &context, &cancel)
                .await?;

            let mut body = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();
            loop {
                // Cancellation maps to None in the outer Option so the `?`
                // stays outside the select macro.
                let step = tokio::select! {
                    _ = cancel.cancelled() => None,
                    chunk = body.next() => Some(chunk),
                };
                let Some(chunk) = step else {
                    Err(Error::Cancelled)?;
                    unreachable!()
                };
                let Some(chunk) = chunk else { break };
                let bytes = chunk.map_err(|e| {
                    Error::server(TRANSPORT_STATUS, format!("transport failure mid-stream: {e}"))
                })?;
                buf.extend_from_slice(&bytes);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(record) = decode_export_line(&line)? {
                        yield record;
                    }
                }
            }
            if let Some(record) = decode_export_line(&buf)? {
                yield record;
            }
        })
    }

    /// Stream profiles from Engage, following `{session_id, page}` cursors
    /// until a page comes back empty.
    pub fn engage_profiles(
        &self,
        params: EngageParams,
        cancel: CancellationToken,
    ) -> RecordStream<ProfileRecord> {
        let client = self.clone();
        Box::pin(try_stream! {
            ApiClient::engage_validate(&params)?;
            // One timestamp for the whole paginated walk, so behavior pages
            // stay consistent with each other.
            let as_of = Utc::now().timestamp();
            let mut session_id: Option<String> = None;
            let mut page: u64 = 0;
            loop {
                if cancel.is_cancelled() {
                    Err(Error::Cancelled)?;
                }
                let mut form = params.to_form(as_of);
                if let Some(sid) = &session_id {
                    form.push(("session_id".to_string(), sid.clone()));
                    form.push(("page".to_string(), page.to_string()));
                }
                let payload = client
                    .post_form(client.engage_path(), &form, "engage", &cancel)
                    .await?;
                let results = match payload.get("results").and_then(Value::as_array) {
                    Some(results) if !results.is_empty() => results.clone(),
                    _ => break,
                };
                for entry in results {
                    yield ProfileRecord::from_engage_json(entry)?;
                }
                session_id = payload.get("session_id").and_then(Value::as_str).map(String::from);
                if session_id.is_none() {
                    break;
                }
                page += 1;
            }
        })
    }
}

fn decode_export_line(line: &[u8]) -> Result<Option<EventRecord>> {
    let trimmed = trim_line(line);
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(trimmed)
        .map_err(|e| Error::query(format!("export line is not valid JSON: {e}")))?;
    EventRecord::from_export_json(value).map(Some)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut slice = line;
    while let [rest @ .., last] = slice {
        if matches!(last, b'\n' | b'\r' | b' ' | b'\t') {
            slice = rest;
        } else {
            break;
        }
    }
    while let [first, rest @ ..] = slice {
        if matches!(first, b' ' | b'\t') {
            slice = rest;
        } else {
            break;
        }
    }
    slice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_skips_blank_lines() {
        assert!(decode_export_line(b"\n").unwrap().is_none());
        assert!(decode_export_line(b"   \r\n").unwrap().is_none());
        assert!(decode_export_line(b"").unwrap().is_none());
    }

    #[test]
    fn decode_parses_one_record() {
        let line = br#"{"event":"E","properties":{"time":1704067200,"distinct_id":"d","$insert_id":"i"}}"#;
        let record = decode_export_line(line).unwrap().unwrap();
        assert_eq!(record.event_name, "E");
        assert_eq!(record.insert_id, "i");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_export_line(b"not json").unwrap_err();
        assert_eq!(err.code(), "QUERY_FAILED");
    }
}
