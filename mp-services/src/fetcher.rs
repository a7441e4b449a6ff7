//! The fetcher: streams API records into the store in bounded batches.
//!
//! Single-range fetches drive one export or engage stream straight into a
//! [`TableWriter`]; memory stays bounded by batch size times record size
//! regardless of volume. The parallel path partitions the date range into
//! chunks fetched concurrently, funneling every batch through one writer
//! (the store is single-writer) where `insert_id` dedup makes chunk
//! ordering irrelevant.

use crate::results::{ChunkOutcome, FetchResult, ParallelFetchResult};
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use mp_client::{ApiClient, EngageParams, ExportParams, RecordStream};
use mp_core::{CancellationToken, Error, EventRecord, ProfileRecord, Result};
use mp_store::{
    DEFAULT_BATCH_SIZE, FetchMetadata, Ingestible, MAX_BATCH_SIZE, MIN_BATCH_SIZE, Store,
    TableKind, TableWriter, WriteMode,
};
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;

/// Knobs for a single-range fetch.
#[derive(Default)]
pub struct FetchOptions<'a> {
    /// Records per store transaction; `None` means the store default.
    pub batch_size: Option<usize>,
    /// Append to an existing table (created when missing).
    pub append: bool,
    /// Called after each committed batch with the cumulative record count.
    pub progress: Option<&'a mut (dyn FnMut(u64) + Send)>,
}

/// Knobs for a parallel chunked events fetch.
#[derive(Debug, Clone)]
pub struct ParallelFetchOptions {
    pub chunk_days: u32,
    pub max_workers: usize,
    pub batch_size: Option<usize>,
    pub append: bool,
}

impl Default for ParallelFetchOptions {
    fn default() -> Self {
        ParallelFetchOptions { chunk_days: 7, max_workers: 10, batch_size: None, append: false }
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: ApiClient,
}

enum ChunkMsg {
    Batch(Vec<EventRecord>),
    Done { index: usize, outcome: std::result::Result<u64, String> },
}

impl Fetcher {
    pub fn new(client: ApiClient) -> Self {
        Fetcher { client }
    }

    /// Fetch events for one date range into `table`.
    pub async fn fetch_events(
        &self,
        store: &mut Store,
        table: &str,
        params: ExportParams,
        options: FetchOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchResult> {
        let metadata = FetchMetadata {
            from_date: Some(params.from_date),
            to_date: Some(params.to_date),
            filter_events: params.events.clone(),
            filter_where: params.where_expr.clone(),
            ..Default::default()
        };
        let stream = self.client.export_events(params, cancel.clone());
        self.drain_into(store, table, stream, metadata, options, TableKind::Events).await
    }

    /// Fetch profiles into `table`.
    pub async fn fetch_profiles(
        &self,
        store: &mut Store,
        table: &str,
        params: EngageParams,
        options: FetchOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<FetchResult> {
        let metadata = FetchMetadata {
            filter_where: params.where_expr.clone(),
            filter_cohort_id: params.cohort_id,
            filter_group_id: params.data_group_id.clone(),
            filter_behaviors: params.behaviors.clone(),
            ..Default::default()
        };
        let stream = self.client.engage_profiles(params, cancel.clone());
        self.drain_into(store, table, stream, metadata, options, TableKind::Profiles).await
    }

    /// Stream events without touching storage; the caller drives
    /// consumption and owns cancellation.
    pub fn stream_events(
        &self,
        params: ExportParams,
        cancel: CancellationToken,
    ) -> RecordStream<EventRecord> {
        self.client.export_events(params, cancel)
    }

    /// Stream profiles without touching storage.
    pub fn stream_profiles(
        &self,
        params: EngageParams,
        cancel: CancellationToken,
    ) -> RecordStream<ProfileRecord> {
        self.client.engage_profiles(params, cancel)
    }

    async fn drain_into<R: Ingestible>(
        &self,
        store: &mut Store,
        table: &str,
        mut stream: RecordStream<R>,
        metadata: FetchMetadata,
        mut options: FetchOptions<'_>,
        kind: TableKind,
    ) -> Result<FetchResult> {
        let started = Instant::now();
        let batch_size = effective_batch_size(options.batch_size)?;
        let mode = if options.append { WriteMode::CreateOrAppend } else { WriteMode::Create };
        let mut writer = TableWriter::<R>::begin(store, table, mode)?;
        let mut batch: Vec<R> = Vec::with_capacity(batch_size);
        let mut failure: Option<Error> = None;

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    batch.push(record);
                    if batch.len() >= batch_size {
                        if let Err(e) = writer.write(&batch) {
                            failure = Some(e);
                            break;
                        }
                        batch.clear();
                        if let Some(progress) = options.progress.as_mut() {
                            progress(writer.consumed());
                        }
                    }
                }
                Err(e) => {
                    // In-flight batch is dropped, committed batches stay.
                    failure = Some(e);
                    break;
                }
            }
        }
        if failure.is_none() && !batch.is_empty() {
            match writer.write(&batch) {
                Ok(_) => {
                    if let Some(progress) = options.progress.as_mut() {
                        progress(writer.consumed());
                    }
                }
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            if writer.consumed() == 0 && writer.created() {
                // Nothing was committed: leave no empty table behind.
                writer.discard();
            } else {
                // Committed batches stay; the metadata row reflects them.
                writer.finish(&metadata)?;
            }
            return Err(e);
        }
        let rows = writer.finish(&metadata)?;
        tracing::info!(table, rows, kind = kind.as_str(), "fetch finished");
        Ok(FetchResult {
            table: table.to_string(),
            rows,
            kind,
            duration_seconds: started.elapsed().as_secs_f64(),
            from_date: metadata.from_date,
            to_date: metadata.to_date,
            fetched_at: Utc::now(),
            cache: Default::default(),
        })
    }

    /// Fetch a date range as concurrent chunks merged into one table.
    ///
    /// Chunks stream concurrently (network-bound) but all writes funnel
    /// through this task's single writer. A failed chunk is reported in the
    /// outcome list and does not abort the others; previously committed
    /// chunks always remain.
    pub async fn fetch_events_parallel(
        &self,
        store: &mut Store,
        table: &str,
        params: ExportParams,
        options: ParallelFetchOptions,
        cancel: &CancellationToken,
    ) -> Result<ParallelFetchResult> {
        let started = Instant::now();
        let batch_size = effective_batch_size(options.batch_size)?;
        let chunks = partition_range(params.from_date, params.to_date, options.chunk_days);
        let mode = if options.append { WriteMode::CreateOrAppend } else { WriteMode::Create };
        let mut writer = TableWriter::<EventRecord>::begin(store, table, mode)?;

        let workers = options.max_workers.max(1);
        let (tx, mut rx) = mpsc::channel::<ChunkMsg>(workers * 2);
        let semaphore = std::sync::Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        for (index, (from_date, to_date)) in chunks.iter().enumerate() {
            let client = self.client.clone();
            let mut chunk_params = params.clone();
            chunk_params.from_date = *from_date;
            chunk_params.to_date = *to_date;
            let tx = tx.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = run_chunk(&client, chunk_params, batch_size, &tx, cancel).await;
                let _ = tx.send(ChunkMsg::Done { index, outcome }).await;
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<std::result::Result<u64, String>>> = vec![None; chunks.len()];
        while let Some(msg) = rx.recv().await {
            match msg {
                ChunkMsg::Batch(records) => {
                    if let Err(e) = writer.write(&records) {
                        if writer.consumed() == 0 && writer.created() {
                            writer.discard();
                        }
                        return Err(e);
                    }
                }
                ChunkMsg::Done { index, outcome } => {
                    outcomes[index] = Some(outcome);
                }
            }
        }
        while tasks.join_next().await.is_some() {}

        let metadata = FetchMetadata {
            from_date: Some(params.from_date),
            to_date: Some(params.to_date),
            filter_events: params.events.clone(),
            filter_where: params.where_expr.clone(),
            ..Default::default()
        };
        let rows = writer.finish(&metadata)?;

        if cancel.is_cancelled() {
            // Committed chunks remain; the operation itself was cancelled.
            return Err(Error::Cancelled);
        }

        tracing::info!(table, rows, chunks = outcomes.len(), "parallel fetch finished");
        let chunk_outcomes = chunks
            .into_iter()
            .zip(outcomes)
            .map(|((from_date, to_date), outcome)| match outcome {
                Some(Ok(records)) => ChunkOutcome { from_date, to_date, records, error: None },
                Some(Err(error)) => {
                    ChunkOutcome { from_date, to_date, records: 0, error: Some(error) }
                }
                None => ChunkOutcome {
                    from_date,
                    to_date,
                    records: 0,
                    error: Some("chunk did not complete".to_string()),
                },
            })
            .collect();

        Ok(ParallelFetchResult {
            table: table.to_string(),
            rows,
            duration_seconds: started.elapsed().as_secs_f64(),
            chunks: chunk_outcomes,
            fetched_at: Utc::now(),
            cache: Default::default(),
        })
    }
}

async fn run_chunk(
    client: &ApiClient,
    params: ExportParams,
    batch_size: usize,
    tx: &mpsc::Sender<ChunkMsg>,
    cancel: CancellationToken,
) -> std::result::Result<u64, String> {
    let mut stream = client.export_events(params, cancel);
    let mut batch = Vec::with_capacity(batch_size);
    let mut records: u64 = 0;
    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => {
                records += 1;
                batch.push(record);
                if batch.len() >= batch_size
                    && tx.send(ChunkMsg::Batch(std::mem::take(&mut batch))).await.is_err()
                {
                    return Err("writer closed".to_string());
                }
            }
            Err(e) => return Err(format!("{}: {e}", e.code())),
        }
    }
    if !batch.is_empty() && tx.send(ChunkMsg::Batch(batch)).await.is_err() {
        return Err("writer closed".to_string());
    }
    Ok(records)
}

fn effective_batch_size(requested: Option<usize>) -> Result<usize> {
    let size = requested.unwrap_or(DEFAULT_BATCH_SIZE);
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&size) {
        return Err(Error::query(format!(
            "batch_size {size} is out of range ({MIN_BATCH_SIZE}..={MAX_BATCH_SIZE})"
        )));
    }
    Ok(size)
}

/// Contiguous `[from, to]` chunks of at most `chunk_days` days each.
fn partition_range(from: NaiveDate, to: NaiveDate, chunk_days: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let span = chrono::Days::new(chunk_days.max(1) as u64 - 1);
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start
            .checked_add_days(span)
            .map(|candidate| candidate.min(to))
            .unwrap_or(to);
        chunks.push((start, end));
        let Some(next) = end.checked_add_days(chrono::Days::new(1)) else { break };
        start = next;
    }
    chunks
}
