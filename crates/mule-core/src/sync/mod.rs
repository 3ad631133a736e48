//! Sync orchestration.
//!
//! Chooses full vs incremental mode per run, resolves field lists, fetches
//! entity batches, writes them to the local mirror, and records conflicts
//! against locally queued changes. Entity types are processed sequentially
//! in the order given; per-entity failures are aggregated into the run
//! report and never abort the remaining entity types.

mod fields;

pub use fields::{FieldCache, FALLBACK_FIELDS};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use serde::Serialize;

use crate::config::SyncSettings;
use crate::conflict::ConflictTracker;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{EntityRecord, SyncMetadata, SyncMode};
use crate::queue::OfflineQueue;
use crate::remote::{FetchOptions, Filter, RemoteDataSource};
use crate::util::unix_timestamp_now_ms;

/// Cooperative cancellation flag, polled between entity types.
///
/// Nothing aborts an in-flight fetch or write; a cancelled run leaves
/// already-committed entity types intact and untouched ones absent.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Overall status of one sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Per-entity-type success entry in a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySummary {
    pub entity_type: String,
    pub records_processed: u64,
}

/// Per-entity-type failure entry in a run report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity_type: String,
    pub message: String,
}

/// Aggregated outcome of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub status: RunStatus,
    pub synced: Vec<EntitySummary>,
    pub errors: Vec<EntityFailure>,
    /// Run start (unix ms)
    pub started_at: i64,
    /// Run end (unix ms)
    pub finished_at: i64,
}

impl SyncReport {
    pub fn total_processed(&self) -> u64 {
        self.synced.iter().map(|entry| entry.records_processed).sum()
    }
}

/// Top-level sync coordinator.
///
/// Explicitly constructed over its collaborators; nothing here is global,
/// so tests substitute a stub remote and an in-memory database.
pub struct SyncEngine<'a, R> {
    remote: &'a R,
    store: LocalStore<'a>,
    queue: &'a OfflineQueue<'a>,
    conflicts: ConflictTracker<'a>,
    fields: FieldCache,
    settings: SyncSettings,
}

impl<'a, R: RemoteDataSource> SyncEngine<'a, R> {
    pub fn new(
        remote: &'a R,
        conn: &'a Connection,
        queue: &'a OfflineQueue<'a>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            remote,
            store: LocalStore::new(conn),
            queue,
            conflicts: ConflictTracker::new(conn, queue),
            fields: FieldCache::new(),
            settings,
        }
    }

    /// Full only when none of the given entity types have prior metadata.
    ///
    /// Incremental as soon as any entity type has synced before, even when
    /// others have not: a freshly added entity type swept into an
    /// incremental run is fetched without a write-date filter and gets no
    /// dedicated backfill pass. Observed behavior, kept as-is.
    pub async fn determine_sync_mode(&self, entity_types: &[&str]) -> Result<SyncMode> {
        for entity_type in entity_types {
            if self.store.metadata(entity_type).await?.is_some() {
                return Ok(SyncMode::Incremental);
            }
        }
        Ok(SyncMode::Full)
    }

    /// Run a sync over the given entity types, in order.
    pub async fn sync(&mut self, entity_types: &[&str], cancel: &CancelFlag) -> Result<SyncReport> {
        let started_at = unix_timestamp_now_ms();
        let mode = self.determine_sync_mode(entity_types).await?;
        tracing::info!(%mode, entity_types = entity_types.len(), "Starting sync run");

        let mut status = RunStatus::Completed;
        let mut synced = Vec::new();
        let mut errors = Vec::new();

        for entity_type in entity_types {
            if cancel.is_cancelled() {
                tracing::info!("Sync run cancelled");
                status = RunStatus::Cancelled;
                break;
            }

            match self.sync_entity_type(entity_type, mode).await {
                Ok(records_processed) => {
                    synced.push(EntitySummary {
                        entity_type: (*entity_type).to_string(),
                        records_processed,
                    });
                }
                Err(e) => {
                    tracing::warn!(entity_type, error = %e, "Entity type failed, continuing run");
                    errors.push(EntityFailure {
                        entity_type: (*entity_type).to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let report = SyncReport {
            mode,
            status,
            synced,
            errors,
            started_at,
            finished_at: unix_timestamp_now_ms(),
        };
        tracing::info!(
            processed = report.total_processed(),
            failed = report.errors.len(),
            ?status,
            "Sync run finished"
        );
        Ok(report)
    }

    /// Sync one entity type, returning how many records were processed.
    ///
    /// Metadata is updated only after the batch write commits, with the
    /// write-date high-water mark advanced monotonically.
    pub async fn sync_entity_type(&mut self, entity_type: &str, mode: SyncMode) -> Result<u64> {
        let field_list = self.resolve_fields(entity_type).await;
        let previous = self.store.metadata(entity_type).await?;

        let filter = match mode {
            SyncMode::Full => Filter::none(),
            SyncMode::Incremental => previous
                .as_ref()
                .and_then(|metadata| metadata.last_sync_write_date.as_deref())
                .map_or_else(Filter::none, Filter::modified_since),
        };

        let limit = self.settings.fetch_limit(entity_type);
        let options = FetchOptions {
            order: "id asc".to_string(),
            limit,
            offset: 0,
        };

        let timeout = self.settings.remote_timeout;
        let remote = self.remote;
        let raw = bounded(
            timeout,
            remote.fetch_records(entity_type, &filter, &field_list, &options),
        )
        .await?;

        // The cap is a footprint bound; surface what it cut off
        if limit.is_some_and(|cap| raw.len() as u64 >= u64::from(cap)) {
            if let Ok(total) = bounded(timeout, remote.count_records(entity_type, &filter)).await {
                if total > raw.len() as u64 {
                    tracing::warn!(
                        entity_type,
                        fetched = raw.len(),
                        total,
                        "Fetch cap truncated batch"
                    );
                }
            }
        }

        let mut skipped = 0usize;
        let records: Vec<EntityRecord> = raw
            .into_iter()
            .filter_map(|row| match EntityRecord::from_remote(entity_type, row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(entity_type, error = %e, "Skipping malformed row");
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            tracing::warn!(entity_type, skipped, "Some rows could not be mirrored");
        }

        // Record conflicts against locally queued edits before the mirror
        // is overwritten
        let queued = self.queue.pending_record_ids(entity_type).await?;
        if !queued.is_empty() {
            for record in &records {
                if !queued.contains(&record.id()) {
                    continue;
                }
                if let Some(local) = self.store.get(entity_type, record.id()).await? {
                    let conflict_id = self
                        .conflicts
                        .record(
                            entity_type,
                            record.id(),
                            &local.field_map(),
                            &record.field_map(),
                        )
                        .await?;
                    if let Some(conflict_id) = conflict_id {
                        tracing::info!(
                            entity_type,
                            record_id = record.id(),
                            conflict_id,
                            "Recorded sync conflict"
                        );
                    }
                }
            }
        }

        self.store.save(entity_type, &records).await?;

        let observed = records
            .iter()
            .filter_map(EntityRecord::write_date)
            .max()
            .map(ToString::to_string);
        let last_sync_write_date = match (
            previous.and_then(|metadata| metadata.last_sync_write_date),
            observed,
        ) {
            (Some(kept), Some(seen)) => Some(kept.max(seen)),
            (kept, None) => kept,
            (None, seen) => seen,
        };

        let metadata = SyncMetadata {
            entity_type: entity_type.to_string(),
            last_sync_timestamp: unix_timestamp_now_ms(),
            last_sync_write_date,
            record_count: self.store.count(entity_type).await?,
            sync_mode: mode,
        };
        self.store.set_metadata(&metadata).await?;

        Ok(records.len() as u64)
    }

    /// Field list for an entity type: cached, else detected from the remote
    /// schema, else the minimal safe fallback.
    ///
    /// Only successful detections are cached, so a later run retries
    /// detection instead of pinning the fallback.
    async fn resolve_fields(&mut self, entity_type: &str) -> Vec<String> {
        if let Some(cached) = self.fields.get(entity_type) {
            return cached.to_vec();
        }

        let remote = self.remote;
        match bounded(
            self.settings.remote_timeout,
            remote.describe_fields(entity_type),
        )
        .await
        {
            Ok(meta) => {
                let selected = fields::select_fields(&meta);
                if selected.is_empty() {
                    fallback_fields()
                } else {
                    self.fields.insert(entity_type, selected.clone());
                    selected
                }
            }
            Err(e) => {
                tracing::warn!(
                    entity_type,
                    error = %e,
                    "Field detection failed, using fallback field set"
                );
                fallback_fields()
            }
        }
    }

    /// Explicit invalidation surface for the field cache
    pub fn field_cache_mut(&mut self) -> &mut FieldCache {
        &mut self.fields
    }
}

fn fallback_fields() -> Vec<String> {
    FALLBACK_FIELDS.iter().map(ToString::to_string).collect()
}

/// Bound an individual remote call; a timeout reads as a connectivity
/// failure for this run
async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Connectivity(format!(
            "remote call exceeded {}s timeout",
            limit.as_secs()
        ))),
    }
}
