//! Offline mutation queue.
//!
//! Persists create/update/delete intents that could not reach the remote
//! and replays them when connectivity returns. Drains are serialized: a
//! second `process_queue` call waits until the first finishes.

use std::collections::HashSet;

use libsql::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{as_i64, as_text, i64_or_null, text_or_null, LocalStore};
use crate::error::{Error, Result};
use crate::models::{OperationKind, OperationStatus, QueuedOperation};
use crate::remote::RemoteDataSource;
use crate::sync::CancelFlag;
use crate::util::unix_timestamp_now_ms;

/// What happened to one operation during a drain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainOutcome {
    Completed,
    /// Failed but retry budget remains; back to pending
    Requeued { error: String },
    /// Retry budget exhausted; manual retry required
    DeadLettered { error: String },
}

/// Per-operation outcomes of one queue drain
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainReport {
    pub outcomes: Vec<(i64, DrainOutcome)>,
    /// Set when a connectivity failure stopped the drain early
    pub halted: Option<String>,
}

impl DrainReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DrainOutcome::Completed))
            .count()
    }

    pub fn requeued(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DrainOutcome::Requeued { .. }))
            .count()
    }

    pub fn dead_lettered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, DrainOutcome::DeadLettered { .. }))
            .count()
    }
}

/// Pending/failed totals exposed to front-ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub failed: u64,
}

/// Queue over the `mutation_queue` control table
pub struct OfflineQueue<'a> {
    conn: &'a Connection,
    max_retries: u32,
    drain_lock: Mutex<()>,
}

impl<'a> OfflineQueue<'a> {
    pub const fn new(conn: &'a Connection, max_retries: u32) -> Self {
        Self {
            conn,
            max_retries,
            drain_lock: Mutex::new(()),
        }
    }

    /// Persist a mutation that could not be applied immediately.
    ///
    /// Returns the operation id. Enqueue order is replay order (global FIFO).
    pub async fn enqueue(
        &self,
        kind: OperationKind,
        entity_type: &str,
        payload: Value,
        record_id: Option<i64>,
    ) -> Result<i64> {
        match kind {
            OperationKind::Create if record_id.is_some() => {
                return Err(Error::InvalidInput(
                    "create operations must not carry a record id".to_string(),
                ));
            }
            OperationKind::Update | OperationKind::Delete if record_id.is_none() => {
                return Err(Error::InvalidInput(format!(
                    "{kind} operations require a record id"
                )));
            }
            _ => {}
        }

        self.conn
            .execute(
                "INSERT INTO mutation_queue
                     (kind, entity_type, record_id, payload, status, retry_count, max_retries, \
                      queued_at)
                 VALUES (?, ?, ?, ?, 'pending', 0, ?, ?)",
                params![
                    kind.as_str(),
                    entity_type,
                    i64_or_null(record_id),
                    serde_json::to_string(&payload)?,
                    i64::from(self.max_retries),
                    unix_timestamp_now_ms(),
                ],
            )
            .await?;

        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, %kind, entity_type, "Enqueued offline mutation");
        Ok(id)
    }

    /// Drain pending operations one at a time, oldest first.
    ///
    /// Each pending operation is attempted at most once per drain. A
    /// connectivity failure stops the drain and leaves the operation
    /// pending with its retry budget untouched; an apply rejection consumes
    /// one retry, dead-lettering the operation once the budget is gone.
    pub async fn process_queue<R: RemoteDataSource>(
        &self,
        remote: &R,
        cancel: &CancelFlag,
    ) -> Result<DrainReport> {
        let _guard = self.drain_lock.lock().await;

        let ids = self.pending_ids().await?;
        let mut report = DrainReport::default();

        for id in ids {
            if cancel.is_cancelled() {
                tracing::info!("Queue drain cancelled");
                break;
            }
            let Some(op) = self.operation(id).await? else {
                continue;
            };
            if op.status != OperationStatus::Pending {
                continue;
            }

            self.set_status(id, OperationStatus::Processing, None).await?;
            match self.apply(remote, &op).await {
                Ok(()) => {
                    self.set_status(id, OperationStatus::Completed, None).await?;
                    report.outcomes.push((id, DrainOutcome::Completed));
                }
                Err(e) if e.is_connectivity() => {
                    let message = e.to_string();
                    self.set_status(id, OperationStatus::Pending, Some(&message))
                        .await?;
                    tracing::warn!(id, error = %message, "Remote unreachable, halting drain");
                    report.halted = Some(message);
                    break;
                }
                Err(e) => {
                    let message = e.to_string();
                    let retries = op.retry_count + 1;
                    if retries >= op.max_retries {
                        self.mark_attempt(id, retries, OperationStatus::Failed, &message)
                            .await?;
                        tracing::warn!(id, error = %message, "Operation dead-lettered");
                        report
                            .outcomes
                            .push((id, DrainOutcome::DeadLettered { error: message }));
                    } else {
                        self.mark_attempt(id, retries, OperationStatus::Pending, &message)
                            .await?;
                        report
                            .outcomes
                            .push((id, DrainOutcome::Requeued { error: message }));
                    }
                }
            }
        }

        Ok(report)
    }

    async fn apply<R: RemoteDataSource>(&self, remote: &R, op: &QueuedOperation) -> Result<()> {
        match op.kind {
            OperationKind::Create => {
                let id = remote.apply_create(&op.entity_type, &op.payload).await?;
                tracing::debug!(op = op.id, record_id = id, "Replayed create");
                Ok(())
            }
            OperationKind::Update => {
                let record_id = required_record_id(op)?;
                let applied = remote
                    .apply_update(&op.entity_type, record_id, &op.payload)
                    .await?;
                if applied {
                    Ok(())
                } else {
                    Err(Error::Apply("remote refused the update".to_string()))
                }
            }
            OperationKind::Delete => {
                let record_id = required_record_id(op)?;
                let applied = remote.apply_delete(&op.entity_type, record_id).await?;
                if applied {
                    // Drop the mirror row now; the server stops returning it
                    LocalStore::new(self.conn)
                        .delete(&op.entity_type, record_id)
                        .await?;
                    Ok(())
                } else {
                    Err(Error::Apply("remote refused the delete".to_string()))
                }
            }
        }
    }

    /// Put a dead-lettered operation back into automatic rotation
    pub async fn retry_operation(&self, id: i64) -> Result<()> {
        let op = self
            .operation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {id}")))?;
        if op.status != OperationStatus::Failed {
            return Err(Error::InvalidInput(format!(
                "operation {id} is {} and cannot be retried",
                op.status
            )));
        }

        self.conn
            .execute(
                "UPDATE mutation_queue
                 SET status = 'pending', retry_count = 0, last_error = NULL
                 WHERE id = ?",
                params![id],
            )
            .await?;
        tracing::info!(id, "Operation queued for manual retry");
        Ok(())
    }

    /// Administrative wipe of the entire queue
    pub async fn clear_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM mutation_queue", ()).await?;
        tracing::info!("Mutation queue cleared");
        Ok(())
    }

    /// Remove completed operations, returning how many were pruned
    pub async fn prune_completed(&self) -> Result<u64> {
        let pruned = self
            .conn
            .execute("DELETE FROM mutation_queue WHERE status = 'completed'", ())
            .await?;
        Ok(pruned)
    }

    /// Pending and failed totals
    pub async fn counts(&self) -> Result<QueueCounts> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                     COUNT(CASE WHEN status IN ('pending', 'processing') THEN 1 END),
                     COUNT(CASE WHEN status = 'failed' THEN 1 END)
                 FROM mutation_queue",
                (),
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(QueueCounts {
                pending: u64::try_from(row.get::<i64>(0)?).unwrap_or(0),
                failed: u64::try_from(row.get::<i64>(1)?).unwrap_or(0),
            }),
            None => Ok(QueueCounts::default()),
        }
    }

    /// List operations in enqueue order
    pub async fn operations(&self, limit: u32) -> Result<Vec<QueuedOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, entity_type, record_id, payload, status, retry_count, \
                 max_retries, queued_at, last_error
                 FROM mutation_queue ORDER BY id ASC LIMIT ?",
                params![i64::from(limit)],
            )
            .await?;

        let mut ops = Vec::new();
        while let Some(row) = rows.next().await? {
            ops.push(parse_operation(&row)?);
        }
        Ok(ops)
    }

    /// Load one operation
    pub async fn operation(&self, id: i64) -> Result<Option<QueuedOperation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, kind, entity_type, record_id, payload, status, retry_count, \
                 max_retries, queued_at, last_error
                 FROM mutation_queue WHERE id = ?",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_operation(&row)?)),
            None => Ok(None),
        }
    }

    /// Record ids of this entity type with a mutation still in flight
    pub async fn pending_record_ids(&self, entity_type: &str) -> Result<HashSet<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT record_id FROM mutation_queue
                 WHERE entity_type = ? AND record_id IS NOT NULL
                   AND status IN ('pending', 'processing')",
                params![entity_type],
            )
            .await?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await? {
            ids.insert(row.get::<i64>(0)?);
        }
        Ok(ids)
    }

    async fn pending_ids(&self) -> Result<Vec<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM mutation_queue WHERE status = 'pending' ORDER BY id ASC",
                (),
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<i64>(0)?);
        }
        Ok(ids)
    }

    async fn set_status(
        &self,
        id: i64,
        status: OperationStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE mutation_queue SET status = ?, last_error = ? WHERE id = ?",
                params![status.as_str(), text_or_null(last_error), id],
            )
            .await?;
        Ok(())
    }

    async fn mark_attempt(
        &self,
        id: i64,
        retry_count: u32,
        status: OperationStatus,
        last_error: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE mutation_queue SET status = ?, retry_count = ?, last_error = ? \
                 WHERE id = ?",
                params![
                    status.as_str(),
                    i64::from(retry_count),
                    last_error,
                    id
                ],
            )
            .await?;
        Ok(())
    }
}

fn required_record_id(op: &QueuedOperation) -> Result<i64> {
    op.record_id.ok_or_else(|| {
        Error::InvalidInput(format!("operation {} is missing a record id", op.id))
    })
}

fn parse_operation(row: &libsql::Row) -> Result<QueuedOperation> {
    let kind: String = row.get(1)?;
    let payload: String = row.get(4)?;
    let status: String = row.get(5)?;
    Ok(QueuedOperation {
        id: row.get(0)?,
        kind: kind.parse()?,
        entity_type: row.get(2)?,
        record_id: as_i64(row.get_value(3)?),
        payload: serde_json::from_str(&payload)?,
        status: status.parse()?,
        retry_count: u32::try_from(row.get::<i64>(6)?).unwrap_or(0),
        max_retries: u32::try_from(row.get::<i64>(7)?).unwrap_or(0),
        queued_at: row.get(8)?,
        last_error: as_text(row.get_value(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{RawRecord, PARTNER_ENTITY};
    use crate::remote::{FetchOptions, FieldMeta, Filter};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum StubMode {
        Succeed,
        RejectApply,
        Unreachable,
    }

    struct StubRemote {
        mode: StubMode,
        create_calls: StdMutex<Vec<(String, Value)>>,
        update_calls: StdMutex<Vec<(String, i64, Value)>>,
        delete_calls: StdMutex<Vec<(String, i64)>>,
    }

    impl StubRemote {
        fn new(mode: StubMode) -> Self {
            Self {
                mode,
                create_calls: StdMutex::new(Vec::new()),
                update_calls: StdMutex::new(Vec::new()),
                delete_calls: StdMutex::new(Vec::new()),
            }
        }

        fn fail(&self) -> Option<Error> {
            match self.mode {
                StubMode::Succeed => None,
                StubMode::RejectApply => Some(Error::Apply("validation failed".to_string())),
                StubMode::Unreachable => Some(Error::Connectivity("offline".to_string())),
            }
        }
    }

    impl RemoteDataSource for StubRemote {
        async fn count_records(&self, _entity_type: &str, _filter: &Filter) -> Result<u64> {
            Ok(0)
        }

        async fn fetch_records(
            &self,
            _entity_type: &str,
            _filter: &Filter,
            _fields: &[String],
            _options: &FetchOptions,
        ) -> Result<Vec<RawRecord>> {
            Ok(Vec::new())
        }

        async fn describe_fields(
            &self,
            _entity_type: &str,
        ) -> Result<BTreeMap<String, FieldMeta>> {
            Ok(BTreeMap::new())
        }

        async fn apply_create(&self, entity_type: &str, payload: &Value) -> Result<i64> {
            if let Some(e) = self.fail() {
                return Err(e);
            }
            self.create_calls
                .lock()
                .unwrap()
                .push((entity_type.to_string(), payload.clone()));
            Ok(101)
        }

        async fn apply_update(
            &self,
            entity_type: &str,
            record_id: i64,
            payload: &Value,
        ) -> Result<bool> {
            if let Some(e) = self.fail() {
                return Err(e);
            }
            self.update_calls.lock().unwrap().push((
                entity_type.to_string(),
                record_id,
                payload.clone(),
            ));
            Ok(true)
        }

        async fn apply_delete(&self, entity_type: &str, record_id: i64) -> Result<bool> {
            if let Some(e) = self.fail() {
                return Err(e);
            }
            self.delete_calls
                .lock()
                .unwrap()
                .push((entity_type.to_string(), record_id));
            Ok(true)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_and_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::Succeed);

        let payload = json!({"name": "New Contact", "email": "new@example.com"});
        queue
            .enqueue(OperationKind::Create, "contact", payload.clone(), None)
            .await
            .unwrap();

        let report = queue
            .process_queue(&remote, &CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(report.halted, None);

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts { pending: 0, failed: 0 });

        let creates = remote.create_calls.lock().unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0], ("contact".to_string(), payload));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_exhaustion_dead_letters() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::RejectApply);
        let cancel = CancelFlag::new();

        let id = queue
            .enqueue(
                OperationKind::Update,
                PARTNER_ENTITY,
                json!({"name": "Edited"}),
                Some(7),
            )
            .await
            .unwrap();

        // Three drains consume the whole retry budget
        for expected_retries in 1..=3u32 {
            queue.process_queue(&remote, &cancel).await.unwrap();
            let op = queue.operation(id).await.unwrap().unwrap();
            assert_eq!(op.retry_count, expected_retries);
        }

        let op = queue.operation(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.last_error.is_some());

        // A fourth drain no longer attempts the dead-lettered operation
        let report = queue.process_queue(&remote, &cancel).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert_eq!(queue.counts().await.unwrap().failed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_manual_retry_resets_budget() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 1);
        let cancel = CancelFlag::new();

        let id = queue
            .enqueue(
                OperationKind::Delete,
                PARTNER_ENTITY,
                Value::Null,
                Some(5),
            )
            .await
            .unwrap();

        let rejecting = StubRemote::new(StubMode::RejectApply);
        queue.process_queue(&rejecting, &cancel).await.unwrap();
        let op = queue.operation(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);

        queue.retry_operation(id).await.unwrap();
        let op = queue.operation(id).await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.retry_count, 0);
        assert_eq!(op.last_error, None);

        let accepting = StubRemote::new(StubMode::Succeed);
        let report = queue.process_queue(&accepting, &cancel).await.unwrap();
        assert_eq!(report.completed(), 1);
        assert_eq!(
            *accepting.delete_calls.lock().unwrap(),
            vec![(PARTNER_ENTITY.to_string(), 5)]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_requires_failed_status() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);

        let id = queue
            .enqueue(OperationKind::Create, "contact", json!({}), None)
            .await
            .unwrap();
        assert!(matches!(
            queue.retry_operation(id).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            queue.retry_operation(999).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connectivity_failure_preserves_retry_budget() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::Unreachable);

        let first = queue
            .enqueue(OperationKind::Create, "contact", json!({"name": "A"}), None)
            .await
            .unwrap();
        let second = queue
            .enqueue(OperationKind::Create, "contact", json!({"name": "B"}), None)
            .await
            .unwrap();

        let report = queue
            .process_queue(&remote, &CancelFlag::new())
            .await
            .unwrap();
        assert!(report.halted.is_some());
        assert!(report.outcomes.is_empty());

        // Both stay pending, neither consumed a retry
        for id in [first, second] {
            let op = queue.operation(id).await.unwrap().unwrap();
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.retry_count, 0);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_preserves_enqueue_order() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::Succeed);

        queue
            .enqueue(OperationKind::Create, "contact", json!({"name": "A"}), None)
            .await
            .unwrap();
        queue
            .enqueue(
                OperationKind::Update,
                "contact",
                json!({"name": "B"}),
                Some(1),
            )
            .await
            .unwrap();
        queue
            .enqueue(OperationKind::Create, "lead", json!({"name": "C"}), None)
            .await
            .unwrap();

        let report = queue
            .process_queue(&remote, &CancelFlag::new())
            .await
            .unwrap();
        let ids: Vec<i64> = report.outcomes.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_replay_drops_mirror_row() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::Succeed);

        let record = crate::models::EntityRecord::from_remote(
            PARTNER_ENTITY,
            json!({"id": 5, "name": "Gone"}).as_object().unwrap().clone(),
        )
        .unwrap();
        store.save(PARTNER_ENTITY, &[record]).await.unwrap();

        queue
            .enqueue(OperationKind::Delete, PARTNER_ENTITY, Value::Null, Some(5))
            .await
            .unwrap();
        queue
            .process_queue(&remote, &CancelFlag::new())
            .await
            .unwrap();

        assert!(store.get(PARTNER_ENTITY, 5).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_all_and_prune() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);
        let remote = StubRemote::new(StubMode::Succeed);

        queue
            .enqueue(OperationKind::Create, "contact", json!({}), None)
            .await
            .unwrap();
        queue
            .process_queue(&remote, &CancelFlag::new())
            .await
            .unwrap();
        queue
            .enqueue(OperationKind::Create, "contact", json!({}), None)
            .await
            .unwrap();

        assert_eq!(queue.prune_completed().await.unwrap(), 1);
        assert_eq!(queue.operations(10).await.unwrap().len(), 1);

        queue.clear_all().await.unwrap();
        assert!(queue.operations(10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_validates_record_id() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);

        assert!(matches!(
            queue
                .enqueue(OperationKind::Update, "contact", json!({}), None)
                .await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            queue
                .enqueue(OperationKind::Create, "contact", json!({}), Some(1))
                .await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pending_record_ids_filters_by_entity_type() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = OfflineQueue::new(db.connection(), 3);

        queue
            .enqueue(OperationKind::Update, PARTNER_ENTITY, json!({}), Some(7))
            .await
            .unwrap();
        queue
            .enqueue(OperationKind::Update, "sale.order", json!({}), Some(8))
            .await
            .unwrap();

        let ids = queue.pending_record_ids(PARTNER_ENTITY).await.unwrap();
        assert_eq!(ids, HashSet::from([7]));
    }
}
