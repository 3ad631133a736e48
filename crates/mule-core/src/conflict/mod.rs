//! Conflict detection and resolution.
//!
//! Compares cached field values against fresh server values, filters out
//! representational false positives, and applies user resolutions. A "keep
//! local" resolution is propagated back to the remote through the offline
//! mutation queue.

use std::collections::BTreeSet;

use libsql::{params, Connection};
use serde::Serialize;
use serde_json::{Number, Value};

use crate::db::as_text;
use crate::error::{Error, Result};
use crate::models::{Conflict, ConflictStatus, OperationKind, RawRecord, Resolution};
use crate::queue::OfflineQueue;
use crate::util::unix_timestamp_now_ms;

/// Normalize a value for comparison.
///
/// Numeric strings equal numbers, arrays compare order-insensitively, and
/// empty strings equal null/missing. Anything that doesn't normalize
/// cleanly is left as-is, so an ambiguous comparison reads as a real
/// difference rather than being discarded.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) => value.clone(),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Value::Null;
            }
            match trimmed.parse::<f64>() {
                Ok(number) if number.is_finite() => Number::from_f64(number)
                    .map_or_else(|| Value::String(trimmed.to_string()), Value::Number),
                _ => Value::String(trimmed.to_string()),
            }
        }
        Value::Number(number) => number
            .as_f64()
            .and_then(Number::from_f64)
            .map_or_else(|| value.clone(), Value::Number),
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items.iter().map(normalize).collect();
            normalized.sort_by_cached_key(ToString::to_string);
            Value::Array(normalized)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), normalize(item)))
                .collect(),
        ),
    }
}

/// Whether two values agree after normalization
pub fn values_equal(local: &Value, server: &Value) -> bool {
    normalize(local) == normalize(server)
}

/// Field names whose normalized values differ between the two snapshots.
///
/// Every field present in either snapshot is compared; a field missing on
/// one side counts as null there.
pub fn diff_fields(local: &RawRecord, server: &RawRecord) -> Vec<String> {
    let mut names: BTreeSet<&String> = local.keys().collect();
    names.extend(server.keys());

    names
        .into_iter()
        .filter(|name| {
            let local_value = local.get(*name).unwrap_or(&Value::Null);
            let server_value = server.get(*name).unwrap_or(&Value::Null);
            !values_equal(local_value, server_value)
        })
        .cloned()
        .collect()
}

/// Per-id outcomes of a batch resolution
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResolveReport {
    pub resolved: Vec<i64>,
    pub failures: Vec<(i64, String)>,
}

/// Conflict lifecycle over the `sync_conflicts` control table
pub struct ConflictTracker<'a> {
    conn: &'a Connection,
    queue: &'a OfflineQueue<'a>,
}

impl<'a> ConflictTracker<'a> {
    pub const fn new(conn: &'a Connection, queue: &'a OfflineQueue<'a>) -> Self {
        Self { conn, queue }
    }

    /// Compare snapshots and persist a pending conflict when they diverge.
    ///
    /// Returns the conflict id, or `None` when the snapshots agree after
    /// normalization. A pending conflict already recorded for the record is
    /// refreshed in place rather than duplicated.
    pub async fn record(
        &self,
        entity_type: &str,
        record_id: i64,
        local: &RawRecord,
        server: &RawRecord,
    ) -> Result<Option<i64>> {
        let fields = diff_fields(local, server);
        if fields.is_empty() {
            return Ok(None);
        }

        let fields_json = serde_json::to_string(&fields)?;
        let local_json = serde_json::to_string(local)?;
        let server_json = serde_json::to_string(server)?;
        let detected_at = unix_timestamp_now_ms();

        if let Some(existing) = self.pending_conflict_id(entity_type, record_id).await? {
            self.conn
                .execute(
                    "UPDATE sync_conflicts
                     SET fields = ?, local_values = ?, server_values = ?, detected_at = ?
                     WHERE id = ?",
                    params![fields_json, local_json, server_json, detected_at, existing],
                )
                .await?;
            return Ok(Some(existing));
        }

        self.conn
            .execute(
                "INSERT INTO sync_conflicts
                     (entity_type, record_id, fields, local_values, server_values, detected_at, \
                      status)
                 VALUES (?, ?, ?, ?, ?, ?, 'pending')",
                params![
                    entity_type,
                    record_id,
                    fields_json,
                    local_json,
                    server_json,
                    detected_at
                ],
            )
            .await?;
        Ok(Some(self.conn.last_insert_rowid()))
    }

    /// Load one conflict
    pub async fn get(&self, id: i64) -> Result<Option<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, record_id, fields, local_values, server_values, \
                 detected_at, status, resolution
                 FROM sync_conflicts WHERE id = ?",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(parse_conflict(&row)?)),
            None => Ok(None),
        }
    }

    /// Pending conflicts, oldest first
    pub async fn pending(&self) -> Result<Vec<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, record_id, fields, local_values, server_values, \
                 detected_at, status, resolution
                 FROM sync_conflicts WHERE status = 'pending' ORDER BY id ASC",
                (),
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(parse_conflict(&row)?);
        }
        Ok(conflicts)
    }

    /// Resolve a conflict toward one side.
    ///
    /// Idempotent: resolving an already resolved conflict changes nothing.
    /// Keeping the local side enqueues exactly one update operation carrying
    /// the locally chosen field values, so the resolution propagates back to
    /// the remote.
    pub async fn resolve(&self, id: i64, resolution: Resolution) -> Result<()> {
        let conflict = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conflict {id}")))?;

        // Claim the pending -> resolved transition; zero rows changed means
        // another caller already resolved it
        let claimed = self
            .conn
            .execute(
                "UPDATE sync_conflicts SET status = 'resolved', resolution = ? \
                 WHERE id = ? AND status = 'pending'",
                params![resolution.as_str(), id],
            )
            .await?;
        if claimed == 0 {
            return Ok(());
        }

        if resolution == Resolution::Local {
            let payload = Value::Object(conflict.local_values.clone());
            self.queue
                .enqueue(
                    OperationKind::Update,
                    &conflict.entity_type,
                    payload,
                    Some(conflict.record_id),
                )
                .await?;
        }

        tracing::info!(id, %resolution, "Conflict resolved");
        Ok(())
    }

    /// Resolve several conflicts independently; one failure does not block
    /// the others
    pub async fn batch_resolve(&self, ids: &[i64], resolution: Resolution) -> BatchResolveReport {
        let mut report = BatchResolveReport::default();
        for &id in ids {
            match self.resolve(id, resolution).await {
                Ok(()) => report.resolved.push(id),
                Err(e) => report.failures.push((id, e.to_string())),
            }
        }
        report
    }

    /// Corrective sweep for conflicts recorded by naive detection.
    ///
    /// Re-evaluates all pending conflicts through the same normalization as
    /// detection and removes those whose field list collapses to empty.
    /// Returns the number cleared.
    pub async fn clear_false_positives(&self) -> Result<u64> {
        let pending = self.pending().await?;
        let mut cleared = 0u64;

        for conflict in pending {
            if diff_fields(&conflict.local_values, &conflict.server_values).is_empty() {
                let removed = self
                    .conn
                    .execute(
                        "DELETE FROM sync_conflicts WHERE id = ? AND status = 'pending'",
                        params![conflict.id],
                    )
                    .await?;
                cleared += removed;
            }
        }

        if cleared > 0 {
            tracing::info!(cleared, "Cleared false-positive conflicts");
        }
        Ok(cleared)
    }

    async fn pending_conflict_id(&self, entity_type: &str, record_id: i64) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM sync_conflicts
                 WHERE entity_type = ? AND record_id = ? AND status = 'pending'
                 ORDER BY id ASC LIMIT 1",
                params![entity_type, record_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

fn parse_conflict(row: &libsql::Row) -> Result<Conflict> {
    let fields: String = row.get(3)?;
    let local_values: String = row.get(4)?;
    let server_values: String = row.get(5)?;
    let status: String = row.get(7)?;
    let resolution = as_text(row.get_value(8)?);

    Ok(Conflict {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        record_id: row.get(2)?,
        fields: serde_json::from_str(&fields)?,
        local_values: serde_json::from_str(&local_values)?,
        server_values: serde_json::from_str(&server_values)?,
        detected_at: row.get(6)?,
        status: status.parse::<ConflictStatus>()?,
        resolution: resolution.map(|text| text.parse()).transpose()?,
    })
}
