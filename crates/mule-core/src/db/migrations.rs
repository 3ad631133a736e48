//! Database migrations

use libsql::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: control tables and known mirror tables
async fn migrate_v1(conn: &Connection) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // inside one transaction for atomicity

    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        // Schema version tracking
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // Per-entity-type sync bookkeeping
        "CREATE TABLE IF NOT EXISTS sync_metadata (
            entity_type TEXT PRIMARY KEY,
            last_sync_timestamp INTEGER NOT NULL,
            last_sync_write_date TEXT,
            record_count INTEGER NOT NULL DEFAULT 0,
            sync_mode TEXT NOT NULL
        )",
        // Offline mutation queue
        "CREATE TABLE IF NOT EXISTS mutation_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            record_id INTEGER,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL,
            queued_at INTEGER NOT NULL,
            last_error TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_mutation_queue_status ON mutation_queue(status)",
        "CREATE INDEX IF NOT EXISTS idx_mutation_queue_entity ON mutation_queue(entity_type, record_id)",
        // Detected sync conflicts
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            record_id INTEGER NOT NULL,
            fields TEXT NOT NULL,
            local_values TEXT NOT NULL,
            server_values TEXT NOT NULL,
            detected_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            resolution TEXT
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_status ON sync_conflicts(status)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(entity_type, record_id)",
        // Mirror tables for known entity types
        "CREATE TABLE IF NOT EXISTS res_partner (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            email TEXT,
            phone TEXT,
            city TEXT,
            company_id INTEGER,
            company_name TEXT,
            write_date TEXT
        )",
        "CREATE TABLE IF NOT EXISTS product_product (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            default_code TEXT,
            list_price REAL,
            qty_available REAL,
            categ_id INTEGER,
            categ_name TEXT,
            write_date TEXT
        )",
        // Record migration version
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
