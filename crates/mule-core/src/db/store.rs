//! Local mirror store for remote entity records

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use libsql::{params, Connection, Row};

use crate::db::{as_f64, as_i64, as_text, f64_or_null, i64_or_null, text_or_null};
use crate::error::{Error, Result};
use crate::models::{
    EntityRecord, GenericRecord, Partner, Product, SyncMetadata, PARTNER_ENTITY, PRODUCT_ENTITY,
};
use crate::util::flatten_entity_name;

/// libSQL-backed store owning mirrored records and sync metadata.
///
/// Batch writes for one entity type are atomic: either every record in the
/// batch lands, or none do.
pub struct LocalStore<'a> {
    conn: &'a Connection,
}

impl<'a> LocalStore<'a> {
    /// Create a new store over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Upsert a batch of records for one entity type.
    ///
    /// Idempotent; re-saving identical records is a no-op in effect.
    pub async fn save(&self, entity_type: &str, records: &[EntityRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            if record.entity_type() != entity_type {
                return Err(Error::InvalidInput(format!(
                    "batch for {entity_type} contains a {} record",
                    record.entity_type()
                )));
            }
        }

        let table = mirror_table(entity_type)?;
        if !is_known_entity(entity_type) {
            self.ensure_mirror_table(&table).await?;
        }

        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        for record in records {
            if let Err(e) = self.upsert(&table, record).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(e);
            }
        }
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }

        tracing::debug!(entity_type, count = records.len(), "Saved mirror batch");
        Ok(())
    }

    async fn upsert(&self, table: &str, record: &EntityRecord) -> Result<()> {
        match record {
            EntityRecord::Partner(partner) => {
                self.conn
                    .execute(
                        "INSERT INTO res_partner
                             (id, name, email, phone, city, company_id, company_name, write_date)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                             name = excluded.name,
                             email = excluded.email,
                             phone = excluded.phone,
                             city = excluded.city,
                             company_id = excluded.company_id,
                             company_name = excluded.company_name,
                             write_date = excluded.write_date",
                        params![
                            partner.id,
                            partner.name.as_str(),
                            text_or_null(partner.email.as_deref()),
                            text_or_null(partner.phone.as_deref()),
                            text_or_null(partner.city.as_deref()),
                            i64_or_null(partner.company_id),
                            text_or_null(partner.company_name.as_deref()),
                            text_or_null(partner.write_date.as_deref()),
                        ],
                    )
                    .await?;
            }
            EntityRecord::Product(product) => {
                self.conn
                    .execute(
                        "INSERT INTO product_product
                             (id, name, default_code, list_price, qty_available,
                              categ_id, categ_name, write_date)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                         ON CONFLICT(id) DO UPDATE SET
                             name = excluded.name,
                             default_code = excluded.default_code,
                             list_price = excluded.list_price,
                             qty_available = excluded.qty_available,
                             categ_id = excluded.categ_id,
                             categ_name = excluded.categ_name,
                             write_date = excluded.write_date",
                        params![
                            product.id,
                            product.name.as_str(),
                            text_or_null(product.default_code.as_deref()),
                            f64_or_null(product.list_price),
                            f64_or_null(product.qty_available),
                            i64_or_null(product.categ_id),
                            text_or_null(product.categ_name.as_deref()),
                            text_or_null(product.write_date.as_deref()),
                        ],
                    )
                    .await?;
            }
            EntityRecord::Generic(generic) => {
                let attrs = serde_json::to_string(&generic.attrs)?;
                self.conn
                    .execute(
                        &format!(
                            "INSERT INTO {table} (id, attrs, write_date)
                             VALUES (?, ?, ?)
                             ON CONFLICT(id) DO UPDATE SET
                                 attrs = excluded.attrs,
                                 write_date = excluded.write_date"
                        ),
                        params![
                            generic.id,
                            attrs,
                            text_or_null(generic.write_date.as_deref()),
                        ],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Get one mirrored record by id
    pub async fn get(&self, entity_type: &str, id: i64) -> Result<Option<EntityRecord>> {
        let table = mirror_table(entity_type)?;
        if !is_known_entity(entity_type) && !self.table_exists(&table).await? {
            return Ok(None);
        }

        let sql = match entity_type {
            PARTNER_ENTITY => "SELECT id, name, email, phone, city, company_id, company_name, \
                               write_date FROM res_partner WHERE id = ?"
                .to_string(),
            PRODUCT_ENTITY => "SELECT id, name, default_code, list_price, qty_available, \
                               categ_id, categ_name, write_date FROM product_product WHERE id = ?"
                .to_string(),
            _ => format!("SELECT id, attrs, write_date FROM {table} WHERE id = ?"),
        };

        let mut rows = self.conn.query(&sql, params![id]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_record(entity_type, &row)?)),
            None => Ok(None),
        }
    }

    /// List mirrored records, ordered by id descending
    pub async fn read(
        &self,
        entity_type: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<EntityRecord>> {
        let table = mirror_table(entity_type)?;
        if !is_known_entity(entity_type) && !self.table_exists(&table).await? {
            return Ok(Vec::new());
        }

        let sql = match entity_type {
            PARTNER_ENTITY => "SELECT id, name, email, phone, city, company_id, company_name, \
                               write_date FROM res_partner ORDER BY id DESC LIMIT ? OFFSET ?"
                .to_string(),
            PRODUCT_ENTITY => "SELECT id, name, default_code, list_price, qty_available, \
                               categ_id, categ_name, write_date FROM product_product \
                               ORDER BY id DESC LIMIT ? OFFSET ?"
                .to_string(),
            _ => format!(
                "SELECT id, attrs, write_date FROM {table} ORDER BY id DESC LIMIT ? OFFSET ?"
            ),
        };

        let mut rows = self
            .conn
            .query(&sql, params![i64::from(limit), i64::from(offset)])
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(entity_type, &row)?);
        }
        Ok(records)
    }

    /// Count mirrored records for an entity type
    pub async fn count(&self, entity_type: &str) -> Result<u64> {
        let table = mirror_table(entity_type)?;
        if !is_known_entity(entity_type) && !self.table_exists(&table).await? {
            return Ok(0);
        }

        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM {table}"), ())
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Remove one mirrored record; removing an absent record is a no-op
    pub async fn delete(&self, entity_type: &str, id: i64) -> Result<()> {
        let table = mirror_table(entity_type)?;
        if !is_known_entity(entity_type) && !self.table_exists(&table).await? {
            return Ok(());
        }

        self.conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?"), params![id])
            .await?;
        Ok(())
    }

    /// Sync metadata for one entity type, if a sync has ever completed
    pub async fn metadata(&self, entity_type: &str) -> Result<Option<SyncMetadata>> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, last_sync_timestamp, last_sync_write_date, record_count, \
                 sync_mode FROM sync_metadata WHERE entity_type = ?",
                params![entity_type],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let sync_mode: String = row.get(4)?;
                Ok(Some(SyncMetadata {
                    entity_type: row.get(0)?,
                    last_sync_timestamp: row.get(1)?,
                    last_sync_write_date: as_text(row.get_value(2)?),
                    record_count: u64::try_from(row.get::<i64>(3)?).unwrap_or(0),
                    sync_mode: sync_mode.parse()?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Replace the sync metadata row for one entity type
    pub async fn set_metadata(&self, metadata: &SyncMetadata) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_metadata
                     (entity_type, last_sync_timestamp, last_sync_write_date, record_count, \
                      sync_mode)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    metadata.entity_type.as_str(),
                    metadata.last_sync_timestamp,
                    text_or_null(metadata.last_sync_write_date.as_deref()),
                    i64::try_from(metadata.record_count).unwrap_or(i64::MAX),
                    metadata.sync_mode.as_str(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn ensure_mirror_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id INTEGER PRIMARY KEY,
                        attrs TEXT NOT NULL,
                        write_date TEXT
                    )"
                ),
                (),
            )
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
                params![table],
            )
            .await?;

        Ok(match rows.next().await? {
            Some(row) => row.get::<i32>(0)? != 0,
            None => false,
        })
    }
}

fn is_known_entity(entity_type: &str) -> bool {
    entity_type == PARTNER_ENTITY || entity_type == PRODUCT_ENTITY
}

fn mirror_table(entity_type: &str) -> Result<String> {
    flatten_entity_name(entity_type)
        .ok_or_else(|| Error::schema(entity_type, "entity type name is not a valid identifier"))
}

fn parse_record(entity_type: &str, row: &Row) -> Result<EntityRecord> {
    match entity_type {
        PARTNER_ENTITY => Ok(EntityRecord::Partner(Partner {
            id: row.get(0)?,
            name: row.get(1)?,
            email: as_text(row.get_value(2)?),
            phone: as_text(row.get_value(3)?),
            city: as_text(row.get_value(4)?),
            company_id: as_i64(row.get_value(5)?),
            company_name: as_text(row.get_value(6)?),
            write_date: as_text(row.get_value(7)?),
        })),
        PRODUCT_ENTITY => Ok(EntityRecord::Product(Product {
            id: row.get(0)?,
            name: row.get(1)?,
            default_code: as_text(row.get_value(2)?),
            list_price: as_f64(row.get_value(3)?),
            qty_available: as_f64(row.get_value(4)?),
            categ_id: as_i64(row.get_value(5)?),
            categ_name: as_text(row.get_value(6)?),
            write_date: as_text(row.get_value(7)?),
        })),
        _ => {
            let attrs: String = row.get(1)?;
            Ok(EntityRecord::Generic(GenericRecord {
                entity_type: entity_type.to_string(),
                id: row.get(0)?,
                attrs: serde_json::from_str(&attrs)?,
                write_date: as_text(row.get_value(2)?),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::SyncMode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn partner(id: i64, name: &str) -> EntityRecord {
        EntityRecord::Partner(Partner {
            id,
            name: name.to_string(),
            email: Some(format!("{name}@example.com")),
            phone: None,
            city: Some("Ghent".to_string()),
            company_id: Some(1),
            company_name: Some("HQ".to_string()),
            write_date: Some("2026-08-01 09:00:00".to_string()),
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_get_partner() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        store
            .save(PARTNER_ENTITY, &[partner(7, "Deco Addict")])
            .await
            .unwrap();

        let fetched = store.get(PARTNER_ENTITY, 7).await.unwrap().unwrap();
        let EntityRecord::Partner(fetched) = fetched else {
            panic!("expected partner");
        };
        assert_eq!(fetched.name, "Deco Addict");
        assert_eq!(fetched.phone, None);
        assert_eq!(fetched.company_id, Some(1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_is_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        let batch = [partner(1, "One"), partner(2, "Two")];
        store.save(PARTNER_ENTITY, &batch).await.unwrap();
        store.save(PARTNER_ENTITY, &batch).await.unwrap();

        assert_eq!(store.count(PARTNER_ENTITY).await.unwrap(), 2);
        let first = store.get(PARTNER_ENTITY, 1).await.unwrap().unwrap();
        assert_eq!(first, batch[0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_orders_by_id_descending() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        store
            .save(
                PARTNER_ENTITY,
                &[partner(1, "One"), partner(3, "Three"), partner(2, "Two")],
            )
            .await
            .unwrap();

        let page = store.read(PARTNER_ENTITY, 2, 0).await.unwrap();
        let ids: Vec<i64> = page.iter().map(EntityRecord::id).collect();
        assert_eq!(ids, vec![3, 2]);

        let rest = store.read(PARTNER_ENTITY, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_generic_entity_round_trip() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        let record = EntityRecord::from_remote(
            "res.users",
            json!({
                "id": 2,
                "login": "admin",
                "partner_id": [7, "Mitchell Admin"],
                "write_date": "2026-08-01 10:00:00"
            })
            .as_object()
            .unwrap()
            .clone(),
        )
        .unwrap();

        store.save("res.users", &[record.clone()]).await.unwrap();

        let fetched = store.get("res.users", 2).await.unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(store.count("res.users").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_never_synced_generic_entity_is_empty() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        assert_eq!(store.count("crm.lead").await.unwrap(), 0);
        assert!(store.read("crm.lead", 10, 0).await.unwrap().is_empty());
        assert!(store.get("crm.lead", 1).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_mixed_batch_is_rejected_before_writing() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        let mixed = [
            partner(1, "One"),
            EntityRecord::Product(Product {
                id: 9,
                name: "Chair".to_string(),
                default_code: None,
                list_price: None,
                qty_available: None,
                categ_id: None,
                categ_name: None,
                write_date: None,
            }),
        ];

        let result = store.save(PARTNER_ENTITY, &mixed).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.count(PARTNER_ENTITY).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unsafe_entity_name_is_a_schema_error() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        let result = store.count("res.partner; DROP TABLE res_partner").await;
        assert!(matches!(result, Err(Error::Schema { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_removes_record() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        store.save(PARTNER_ENTITY, &[partner(5, "Gone")]).await.unwrap();
        store.delete(PARTNER_ENTITY, 5).await.unwrap();
        assert!(store.get(PARTNER_ENTITY, 5).await.unwrap().is_none());

        // Absent record and absent table are both fine
        store.delete(PARTNER_ENTITY, 5).await.unwrap();
        store.delete("crm.lead", 1).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_metadata_replace_on_write() {
        let db = Database::open_in_memory().await.unwrap();
        let store = LocalStore::new(db.connection());

        assert!(store.metadata(PARTNER_ENTITY).await.unwrap().is_none());

        let first = SyncMetadata {
            entity_type: PARTNER_ENTITY.to_string(),
            last_sync_timestamp: 1_000,
            last_sync_write_date: Some("2026-08-01 09:00:00".to_string()),
            record_count: 10,
            sync_mode: SyncMode::Full,
        };
        store.set_metadata(&first).await.unwrap();
        assert_eq!(store.metadata(PARTNER_ENTITY).await.unwrap(), Some(first));

        let second = SyncMetadata {
            entity_type: PARTNER_ENTITY.to_string(),
            last_sync_timestamp: 2_000,
            last_sync_write_date: Some("2026-08-02 12:00:00".to_string()),
            record_count: 12,
            sync_mode: SyncMode::Incremental,
        };
        store.set_metadata(&second).await.unwrap();
        assert_eq!(store.metadata(PARTNER_ENTITY).await.unwrap(), Some(second));
    }
}
