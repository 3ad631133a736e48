//! Remote data source contract.
//!
//! The sync engine consumes this interface only; transport, authentication,
//! and session lifecycle belong to the adapter behind it.

mod filter;
mod jsonrpc;

pub use filter::{CmpOp, Filter, FilterItem};
pub use jsonrpc::{JsonRpcRemote, RpcConfig};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::models::RawRecord;

/// Field metadata as described by the remote schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    #[serde(rename = "type")]
    pub field_type: String,
    /// Human-readable label
    #[serde(rename = "string", default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    /// Target entity type for relational fields
    #[serde(default)]
    pub relation: Option<String>,
}

/// Ordering and paging for a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub order: String,
    /// `None` means effectively unlimited
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            order: "id asc".to_string(),
            limit: None,
            offset: 0,
        }
    }
}

/// Remote-object RPC interface consumed by the sync engine
#[allow(async_fn_in_trait)]
pub trait RemoteDataSource {
    /// Count records matching a filter
    async fn count_records(&self, entity_type: &str, filter: &Filter) -> Result<u64>;

    /// Fetch records matching a filter, projected to the given fields
    async fn fetch_records(
        &self,
        entity_type: &str,
        filter: &Filter,
        fields: &[String],
        options: &FetchOptions,
    ) -> Result<Vec<RawRecord>>;

    /// Describe the entity type's fields
    async fn describe_fields(&self, entity_type: &str) -> Result<BTreeMap<String, FieldMeta>>;

    /// Create a record, returning its new id
    async fn apply_create(&self, entity_type: &str, payload: &Value) -> Result<i64>;

    /// Update a record's fields
    async fn apply_update(&self, entity_type: &str, record_id: i64, payload: &Value)
        -> Result<bool>;

    /// Delete a record
    async fn apply_delete(&self, entity_type: &str, record_id: i64) -> Result<bool>;
}
