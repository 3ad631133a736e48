//! Sync engine settings.

use std::time::Duration;

use crate::models::{PARTNER_ENTITY, PRODUCT_ENTITY};

/// Fetch cap applied to transactional entity types (footprint bound)
pub const DEFAULT_TRANSACTIONAL_FETCH_CAP: u32 = 1000;

const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Tuning knobs for the sync engine and the offline queue.
///
/// Master-data entity types are mirrored without a fetch cap; everything
/// else is treated as transactional and capped.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Entity types mirrored in full regardless of size
    pub master_entity_types: Vec<String>,
    /// Per-run fetch cap for transactional entity types
    pub transactional_fetch_cap: u32,
    /// Upper bound for each individual remote call
    pub remote_timeout: Duration,
    /// Automatic retry budget for queued mutations
    pub max_retries: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            master_entity_types: vec![PARTNER_ENTITY.to_string(), PRODUCT_ENTITY.to_string()],
            transactional_fetch_cap: DEFAULT_TRANSACTIONAL_FETCH_CAP,
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl SyncSettings {
    /// Replace the master-data entity type list
    #[must_use]
    pub fn with_master_entity_types(mut self, entity_types: Vec<String>) -> Self {
        self.master_entity_types = entity_types;
        self
    }

    /// Set the transactional fetch cap
    #[must_use]
    pub const fn with_fetch_cap(mut self, cap: u32) -> Self {
        self.transactional_fetch_cap = cap;
        self
    }

    /// Set the per-call remote timeout
    #[must_use]
    pub const fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the queue retry budget
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the entity type is designated master data
    pub fn is_master(&self, entity_type: &str) -> bool {
        self.master_entity_types
            .iter()
            .any(|known| known == entity_type)
    }

    /// Fetch limit for one sync batch; `None` means effectively unlimited
    pub fn fetch_limit(&self, entity_type: &str) -> Option<u32> {
        if self.is_master(entity_type) {
            None
        } else {
            Some(self.transactional_fetch_cap)
        }
    }
}
