//! Per-entity-type sync metadata

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Mode chosen for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            other => Err(Error::InvalidInput(format!("unknown sync mode: {other}"))),
        }
    }
}

/// Sync bookkeeping for one entity type.
///
/// `last_sync_write_date` is the high-water mark of server modification
/// timestamps observed so far; it never goes backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub entity_type: String,
    /// Wall clock of the last successful run (unix ms)
    pub last_sync_timestamp: i64,
    /// High-water mark, server timestamp format
    pub last_sync_write_date: Option<String>,
    /// Mirrored row count after the last successful batch
    pub record_count: u64,
    pub sync_mode: SyncMode,
}
