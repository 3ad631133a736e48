//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::RawRecord;

/// Lifecycle status of a conflict; `resolved` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

impl ConflictStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for ConflictStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict status: {other}"
            ))),
        }
    }
}

/// Which side a conflict was resolved toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Local,
    Server,
}

impl Resolution {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "server" => Ok(Self::Server),
            other => Err(Error::InvalidInput(format!("unknown resolution: {other}"))),
        }
    }
}

/// A detected divergence between cached and server field values for one
/// record with a locally queued change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: i64,
    pub entity_type: String,
    pub record_id: i64,
    /// Field names whose normalized values differ
    pub fields: Vec<String>,
    pub local_values: RawRecord,
    pub server_values: RawRecord,
    /// Detection timestamp (unix ms)
    pub detected_at: i64,
    pub status: ConflictStatus,
    pub resolution: Option<Resolution>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_round_trips_through_strings() {
        assert_eq!("local".parse::<Resolution>().unwrap(), Resolution::Local);
        assert_eq!("server".parse::<Resolution>().unwrap(), Resolution::Server);
        assert!("merge".parse::<Resolution>().is_err());
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(
            "pending".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::Pending
        );
        assert_eq!(
            "resolved".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::Resolved
        );
    }
}
