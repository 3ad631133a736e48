//! mule-core - Offline-first sync engine for ERP data
//!
//! This crate contains the local mirror store, the offline mutation queue,
//! conflict detection/resolution, and the sync orchestrator shared by all
//! Mule front-ends. Front-ends construct the pieces explicitly and pass
//! them by reference; there is no global state here.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod queue;
pub mod remote;
pub mod sync;
pub mod util;

pub use config::SyncSettings;
pub use error::{Error, Result};
