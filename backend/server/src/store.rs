//! # Score Store
//!
//! Document store seam for the ledger.
//!
//! ## Requirements
//!
//! - Point-write keyed by record `id`, failing when the id already exists
//! - Max `index` query over a whole partition
//! - Idempotent database + container bootstrap
//!
//! No auto-increment and no transaction spanning the max query and the create.
//! Uniqueness of `id` is the only guarantee the ledger leans on.
use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PARTITION: &str = "scores";
pub const ANONYMOUS: &str = "anonymous";
pub const ID_PREFIX: &str = "score";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScoreRecord {
    pub id: String,
    pub index: u64,
    pub score: u64,
    pub player: String,
    pub partition: String,
}

impl ScoreRecord {
    pub fn new(index: u64, score: u64, player: impl Into<String>) -> Self {
        Self {
            id: record_id(index),
            index,
            score,
            player: player.into(),
            partition: PARTITION.to_string(),
        }
    }
}

pub fn record_id(index: u64) -> String {
    format!("{ID_PREFIX}-{index}")
}

pub fn index_from_id(id: &str) -> Option<u64> {
    id.strip_prefix(ID_PREFIX)?.strip_prefix('-')?.parse().ok()
}

/// Names the database, container and partition key path a store lives under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub database: String,
    pub container: String,
    pub partition_key: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            database: "shooter-db".to_string(),
            container: "scores".to_string(),
            partition_key: "/partition".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record {id} already exists")]
    Conflict { id: String },

    #[error("Store configuration missing: set {0}")]
    ConfigurationMissing(&'static str),

    #[error("Invalid store endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Container {container} not found in database {database}")]
    ContainerNotFound { database: String, container: String },

    #[error("Index space exhausted after {0}")]
    IndexExhausted(u64),

    #[error("Unreadable record id {0}")]
    CorruptRecord(String),

    #[error("Malformed record: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Store request failed: {0}")]
    Backend(#[source] Box<dyn Error + Send + Sync>),
}

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Creates the database and container if absent. Safe to call repeatedly.
    async fn bootstrap(&self) -> Result<(), StoreError>;

    /// Highest `index` stored in `partition`, `None` when the partition is empty.
    async fn max_index(&self, partition: &str) -> Result<Option<u64>, StoreError>;

    /// Writes `record` iff no record with the same `id` exists.
    async fn create(&self, record: &ScoreRecord) -> Result<(), StoreError>;
}

/// Builds a store on first use.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError>;
}
