//! # Redis
//!
//! Document store backing the ledger.
//!
//! ## Requirements
//!
//! - Create-if-absent keyed by record id
//! - Max index lookup without scanning every record
//! - Idempotent database/container bootstrap
//!
//! ## Implementation
//!
//! All keys live under `ledger:`.
//! - `ledger:databases`: set of database names
//! - `ledger:{db}:containers`: hash, container name to partition key path
//! - `ledger:{db}:{container}:items`: hash, record id to JSON record
//! - `ledger:{db}:{container}:index:{partition}`: sorted set, record id scored by index
//!
//! Creating a record is one Lua script: check the container is registered, `HSETNX`
//! the item, then `ZADD` the index entry only if the item was new. Redis runs
//! scripts atomically, so the record and its index entry never diverge and a losing
//! writer sees a conflict. The max query checks the container in the same
//! `MULTI` as its `ZREVRANGE`, so both operations fail on an unbootstrapped store.
//!
//! Sorted-set scores are doubles and only order the entries. The exact index is
//! parsed back from the member id.
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::info;
use url::Url;

use crate::{
    config::StoreConfig,
    memory::MemoryStore,
    store::{ScoreRecord, ScoreStore, StoreConnector, StoreError, StoreLayout, index_from_id},
};

const KEY_PREFIX: &str = "ledger";
const MEMORY_SCHEME: &str = "memory";

const CONTAINER_MISSING: i64 = -1;
const ID_TAKEN: i64 = 0;

const CREATE_SCRIPT: &str = r"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return -1
end
if redis.call('HSETNX', KEYS[2], ARGV[2], ARGV[3]) == 0 then
    return 0
end
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[2])
return 1
";

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

pub async fn init_redis(redis_url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(500));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

/// Puts the credential into the endpoint URL unless it already carries one.
pub fn authorized_url(endpoint: &str, key: &str) -> Result<String, StoreError> {
    let mut url = Url::parse(endpoint).map_err(|e| StoreError::InvalidEndpoint(e.to_string()))?;

    if url.password().is_none() {
        url.set_password(Some(key))
            .map_err(|_| StoreError::InvalidEndpoint(endpoint.to_string()))?;
    }

    Ok(url.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisKeys {
    pub databases: String,
    pub containers: String,
    pub items: String,
    index_prefix: String,
}

impl RedisKeys {
    pub fn new(layout: &StoreLayout) -> Self {
        let container = format!("{KEY_PREFIX}:{}:{}", layout.database, layout.container);

        Self {
            databases: format!("{KEY_PREFIX}:databases"),
            containers: format!("{KEY_PREFIX}:{}:containers", layout.database),
            items: format!("{container}:items"),
            index_prefix: format!("{container}:index"),
        }
    }

    pub fn index(&self, partition: &str) -> String {
        format!("{}:{partition}", self.index_prefix)
    }
}

pub struct RedisStore {
    connection: ConnectionManager,
    layout: StoreLayout,
    keys: RedisKeys,
    create_script: Script,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager, layout: StoreLayout) -> Self {
        Self {
            connection,
            keys: RedisKeys::new(&layout),
            layout,
            create_script: Script::new(CREATE_SCRIPT),
        }
    }

    fn container_not_found(&self) -> StoreError {
        StoreError::ContainerNotFound {
            database: self.layout.database.clone(),
            container: self.layout.container.clone(),
        }
    }
}

#[async_trait]
impl ScoreStore for RedisStore {
    async fn bootstrap(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();

        let _: () = connection
            .sadd(&self.keys.databases, &self.layout.database)
            .await?;

        let created: bool = connection
            .hset_nx(
                &self.keys.containers,
                &self.layout.container,
                &self.layout.partition_key,
            )
            .await?;

        if created {
            info!(
                "Created container {}/{} keyed by {}",
                self.layout.database, self.layout.container, self.layout.partition_key
            );
        }

        Ok(())
    }

    /// Sorted-set scores order the entries; the exact index comes from the member id.
    async fn max_index(&self, partition: &str) -> Result<Option<u64>, StoreError> {
        let mut connection = self.connection.clone();

        let (exists, newest): (bool, Vec<String>) = redis::pipe()
            .atomic()
            .hexists(&self.keys.containers, &self.layout.container)
            .zrevrange(self.keys.index(partition), 0, 0)
            .query_async(&mut connection)
            .await?;

        if !exists {
            return Err(self.container_not_found());
        }

        newest
            .first()
            .map(|id| index_from_id(id).ok_or_else(|| StoreError::CorruptRecord(id.clone())))
            .transpose()
    }

    async fn create(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let body = serde_json::to_string(record)?;

        let outcome: i64 = self
            .create_script
            .key(&self.keys.containers)
            .key(&self.keys.items)
            .key(self.keys.index(&record.partition))
            .arg(&self.layout.container)
            .arg(&record.id)
            .arg(body)
            .arg(record.index)
            .invoke_async(&mut connection)
            .await?;

        match outcome {
            CONTAINER_MISSING => Err(self.container_not_found()),
            ID_TAKEN => Err(StoreError::Conflict {
                id: record.id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Opens the store named by [`StoreConfig`]. `memory://` gives an in-process store.
pub struct RedisConnector {
    config: StoreConfig,
}

impl RedisConnector {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or(StoreError::ConfigurationMissing("STORE_ENDPOINT"))?;

        if endpoint.starts_with(&format!("{MEMORY_SCHEME}:")) {
            info!("Using in-memory store");
            return Ok(MemoryStore::new(self.config.layout.clone()));
        }

        let key = self
            .config
            .key
            .as_deref()
            .ok_or(StoreError::ConfigurationMissing("STORE_KEY"))?;

        info!("Connecting to store...");
        let connection = init_redis(&authorized_url(endpoint, key)?).await?;

        Ok(Arc::new(RedisStore::new(
            connection,
            self.config.layout.clone(),
        )))
    }
}
