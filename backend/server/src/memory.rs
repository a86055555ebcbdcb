//! In-process store. Same create/max semantics as Redis, one mutex over the catalog.
use std::{
    collections::{BTreeMap, HashMap, btree_map, hash_map},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::info;

use crate::store::{ScoreRecord, ScoreStore, StoreConnector, StoreError, StoreLayout};

struct Container {
    partition_key: String,
    items: BTreeMap<String, ScoreRecord>,
}

pub struct MemoryStore {
    layout: StoreLayout,
    databases: Mutex<HashMap<String, HashMap<String, Container>>>,
}

impl MemoryStore {
    pub fn new(layout: StoreLayout) -> Arc<Self> {
        Arc::new(Self {
            layout,
            databases: Mutex::new(HashMap::new()),
        })
    }

    fn catalog(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Container>>> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn with_container<T>(
        &self,
        f: impl FnOnce(&mut Container) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut catalog = self.catalog();

        let container = catalog
            .get_mut(&self.layout.database)
            .and_then(|containers| containers.get_mut(&self.layout.container))
            .ok_or_else(|| StoreError::ContainerNotFound {
                database: self.layout.database.clone(),
                container: self.layout.container.clone(),
            })?;

        f(container)
    }

    #[cfg(test)]
    fn database_count(&self) -> usize {
        self.catalog().len()
    }

    #[cfg(test)]
    fn container_count(&self) -> usize {
        self.catalog().values().map(HashMap::len).sum()
    }

    #[cfg(test)]
    fn partition_key(&self) -> Option<String> {
        self.catalog()
            .get(&self.layout.database)
            .and_then(|containers| containers.get(&self.layout.container))
            .map(|container| container.partition_key.clone())
    }

    /// Stored records ordered by index. Empty before bootstrap.
    pub fn records(&self) -> Vec<ScoreRecord> {
        let mut records: Vec<ScoreRecord> = self
            .with_container(|container| Ok(container.items.values().cloned().collect()))
            .unwrap_or_default();

        records.sort_by_key(|record| record.index);
        records
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ScoreStore for MemoryStore {
    async fn bootstrap(&self) -> Result<(), StoreError> {
        let mut catalog = self.catalog();
        let containers = catalog.entry(self.layout.database.clone()).or_default();

        if let hash_map::Entry::Vacant(entry) = containers.entry(self.layout.container.clone()) {
            info!(
                "Created container {}/{} keyed by {}",
                self.layout.database, entry.key(), self.layout.partition_key
            );

            entry.insert(Container {
                partition_key: self.layout.partition_key.clone(),
                items: BTreeMap::new(),
            });
        }

        Ok(())
    }

    async fn max_index(&self, partition: &str) -> Result<Option<u64>, StoreError> {
        self.with_container(|container| {
            Ok(container
                .items
                .values()
                .filter(|record| record.partition == partition)
                .map(|record| record.index)
                .max())
        })
    }

    async fn create(&self, record: &ScoreRecord) -> Result<(), StoreError> {
        self.with_container(|container| match container.items.entry(record.id.clone()) {
            btree_map::Entry::Occupied(entry) => Err(StoreError::Conflict {
                id: entry.key().clone(),
            }),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(())
            }
        })
    }
}

#[async_trait]
impl StoreConnector for Arc<MemoryStore> {
    async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
        Ok(self.clone())
    }
}
