//! # Score Ledger
//!
//! Assigns every accepted score the next sequence index and persists it.
//!
//! ## Index Assignment
//!
//! 1. Read the highest index in the shared partition (empty partition counts as 0)
//! 2. Candidate index is `max + 1`, record id is `score-{index}`
//! 3. Create the record, failing if the id already exists
//!
//! Steps 1 and 3 are separate store round trips. Two writers that read the same
//! max race for the same id and the store lets exactly one of them win. The loser
//! gets [`StoreError::Conflict`] and runs the whole cycle again against the new
//! max, up to `max_attempts` times before giving up with [`AppError::Conflict`].
//!
//! Any other store failure is returned as is. Nothing is retried except conflicts.
//!
//! ## Store Lifecycle
//!
//! The store is opened and bootstrapped on the first submission, then reused for
//! the life of the ledger. A failed open is not cached, so the next submission
//! tries again.
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    store::{ANONYMOUS, PARTITION, ScoreRecord, ScoreStore, StoreConnector, StoreError},
};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

pub struct ScoreLedger {
    connector: Box<dyn StoreConnector>,
    store: OnceCell<Arc<dyn ScoreStore>>,
    max_attempts: u32,
}

impl ScoreLedger {
    pub fn new(connector: impl StoreConnector + 'static, max_attempts: u32) -> Self {
        Self {
            connector: Box::new(connector),
            store: OnceCell::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    async fn store(&self) -> Result<&Arc<dyn ScoreStore>, StoreError> {
        self.store
            .get_or_try_init(|| async {
                let store = self.connector.connect().await?;
                store.bootstrap().await?;

                info!("Store ready");
                Ok::<_, StoreError>(store)
            })
            .await
    }

    /// Validates and persists a score, returning its sequence index.
    pub async fn submit(
        &self,
        score: Option<i64>,
        player: Option<String>,
    ) -> Result<u64, AppError> {
        let score = validate_score(score)?;
        let player = player
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());

        let store = self.store().await.inspect_err(|e| {
            warn!("Store unavailable: {e}");
        })?;

        for attempt in 1..=self.max_attempts {
            let max = store.max_index(PARTITION).await.inspect_err(|e| {
                warn!("Failed to read max index: {e}");
            })?;

            let max = max.unwrap_or(0);
            let next = max.checked_add(1).ok_or(StoreError::IndexExhausted(max))?;
            let record = ScoreRecord::new(next, score, player.clone());

            match store.create(&record).await {
                Ok(()) => {
                    debug!("Stored {} for {}", record.id, record.player);
                    return Ok(record.index);
                }
                Err(StoreError::Conflict { id }) => {
                    debug!("Lost race for {id} on attempt {attempt}");
                }
                Err(e) => {
                    warn!("Failed to write {}: {e}", record.id);
                    return Err(e.into());
                }
            }
        }

        warn!("Gave up after {} conflicting attempts", self.max_attempts);
        Err(AppError::Conflict {
            attempts: self.max_attempts,
        })
    }
}

fn validate_score(score: Option<i64>) -> Result<u64, AppError> {
    score
        .and_then(|score| u64::try_from(score).ok())
        .ok_or(AppError::InvalidScore)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{memory::MemoryStore, store::StoreLayout};

    fn ledger() -> (ScoreLedger, Arc<MemoryStore>) {
        let store = MemoryStore::new(StoreLayout::default());
        (ScoreLedger::new(store.clone(), DEFAULT_MAX_ATTEMPTS), store)
    }

    /// Delegates to a memory store but reports a stale max on the first read,
    /// as if another writer committed between our read and our create.
    struct StaleFirstRead {
        inner: Arc<MemoryStore>,
        stale: AtomicBool,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ScoreStore for StaleFirstRead {
        async fn bootstrap(&self) -> Result<(), StoreError> {
            self.inner.bootstrap().await
        }

        async fn max_index(&self, partition: &str) -> Result<Option<u64>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let max = self.inner.max_index(partition).await?;

            if self.stale.swap(false, Ordering::SeqCst) {
                return Ok(max.map(|max| max - 1).filter(|max| *max > 0));
            }

            Ok(max)
        }

        async fn create(&self, record: &ScoreRecord) -> Result<(), StoreError> {
            self.inner.create(record).await
        }
    }

    #[async_trait]
    impl StoreConnector for Arc<StaleFirstRead> {
        async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
            Ok(self.clone())
        }
    }

    /// Every create loses.
    struct AlwaysContended;

    #[async_trait]
    impl ScoreStore for AlwaysContended {
        async fn bootstrap(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn max_index(&self, _partition: &str) -> Result<Option<u64>, StoreError> {
            Ok(Some(1))
        }

        async fn create(&self, record: &ScoreRecord) -> Result<(), StoreError> {
            Err(StoreError::Conflict {
                id: record.id.clone(),
            })
        }
    }

    /// Partition already holds the largest representable index.
    struct Saturated;

    #[async_trait]
    impl ScoreStore for Saturated {
        async fn bootstrap(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn max_index(&self, _partition: &str) -> Result<Option<u64>, StoreError> {
            Ok(Some(u64::MAX))
        }

        async fn create(&self, _record: &ScoreRecord) -> Result<(), StoreError> {
            panic!("nothing fits after u64::MAX");
        }
    }

    struct SaturatedConnector;

    #[async_trait]
    impl StoreConnector for SaturatedConnector {
        async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
            Ok(Arc::new(Saturated))
        }
    }

    struct Unreachable {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl StoreConnector for Unreachable {
        async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::ConfigurationMissing("STORE_ENDPOINT"))
        }
    }

    struct Contended;

    #[async_trait]
    impl StoreConnector for Contended {
        async fn connect(&self) -> Result<Arc<dyn ScoreStore>, StoreError> {
            Ok(Arc::new(AlwaysContended))
        }
    }

    #[tokio::test]
    async fn test_first_score_defaults_player() {
        let (ledger, store) = ledger();

        assert_eq!(ledger.submit(Some(42), None).await.unwrap(), 1);
        assert_eq!(store.records(), vec![ScoreRecord::new(1, 42, "anonymous")]);
    }

    #[tokio::test]
    async fn test_sequential_indices() {
        let (ledger, store) = ledger();

        for expected in 1..=4 {
            let index = ledger.submit(Some(expected as i64 * 10), None).await.unwrap();
            assert_eq!(index, expected);
        }

        let indices: Vec<u64> = store.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_continues_after_existing_record() {
        let (ledger, store) = ledger();
        store.bootstrap().await.unwrap();
        store.create(&ScoreRecord::new(3, 7, "old")).await.unwrap();

        let index = ledger
            .submit(Some(10), Some("ava".to_string()))
            .await
            .unwrap();

        assert_eq!(index, 4);
        assert_eq!(store.records()[1], ScoreRecord::new(4, 10, "ava"));
    }

    #[tokio::test]
    async fn test_empty_player_is_anonymous() {
        let (ledger, store) = ledger();

        ledger.submit(Some(0), Some(String::new())).await.unwrap();
        assert_eq!(store.records()[0].player, "anonymous");
    }

    #[tokio::test]
    async fn test_rejects_before_store_access() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let ledger = ScoreLedger::new(
            Unreachable {
                attempts: attempts.clone(),
            },
            DEFAULT_MAX_ATTEMPTS,
        );

        assert!(matches!(
            ledger.submit(Some(-5), None).await,
            Err(AppError::InvalidScore)
        ));
        assert!(matches!(
            ledger.submit(None, Some("ava".to_string())).await,
            Err(AppError::InvalidScore)
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_negative_score_stores_nothing() {
        let (ledger, store) = ledger();
        ledger.submit(Some(1), None).await.unwrap();

        assert!(ledger.submit(Some(-5), None).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let ledger = ScoreLedger::new(
            Unreachable {
                attempts: attempts.clone(),
            },
            DEFAULT_MAX_ATTEMPTS,
        );

        for _ in 0..2 {
            let err = ledger.submit(Some(1), None).await.unwrap_err();
            assert!(matches!(
                err,
                AppError::Store(StoreError::ConfigurationMissing(_))
            ));
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lost_race_retries_next_index() {
        let inner = MemoryStore::new(StoreLayout::default());
        inner.bootstrap().await.unwrap();
        inner.create(&ScoreRecord::new(1, 5, "first")).await.unwrap();
        inner.create(&ScoreRecord::new(2, 6, "winner")).await.unwrap();

        let racing = Arc::new(StaleFirstRead {
            inner: inner.clone(),
            stale: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        });
        let ledger = ScoreLedger::new(racing.clone(), DEFAULT_MAX_ATTEMPTS);

        // First read sees max 1, collides with the winner at 2, then lands on 3.
        let index = ledger
            .submit(Some(9), Some("loser".to_string()))
            .await
            .unwrap();

        assert_eq!(index, 3);
        assert_eq!(racing.reads.load(Ordering::SeqCst), 2);

        let at_two: Vec<ScoreRecord> = inner
            .records()
            .into_iter()
            .filter(|r| r.index == 2)
            .collect();
        assert_eq!(at_two, vec![ScoreRecord::new(2, 6, "winner")]);
    }

    #[tokio::test]
    async fn test_index_exhaustion_is_store_error() {
        let ledger = ScoreLedger::new(SaturatedConnector, DEFAULT_MAX_ATTEMPTS);

        let err = ledger.submit(Some(1), None).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Store(StoreError::IndexExhausted(u64::MAX))
        ));
    }

    #[tokio::test]
    async fn test_conflict_surfaces_after_max_attempts() {
        let ledger = ScoreLedger::new(Contended, 3);

        let err = ledger.submit(Some(1), None).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { attempts: 3 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_unique() {
        const WRITERS: u64 = 8;

        let store = MemoryStore::new(StoreLayout::default());
        // Each lost race means another writer committed, so WRITERS attempts always suffice.
        let ledger = Arc::new(ScoreLedger::new(store.clone(), WRITERS as u32));

        let handles: Vec<_> = (0..WRITERS)
            .map(|n| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.submit(Some(n as i64), None).await })
            })
            .collect();

        let mut indices = Vec::new();
        for handle in handles {
            indices.push(handle.await.unwrap().unwrap());
        }
        indices.sort();

        assert_eq!(indices, (1..=WRITERS).collect::<Vec<_>>());
        assert_eq!(store.len(), WRITERS as usize);
    }
}
