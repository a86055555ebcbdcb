use std::sync::Arc;

use super::{config::Config, database::RedisConnector, ledger::ScoreLedger};

pub struct AppState {
    pub config: Config,
    pub ledger: ScoreLedger,
}

impl AppState {
    /// The ledger connects to the configured store on its first submission.
    pub fn new(config: Config) -> Arc<Self> {
        let ledger = ScoreLedger::new(
            RedisConnector::new(config.store.clone()),
            config.max_attempts,
        );

        Self::with_ledger(config, ledger)
    }

    pub fn with_ledger(config: Config, ledger: ScoreLedger) -> Arc<Self> {
        Arc::new(Self { config, ledger })
    }
}
