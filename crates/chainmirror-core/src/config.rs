//! Mirror configuration and the context bundle handed to every loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::Backoff;
use crate::client::ChainClient;
use crate::store::DataStore;
use crate::types::BlockTarget;

/// Configuration for a mirror instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Chain label used in logs (e.g. `"ethereum"`).
    pub chain: String,
    /// Lower bound of the first backfill sweep.
    pub backfill_start: u64,
    /// Upper bound of the first backfill sweep. `None` = node head.
    pub backfill_end: Option<u64>,
    /// Lower bound of the randomized retry delay (milliseconds).
    pub retry_min_delay_ms: u64,
    /// Upper bound of the randomized retry delay (milliseconds).
    pub retry_max_delay_ms: u64,
    /// Delay between balance sweep passes (seconds).
    pub balance_interval_secs: u64,
    /// Maximum ancestors the reconciler purges before raising an alert.
    pub max_reorg_depth: u64,
    /// Insert attempts per block before giving up on a racing writer.
    pub max_write_attempts: u32,
    /// Pause between two complete backfill sweeps (milliseconds).
    pub sweep_pause_ms: u64,
    /// Refresh genesis-allocated addresses on every balance pass
    /// (otherwise only on the first).
    pub refresh_genesis_every_pass: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            backfill_start: 0,
            backfill_end: None,
            retry_min_delay_ms: 10_000,
            retry_max_delay_ms: 60_000,
            balance_interval_secs: 300,
            max_reorg_depth: 64,
            max_write_attempts: 3,
            sweep_pause_ms: 1_000,
            refresh_genesis_every_pass: true,
        }
    }
}

impl MirrorConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_min_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn backfill_target(&self) -> BlockTarget {
        match self.backfill_end {
            Some(n) => BlockTarget::Number(n),
            None => BlockTarget::Latest,
        }
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_interval_secs)
    }

    pub fn sweep_pause(&self) -> Duration {
        Duration::from_millis(self.sweep_pause_ms)
    }
}

/// Chain client, data store and config, shared by every loop.
#[derive(Clone)]
pub struct MirrorContext {
    pub client: Arc<dyn ChainClient>,
    pub store: Arc<dyn DataStore>,
    pub config: MirrorConfig,
}

impl MirrorContext {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: Arc<dyn DataStore>,
        config: MirrorConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }
}
