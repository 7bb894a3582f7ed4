//! Balance sweeper: periodically refreshes balances of addresses touched
//! since the previous pass.
//!
//! The store journals every sender, recipient and miner it inserts. Each
//! pass reads the journal cursor, collects the distinct addresses journaled
//! after the watermark, adds the genesis allocation, and refreshes every
//! address sequentially to bound load on the node. The cursor read at pass
//! start becomes the next watermark, so anything stored while a pass runs,
//! backfilled history included, is picked up by the following one.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::MirrorContext;
use crate::error::MirrorError;
use crate::types::{ether_value, format_ether, Address};

/// Result of one balance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalancePass {
    /// Pass start time; also the `last_updated` written to every record.
    pub started_at: i64,
    /// Journal cursor read when the pass started.
    pub cursor: u64,
    /// Size of the dirty set.
    pub dirty: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Refreshes address balances from the node.
pub struct BalanceSweeper {
    ctx: MirrorContext,
    cancel: CancellationToken,
    /// Journal cursor of the last completed pass (0 = all history).
    watermark: u64,
    genesis_refreshed: bool,
}

impl BalanceSweeper {
    pub fn new(ctx: MirrorContext, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            watermark: 0,
            genesis_refreshed: false,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Run a pass, wait `balance_interval`, repeat until cancelled.
    pub async fn run(mut self) {
        let interval = self.ctx.config.balance_interval();
        loop {
            let now = chrono::Utc::now().timestamp();
            match self.sweep_at(now).await {
                Ok(pass) => info!(
                    dirty = pass.dirty,
                    refreshed = pass.refreshed,
                    failed = pass.failed,
                    watermark = self.watermark,
                    "balance pass complete"
                ),
                Err(MirrorError::Cancelled) => break,
                Err(e) => warn!(error = %e, watermark = self.watermark, "balance pass failed"),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("balance sweeper stopped");
    }

    /// Run one pass that started at `started_at` (unix seconds).
    ///
    /// The watermark only advances when the pass runs to completion; a
    /// failed address is logged and skipped, not retried within the pass.
    pub async fn sweep_at(&mut self, started_at: i64) -> Result<BalancePass, MirrorError> {
        let store = &self.ctx.store;
        let cursor = store.observation_cursor().await?;
        let mut dirty = self.dirty_set(self.watermark).await?;

        let mut genesis = BTreeSet::new();
        if self.ctx.config.refresh_genesis_every_pass || !self.genesis_refreshed {
            match self.ctx.client.genesis_allocation().await {
                Ok(addrs) => genesis.extend(addrs.iter().filter_map(|a| normalize(a))),
                Err(e) => warn!(error = %e, "failed to load genesis allocation"),
            }
        }
        let genesis_loaded = !genesis.is_empty();
        dirty.extend(genesis.iter().cloned());

        let mut pass = BalancePass {
            started_at,
            cursor,
            dirty: dirty.len(),
            ..Default::default()
        };
        debug!(dirty = pass.dirty, since = self.watermark, cursor, "starting balance pass");

        let mut genesis_failed = false;
        for address in &dirty {
            if self.cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            match self.refresh(address, started_at).await {
                Ok(()) => pass.refreshed += 1,
                Err(e) => {
                    error!(address = %address, error = %e, "balance refresh failed");
                    pass.failed += 1;
                    genesis_failed |= genesis.contains(address);
                }
            }
        }

        if genesis_loaded && !genesis_failed {
            self.genesis_refreshed = true;
        }
        self.watermark = cursor;
        match store.prune_observations(cursor).await {
            Ok(pruned) => debug!(pruned, cursor, "pruned observation journal"),
            Err(e) => warn!(error = %e, cursor, "failed to prune observation journal"),
        }
        Ok(pass)
    }

    /// Senders, recipients and miners journaled after `since`.
    pub async fn dirty_set(&self, since: u64) -> Result<BTreeSet<String>, MirrorError> {
        let observed = self.ctx.store.addresses_observed_since(since).await?;
        Ok(observed.iter().filter_map(|a| normalize(a)).collect())
    }

    async fn refresh(&self, address: &str, started_at: i64) -> Result<(), MirrorError> {
        let wei = self.ctx.client.balance(address).await?;
        let tx_count = self.ctx.client.transaction_count(address).await?;
        self.ctx
            .store
            .upsert_address(&Address {
                address: address.to_string(),
                balance: format_ether(wei),
                balance_value: ether_value(wei),
                last_updated: started_at,
                tx_count,
            })
            .await
    }
}

fn normalize(address: &str) -> Option<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}
