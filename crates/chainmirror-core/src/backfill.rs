//! Backfill sweeper: walks block ranges downward, filling gaps and
//! re-validating what is already stored.
//!
//! Already-stored blocks only get a transaction-count check, so repeated
//! sweeps over a healthy range cost one store lookup per block and no
//! network calls. After reaching the bottom of its range the sweeper starts
//! over from `[0, latest]`; it never terminates on its own.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::retry_forever;
use crate::error::MirrorError;
use crate::types::{BlockId, BlockTarget};
use crate::writer::{BlockWriter, WriteOutcome};

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub visited: u64,
    /// Missing blocks fetched and stored.
    pub fetched: u64,
    /// Stored blocks whose transaction count checked out.
    pub verified: u64,
    /// Stored blocks refetched after a count mismatch.
    pub repaired: u64,
    /// Numbers the node has no block for.
    pub missing: u64,
    /// Numbers skipped because of a store error.
    pub failed: u64,
}

/// Gap-filling sweeper over a numeric block range.
#[derive(Clone)]
pub struct BackfillSweeper {
    writer: BlockWriter,
    cancel: CancellationToken,
}

impl BackfillSweeper {
    pub fn new(writer: BlockWriter, cancel: CancellationToken) -> Self {
        Self { writer, cancel }
    }

    /// Sweep `[start, end]`, then `[0, latest]` forever, until cancelled.
    pub async fn run(&self, start: u64, end: BlockTarget) {
        let pause = self.writer.context().config.sweep_pause();
        let (mut start, mut end) = (start, end);

        loop {
            match self.sweep(start, end).await {
                Ok(stats) => info!(
                    start,
                    visited = stats.visited,
                    fetched = stats.fetched,
                    repaired = stats.repaired,
                    missing = stats.missing,
                    failed = stats.failed,
                    "backfill sweep complete"
                ),
                Err(MirrorError::Cancelled) => break,
                Err(e) => error!(error = %e, "backfill sweep aborted"),
            }

            start = 0;
            end = BlockTarget::Latest;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("backfill sweeper stopped");
    }

    /// One downward pass over `[start, end]`.
    ///
    /// `BlockTarget::Latest` is resolved once, when the pass starts.
    pub async fn sweep(&self, start: u64, end: BlockTarget) -> Result<SweepStats, MirrorError> {
        let end = self.resolve(end).await?;
        let mut stats = SweepStats::default();
        if end < start {
            return Ok(stats);
        }
        debug!(start, end, "starting backfill sweep");

        let mut number = end;
        loop {
            if self.cancel.is_cancelled() {
                return Err(MirrorError::Cancelled);
            }
            self.visit(number, &mut stats).await?;
            if number <= start {
                break;
            }
            number -= 1;
        }
        Ok(stats)
    }

    async fn resolve(&self, end: BlockTarget) -> Result<u64, MirrorError> {
        match end {
            BlockTarget::Number(n) => Ok(n),
            BlockTarget::Latest => {
                let ctx = self.writer.context();
                let client = &ctx.client;
                retry_forever(&ctx.config.backoff(), "latest block", &self.cancel, || {
                    client.latest_block_number()
                })
                .await
                .ok_or(MirrorError::Cancelled)
            }
        }
    }

    /// Check or fill a single number. Only cancellation is propagated; other
    /// failures are logged and left for the next sweep.
    async fn visit(&self, number: u64, stats: &mut SweepStats) -> Result<(), MirrorError> {
        let ctx = self.writer.context();
        stats.visited += 1;

        let stored = match ctx.store.block(number).await {
            Ok(b) => b.is_some(),
            Err(e) => {
                warn!(block = number, error = %e, "store lookup failed");
                stats.failed += 1;
                return Ok(());
            }
        };

        if stored {
            match self.writer.verify_block(number).await {
                Ok(Some(WriteOutcome::Repaired)) => stats.repaired += 1,
                Ok(Some(WriteOutcome::Vanished)) => stats.missing += 1,
                Ok(_) => stats.verified += 1,
                Err(MirrorError::Cancelled) => return Err(MirrorError::Cancelled),
                Err(e) => {
                    warn!(block = number, error = %e, "verification failed");
                    stats.failed += 1;
                }
            }
            return Ok(());
        }

        let client = &ctx.client;
        let fetched = retry_forever(&ctx.config.backoff(), "backfill fetch", &self.cancel, || {
            client.block(BlockId::Number(number), true)
        })
        .await
        .ok_or(MirrorError::Cancelled)?;

        match fetched {
            None => {
                debug!(block = number, "node has no block at this number");
                stats.missing += 1;
            }
            Some(block) => match self.writer.persist_block(block).await {
                Ok(_) => stats.fetched += 1,
                Err(MirrorError::Cancelled) => return Err(MirrorError::Cancelled),
                Err(e) => {
                    warn!(block = number, error = %e, "failed to persist backfilled block");
                    stats.failed += 1;
                }
            },
        }
        Ok(())
    }
}
