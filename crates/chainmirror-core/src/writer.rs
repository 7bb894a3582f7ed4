//! The write path, the only code that creates or deletes blocks and
//! transactions.
//!
//! Decision table for `persist_block` when inserting block `N`:
//!
//! | insert result | stored block at `N`   | action                               |
//! |---------------|-----------------------|--------------------------------------|
//! | ok            | -                     | insert txs, verify count             |
//! | duplicate     | same hash             | no-op                                |
//! | duplicate     | different hash        | purge `N`, insert the fresh fetch    |
//! | duplicate     | gone (racing purge)   | insert again                         |
//!
//! A count mismatch after insert purges `N` and refetches it. Every path
//! that leaves a block stored ends with a reorg reconciliation rooted at it.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MirrorContext;
use crate::error::MirrorError;
use crate::reconcile::Reconciler;
use crate::types::{Block, BlockId, FetchedBlock};

/// What `persist_block` did with a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored for the first time.
    Inserted,
    /// The exact block (same hash) was already stored.
    AlreadyPresent,
    /// A different block at the same number was purged and replaced.
    Replaced,
    /// The stored transaction count was wrong; the block was refetched.
    Repaired,
    /// A refetch found no block at this number any more.
    Vanished,
}

impl std::fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::AlreadyPresent => write!(f, "already-present"),
            Self::Replaced => write!(f, "replaced"),
            Self::Repaired => write!(f, "repaired"),
            Self::Vanished => write!(f, "vanished"),
        }
    }
}

/// Persists fetched blocks and keeps the stored chain consistent.
#[derive(Clone)]
pub struct BlockWriter {
    ctx: MirrorContext,
    cancel: CancellationToken,
}

impl BlockWriter {
    pub fn new(ctx: MirrorContext, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    pub fn context(&self) -> &MirrorContext {
        &self.ctx
    }

    /// Store a block and its transactions, then reconcile its ancestors.
    pub async fn persist_block(&self, fetched: FetchedBlock) -> Result<WriteOutcome, MirrorError> {
        let (outcome, stored) = self.store_block(fetched).await?;
        if let Some(block) = stored {
            Reconciler::new(self).reconcile(&block).await?;
        }
        Ok(outcome)
    }

    /// Check the transaction count of an already-stored block and repair it
    /// if it diverges. Returns `None` if nothing is stored at `number`.
    pub async fn verify_block(&self, number: u64) -> Result<Option<WriteOutcome>, MirrorError> {
        let Some(block) = self.ctx.store.block(number).await? else {
            return Ok(None);
        };
        let stored = self.ctx.store.count_transactions(number).await?;
        if stored == u64::from(block.tx_count) {
            return Ok(Some(WriteOutcome::AlreadyPresent));
        }

        warn!(
            block = number,
            declared = block.tx_count,
            stored,
            "transaction count mismatch on stored block"
        );
        self.purge(number).await?;
        match self.refetch(number).await? {
            Some(fetched) => {
                self.persist_block(fetched).await?;
                Ok(Some(WriteOutcome::Repaired))
            }
            None => Ok(Some(WriteOutcome::Vanished)),
        }
    }

    /// Insert-or-reconcile a single block, without the ancestor walk.
    ///
    /// Returns the outcome and, when a block is left stored at that number,
    /// the stored block. Every purge is followed by another insert;
    /// `max_write_attempts` bounds how many purges and racing retries a
    /// single call may perform.
    pub(crate) async fn store_block(
        &self,
        mut fetched: FetchedBlock,
    ) -> Result<(WriteOutcome, Option<Block>), MirrorError> {
        let store = &self.ctx.store;
        let number = fetched.number();
        let max_retries = self.ctx.config.max_write_attempts.max(1);
        let mut retries = 0;
        let mut outcome = WriteOutcome::Inserted;

        loop {
            match store.insert_block(&fetched.block).await {
                Ok(()) => {
                    let inserted = store.insert_transactions(&fetched.transactions).await?;
                    let stored = store.count_transactions(number).await?;
                    let declared = u64::from(fetched.block.tx_count);
                    if stored == declared {
                        debug!(
                            block = number,
                            hash = %fetched.block.hash,
                            txs = inserted,
                            %outcome,
                            "block stored"
                        );
                        return Ok((outcome, Some(fetched.block)));
                    }

                    warn!(
                        block = number,
                        declared,
                        stored,
                        retries,
                        "transaction count mismatch after insert"
                    );
                    // left stored: a later verify pass repairs it
                    if retries >= max_retries {
                        return Err(self.contended(number, max_retries));
                    }
                    retries += 1;
                    self.purge(number).await?;
                    match self.refetch(number).await? {
                        Some(fresh) => {
                            fetched = fresh;
                            outcome = WriteOutcome::Repaired;
                        }
                        None => return Ok((WriteOutcome::Vanished, None)),
                    }
                }
                Err(e) if e.is_duplicate() => match store.block(number).await? {
                    Some(existing) if existing.hash == fetched.block.hash => {
                        debug!(block = number, hash = %existing.hash, "block already stored");
                        return Ok((WriteOutcome::AlreadyPresent, Some(existing)));
                    }
                    Some(existing) => {
                        if retries >= max_retries {
                            return Err(self.contended(number, max_retries));
                        }
                        retries += 1;
                        info!(
                            block = number,
                            stored = %existing.hash,
                            fetched = %fetched.block.hash,
                            "replacing divergent block"
                        );
                        self.purge(number).await?;
                        outcome = WriteOutcome::Replaced;
                    }
                    None => {
                        if retries >= max_retries {
                            return Err(self.contended(number, max_retries));
                        }
                        retries += 1;
                        debug!(block = number, retries, "stored block vanished during insert");
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn contended(&self, number: u64, retries: u32) -> MirrorError {
        MirrorError::Storage(format!("block {number} still contended after {retries} retries"))
    }

    /// Delete a block and its transactions. Transactions go first so an
    /// interrupted purge leaves a count mismatch the writer can detect.
    pub(crate) async fn purge(&self, number: u64) -> Result<(), MirrorError> {
        let txs = self.ctx.store.delete_transactions(number).await?;
        let removed = self.ctx.store.delete_block(number).await?;
        debug!(block = number, txs, removed, "purged block");
        Ok(())
    }

    /// Fetch a block by number, retrying until the node answers.
    pub(crate) async fn refetch(&self, number: u64) -> Result<Option<FetchedBlock>, MirrorError> {
        let client = &self.ctx.client;
        crate::backoff::retry_forever(&self.ctx.config.backoff(), "refetch", &self.cancel, || {
            client.block(BlockId::Number(number), true)
        })
        .await
        .ok_or(MirrorError::Cancelled)
    }

    pub(crate) fn max_reorg_depth(&self) -> u64 {
        self.ctx.config.max_reorg_depth
    }

    #[cfg(test)]
    pub(crate) fn with_max_reorg_depth(mut self, depth: u64) -> Self {
        self.ctx.config.max_reorg_depth = depth;
        self
    }
}
