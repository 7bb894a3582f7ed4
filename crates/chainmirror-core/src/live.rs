//! Live ingestor: follows new-head notifications.
//!
//! Each notification is ingested on its own task, so a slow fetch or write
//! never holds up the subscription. A failed fetch is retried after a random
//! delay rather than dropped. When the subscription breaks, a one-off
//! backfill refill covers the outage window before resubscribing.

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backfill::BackfillSweeper;
use crate::backoff::retry_forever;
use crate::types::{BlockId, BlockRef, BlockTarget};
use crate::writer::BlockWriter;

/// Subscribes to new heads and hands each block to the write path.
pub struct LiveIngestor {
    writer: BlockWriter,
    backfill: BackfillSweeper,
    cancel: CancellationToken,
}

impl LiveIngestor {
    pub fn new(writer: BlockWriter, cancel: CancellationToken) -> Self {
        Self {
            backfill: BackfillSweeper::new(writer.clone(), cancel.clone()),
            writer,
            cancel,
        }
    }

    /// Run until cancelled. In-flight ingestions finish before returning.
    pub async fn run(&self) {
        let ctx = self.writer.context();
        let backoff = ctx.config.backoff();
        let mut tasks = JoinSet::new();
        let mut last_head: Option<u64> = None;

        loop {
            let subscribed = tokio::select! {
                _ = self.cancel.cancelled() => {
                    drain(&mut tasks).await;
                    return;
                }
                subscribed = ctx.client.subscribe_new_heads() => subscribed,
            };
            match subscribed {
                Ok(mut heads) => {
                    info!(chain = %ctx.config.chain, "subscribed to new heads");
                    loop {
                        tokio::select! {
                            _ = self.cancel.cancelled() => {
                                drain(&mut tasks).await;
                                return;
                            }
                            head = heads.recv() => match head {
                                Some(head) => {
                                    debug!(block = head.number, hash = %head.hash, "new head");
                                    last_head = last_head.max(Some(head.number));
                                    let writer = self.writer.clone();
                                    tasks.spawn(ingest(writer, head, self.cancel.clone()));
                                }
                                None => break,
                            },
                            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                        }
                    }
                    warn!("new-head subscription closed, refilling outage window");
                    self.spawn_refill(&mut tasks, last_head).await;
                }
                Err(e) => warn!(error = %e, "failed to subscribe to new heads"),
            }

            if !backoff.sleep(&self.cancel).await {
                drain(&mut tasks).await;
                return;
            }
        }
    }

    /// Sweep `[last seen head, latest]` so blocks announced while the
    /// subscription was down are not missed.
    async fn spawn_refill(&self, tasks: &mut JoinSet<()>, last_head: Option<u64>) {
        let ctx = self.writer.context();
        let from = match last_head {
            Some(n) => n,
            None => match ctx.store.highest_block().await {
                Ok(Some(n)) => n,
                Ok(None) => ctx.config.backfill_start,
                Err(e) => {
                    warn!(error = %e, "cannot read highest stored block, refilling from start");
                    ctx.config.backfill_start
                }
            },
        };

        let sweeper = self.backfill.clone();
        tasks.spawn(async move {
            match sweeper.sweep(from, BlockTarget::Latest).await {
                Ok(stats) => info!(from, fetched = stats.fetched, "refill complete"),
                Err(e) => warn!(from, error = %e, "refill aborted"),
            }
        });
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while tasks.join_next().await.is_some() {}
    info!("live ingestor stopped");
}

/// Fetch the announced block and persist it, retrying the fetch until it
/// succeeds or the mirror shuts down.
async fn ingest(writer: BlockWriter, head: BlockRef, cancel: CancellationToken) {
    let ctx = writer.context();
    let client = &ctx.client;
    let hash = head.hash.clone();

    let fetched = retry_forever(&ctx.config.backoff(), "live fetch", &cancel, || {
        client.block(BlockId::Hash(hash.clone()), true)
    })
    .await;

    match fetched {
        None => {}
        Some(None) => {
            debug!(block = head.number, hash = %head.hash, "head no longer known to node")
        }
        Some(Some(block)) => match writer.persist_block(block).await {
            Ok(outcome) => info!(block = head.number, %outcome, "ingested head"),
            Err(e) => warn!(block = head.number, error = %e, "failed to persist head"),
        },
    }
}
