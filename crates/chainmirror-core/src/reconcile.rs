//! Reorg reconciliation. Heals divergence between the mirror and the
//! canonical chain after a fork resolution.
//!
//! Rooted at a freshly written block `B`, the reconciler walks backward:
//!
//! ```text
//! CHECKING ──(parent at B-1 absent)────────────► DONE
//!    │ ────(stored parent hash == B.parent_hash)─► STABLE ─► DONE
//!    └─────(mismatch)──► PURGING: refetch the parent by number
//!         ├─(node agrees with the stored parent)─► delete B, store the
//!         │                   canonical block at B's number ──► CHECKING
//!         └─(otherwise)─► delete parent, store the refetched one,
//!                             B := parent ──► CHECKING
//! ```
//!
//! The first branch covers a stale child, e.g. an orphaned head fetched by
//! hash, sitting on top of a canonical parent.
//!
//! The walk is bounded by `max_reorg_depth`; exceeding it raises an alert
//! and leaves the rest of the range to the backfill sweeper.

use tracing::{debug, error, warn};

use crate::error::MirrorError;
use crate::types::Block;
use crate::writer::BlockWriter;

/// States of a single reconciliation walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileState {
    Checking,
    Stable,
    /// Holds the stored ancestor that diverges from the canonical chain.
    Purging(Block),
    Done,
}

/// Summary of one reconciliation walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Number of the block the walk was rooted at.
    pub root: u64,
    /// Numbers of the purged blocks, in purge order.
    pub purged: Vec<u64>,
}

impl ReconcileReport {
    pub fn depth(&self) -> u64 {
        self.purged.len() as u64
    }
}

/// Walks ancestors of a stored block, purging and refetching divergent ones.
pub struct Reconciler<'a> {
    writer: &'a BlockWriter,
}

impl<'a> Reconciler<'a> {
    pub fn new(writer: &'a BlockWriter) -> Self {
        Self { writer }
    }

    pub async fn reconcile(&self, root: &Block) -> Result<ReconcileReport, MirrorError> {
        let store = &self.writer.context().store;
        let max_depth = self.writer.max_reorg_depth();
        let mut report = ReconcileReport {
            root: root.number,
            purged: vec![],
        };
        let mut child = root.clone();
        let mut state = ReconcileState::Checking;

        loop {
            state = match state {
                ReconcileState::Checking => {
                    if child.number == 0 {
                        ReconcileState::Done
                    } else {
                        match store.block(child.number - 1).await? {
                            None => ReconcileState::Done,
                            Some(parent) if parent.hash == child.parent_hash => {
                                ReconcileState::Stable
                            }
                            Some(parent) => ReconcileState::Purging(parent),
                        }
                    }
                }
                ReconcileState::Stable => ReconcileState::Done,
                ReconcileState::Purging(stale) => {
                    if report.depth() >= max_depth {
                        error!(
                            root = report.root,
                            at = stale.number,
                            max_depth,
                            "reorg deeper than max depth, stopping reconciliation"
                        );
                        return Err(MirrorError::ReorgDepthExceeded {
                            block_number: stale.number,
                            depth: max_depth,
                        });
                    }

                    let canonical = self.writer.refetch(stale.number).await?;
                    let parent_is_canonical = canonical
                        .as_ref()
                        .is_some_and(|c| c.block.hash == stale.hash);
                    let stored = if parent_is_canonical {
                        warn!(
                            block = child.number,
                            stored = %child.hash,
                            parent = %stale.hash,
                            "stored block does not extend its canonical parent, replacing it"
                        );
                        self.writer.purge(child.number).await?;
                        report.purged.push(child.number);
                        self.replace(child.number).await?
                    } else {
                        warn!(
                            block = stale.number,
                            stored = %stale.hash,
                            expected = %child.parent_hash,
                            "stored ancestor diverges from canonical chain"
                        );
                        self.writer.purge(stale.number).await?;
                        report.purged.push(stale.number);
                        match canonical {
                            None => None,
                            Some(fetched) => self.writer.store_block(fetched).await?.1,
                        }
                    };
                    match stored {
                        Some(block) => {
                            child = block;
                            ReconcileState::Checking
                        }
                        None => ReconcileState::Done,
                    }
                }
                ReconcileState::Done => {
                    if !report.purged.is_empty() {
                        debug!(
                            root = report.root,
                            depth = report.depth(),
                            "reconciliation complete"
                        );
                    }
                    return Ok(report);
                }
            };
        }
    }

    /// Refetch the canonical block at `number` and store it.
    async fn replace(&self, number: u64) -> Result<Option<Block>, MirrorError> {
        match self.writer.refetch(number).await? {
            Some(fetched) => Ok(self.writer.store_block(fetched).await?.1),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DataStore;
    use crate::testing::{fetched, harness, MockChain};
    use crate::types::FetchedBlock;
    use crate::writer::WriteOutcome;

    /// B0 ← B1 ← B2 (stale) and B0 ← B1' ← B2' (canonical).
    fn forked() -> (Vec<FetchedBlock>, Vec<FetchedBlock>) {
        let b0 = fetched(0, "0xg0", "0x0", 0, "g");
        let stale = vec![
            b0.clone(),
            fetched(1, "0xa1", "0xg0", 2, "a"),
            fetched(2, "0xa2", "0xa1", 1, "a"),
        ];
        let canonical = vec![
            b0,
            fetched(1, "0xb1", "0xg0", 1, "b"),
            fetched(2, "0xb2", "0xb1", 3, "b"),
        ];
        (stale, canonical)
    }

    #[tokio::test]
    async fn reorg_converges_to_canonical_chain() {
        let (stale, canonical) = forked();
        let (writer, store, _) = harness(MockChain::new(canonical.clone()));
        for b in &stale {
            writer.persist_block(b.clone()).await.unwrap();
        }

        let outcome = writer.persist_block(canonical[2].clone()).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Replaced);

        for b in &canonical {
            let stored = store.block(b.number()).await.unwrap().unwrap();
            assert_eq!(stored.hash, b.block.hash);
            assert_eq!(
                store.count_transactions(b.number()).await.unwrap(),
                b.transactions.len() as u64
            );
        }
        assert_eq!(store.block_count().await.unwrap(), 3);
        assert!(store.block_by_hash("0xa1").await.unwrap().is_none());
        assert!(store.block_by_hash("0xa2").await.unwrap().is_none());
        for b in &stale[1..] {
            for tx in &b.transactions {
                assert!(store.transaction(&tx.hash).await.unwrap().is_none());
            }
        }
    }

    #[tokio::test]
    async fn stable_parent_stops_walk() {
        let (_, canonical) = forked();
        let (writer, store, mock) = harness(MockChain::new(canonical.clone()));
        writer.persist_block(canonical[1].clone()).await.unwrap();
        writer.persist_block(canonical[2].clone()).await.unwrap();

        let report = Reconciler::new(&writer)
            .reconcile(&canonical[2].block)
            .await
            .unwrap();
        assert!(report.purged.is_empty());
        assert_eq!(mock.fetches(1), 0);
        assert_eq!(store.block_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_parent_is_left_to_backfill() {
        let (_, canonical) = forked();
        let (writer, store, mock) = harness(MockChain::new(canonical.clone()));

        writer.persist_block(canonical[2].clone()).await.unwrap();
        assert!(store.block(1).await.unwrap().is_none());
        assert_eq!(mock.fetches(1), 0);
    }

    #[tokio::test]
    async fn orphaned_child_is_replaced_not_its_parent() {
        let (_, canonical) = forked();
        let (writer, store, mock) = harness(MockChain::new(canonical.clone()));
        writer.persist_block(canonical[0].clone()).await.unwrap();
        writer.persist_block(canonical[1].clone()).await.unwrap();

        // A head that lost a fork race, built on a sibling of #1
        let orphan = fetched(2, "0xo2", "0xo1", 1, "o");
        let report = {
            let (_, stored) = writer.store_block(orphan).await.unwrap();
            Reconciler::new(&writer).reconcile(&stored.unwrap()).await.unwrap()
        };

        assert_eq!(report.purged, vec![2]);
        assert_eq!(store.block(1).await.unwrap().unwrap().hash, "0xb1");
        assert_eq!(store.block(2).await.unwrap().unwrap().hash, "0xb2");
        assert_eq!(store.count_transactions(2).await.unwrap(), 3);
        assert!(store.transaction("0xtxo2_0").await.unwrap().is_none());
        assert_eq!(mock.fetches(1), 1);
    }

    #[tokio::test]
    async fn depth_cap_raises_alert() {
        let stale: Vec<_> = (0..6)
            .map(|n| {
                let parent = if n == 0 { "0x0".to_string() } else { format!("0xs{}", n - 1) };
                fetched(n, &format!("0xs{n}"), &parent, 0, "s")
            })
            .collect();
        let canonical: Vec<_> = (0..6)
            .map(|n| {
                let parent = if n == 0 { "0x0".to_string() } else { format!("0xc{}", n - 1) };
                fetched(n, &format!("0xc{n}"), &parent, 0, "c")
            })
            .collect();

        let mock = MockChain::new(canonical.clone());
        let (writer, _, _) = harness(mock);
        for b in &stale {
            writer.persist_block(b.clone()).await.unwrap();
        }

        let writer = writer.with_max_reorg_depth(2);
        let err = writer.persist_block(canonical[5].clone()).await.unwrap_err();
        assert!(matches!(err, MirrorError::ReorgDepthExceeded { depth: 2, .. }));
    }
}
