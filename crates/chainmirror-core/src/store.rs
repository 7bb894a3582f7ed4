//! The `DataStore` trait and the in-memory backend.
//!
//! The store's unique keys are the only synchronization primitive between
//! the mirror's loops:
//! - blocks are unique by `number`
//! - transactions are unique by `(hash, block_number)`
//! - addresses are unique by `address`
//!
//! A losing concurrent writer sees `MirrorError::Duplicate` and reconciles.
//!
//! Every inserted block and transaction also appends its miner, sender and
//! recipient to an observation journal. Journal entries carry a strictly
//! increasing sequence number, which the balance sweeper uses as its cursor.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::error::MirrorError;
use crate::types::{Address, Block, Transaction};

/// Persistence for mirrored blocks, transactions and addresses.
///
/// Implementations include `MemoryStore` and `SqliteStore`.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    // ── blocks ────────────────────────────────────────────────────────────

    /// Insert a block and journal its miner. Fails with
    /// `MirrorError::Duplicate` if a block with the same number is already
    /// stored.
    async fn insert_block(&self, block: &Block) -> Result<(), MirrorError>;

    async fn block(&self, number: u64) -> Result<Option<Block>, MirrorError>;

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, MirrorError>;

    /// Delete the block row at `number`. Returns `true` if a row was removed.
    async fn delete_block(&self, number: u64) -> Result<bool, MirrorError>;

    /// Highest stored block number.
    async fn highest_block(&self) -> Result<Option<u64>, MirrorError>;

    async fn block_count(&self) -> Result<u64, MirrorError>;

    // ── transactions ──────────────────────────────────────────────────────

    /// Insert a batch of transactions, skipping rows whose
    /// `(hash, block_number)` already exists, and journal the participants
    /// of the inserted rows. Returns the rows inserted.
    async fn insert_transactions(&self, txs: &[Transaction]) -> Result<u64, MirrorError>;

    /// First stored transaction with this hash.
    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, MirrorError>;

    async fn transactions_in_block(&self, block_number: u64)
        -> Result<Vec<Transaction>, MirrorError>;

    async fn count_transactions(&self, block_number: u64) -> Result<u64, MirrorError>;

    /// Delete every transaction of `block_number`. Returns the rows removed.
    async fn delete_transactions(&self, block_number: u64) -> Result<u64, MirrorError>;

    // ── observation journal ───────────────────────────────────────────────

    /// Sequence number of the newest journal entry ever written (0 if none).
    /// Never decreases, pruning included.
    async fn observation_cursor(&self) -> Result<u64, MirrorError>;

    /// Distinct addresses journaled after `cursor`.
    async fn addresses_observed_since(&self, cursor: u64)
        -> Result<BTreeSet<String>, MirrorError>;

    /// Drop journal entries up to and including `cursor`. Returns the
    /// entries removed.
    async fn prune_observations(&self, cursor: u64) -> Result<u64, MirrorError>;

    // ── addresses ─────────────────────────────────────────────────────────

    async fn upsert_address(&self, address: &Address) -> Result<(), MirrorError>;

    async fn address(&self, address: &str) -> Result<Option<Address>, MirrorError>;
}

// ─── In-memory store ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<u64, Block>,
    transactions: BTreeMap<(u64, String), Transaction>,
    addresses: HashMap<String, Address>,
    observations: BTreeMap<u64, String>,
    last_observation: u64,
}

impl Tables {
    fn observe(&mut self, address: &str) {
        self.last_observation += 1;
        let seq = self.last_observation;
        self.observations.insert(seq, address.to_string());
    }
}

/// In-memory data store for tests and ephemeral mirrors.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, MirrorError> {
        self.tables
            .lock()
            .map_err(|_| MirrorError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn insert_block(&self, block: &Block) -> Result<(), MirrorError> {
        let mut t = self.tables()?;
        if t.blocks.contains_key(&block.number) {
            return Err(MirrorError::duplicate_block(block.number));
        }
        t.blocks.insert(block.number, block.clone());
        t.observe(&block.miner);
        Ok(())
    }

    async fn block(&self, number: u64) -> Result<Option<Block>, MirrorError> {
        Ok(self.tables()?.blocks.get(&number).cloned())
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, MirrorError> {
        Ok(self
            .tables()?
            .blocks
            .values()
            .find(|b| b.hash == hash)
            .cloned())
    }

    async fn delete_block(&self, number: u64) -> Result<bool, MirrorError> {
        Ok(self.tables()?.blocks.remove(&number).is_some())
    }

    async fn highest_block(&self) -> Result<Option<u64>, MirrorError> {
        Ok(self.tables()?.blocks.keys().next_back().copied())
    }

    async fn block_count(&self) -> Result<u64, MirrorError> {
        Ok(self.tables()?.blocks.len() as u64)
    }

    async fn insert_transactions(&self, txs: &[Transaction]) -> Result<u64, MirrorError> {
        let mut t = self.tables()?;
        let mut inserted = 0;
        for tx in txs {
            let key = (tx.block_number, tx.hash.clone());
            if t.transactions.contains_key(&key) {
                continue;
            }
            t.transactions.insert(key, tx.clone());
            t.observe(&tx.from);
            if let Some(to) = &tx.to {
                t.observe(to);
            }
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, MirrorError> {
        Ok(self
            .tables()?
            .transactions
            .values()
            .find(|tx| tx.hash == hash)
            .cloned())
    }

    async fn transactions_in_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<Transaction>, MirrorError> {
        Ok(self
            .tables()?
            .transactions
            .values()
            .filter(|tx| tx.block_number == block_number)
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, block_number: u64) -> Result<u64, MirrorError> {
        Ok(self
            .tables()?
            .transactions
            .keys()
            .filter(|(n, _)| *n == block_number)
            .count() as u64)
    }

    async fn delete_transactions(&self, block_number: u64) -> Result<u64, MirrorError> {
        let mut t = self.tables()?;
        let before = t.transactions.len();
        t.transactions.retain(|(n, _), _| *n != block_number);
        Ok((before - t.transactions.len()) as u64)
    }

    async fn observation_cursor(&self) -> Result<u64, MirrorError> {
        Ok(self.tables()?.last_observation)
    }

    async fn addresses_observed_since(
        &self,
        cursor: u64,
    ) -> Result<BTreeSet<String>, MirrorError> {
        let t = self.tables()?;
        let after = cursor.saturating_add(1);
        Ok(t.observations.range(after..).map(|(_, a)| a.clone()).collect())
    }

    async fn prune_observations(&self, cursor: u64) -> Result<u64, MirrorError> {
        let mut t = self.tables()?;
        let kept = t.observations.split_off(&cursor.saturating_add(1));
        let removed = t.observations.len() as u64;
        t.observations = kept;
        Ok(removed)
    }

    async fn upsert_address(&self, address: &Address) -> Result<(), MirrorError> {
        self.tables()?
            .addresses
            .insert(address.address.clone(), address.clone());
        Ok(())
    }

    async fn address(&self, address: &str) -> Result<Option<Address>, MirrorError> {
        Ok(self.tables()?.addresses.get(address).cloned())
    }
}
