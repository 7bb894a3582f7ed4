//! Test fixtures: a scripted chain client and block builders.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ChainClient, HeadStream};
use crate::config::{MirrorConfig, MirrorContext};
use crate::error::MirrorError;
use crate::store::MemoryStore;
use crate::types::{Block, BlockId, BlockRef, FetchedBlock, Transaction};
use crate::writer::BlockWriter;

pub fn block(number: u64, hash: &str, parent: &str, tx_count: u32) -> Block {
    Block {
        number,
        hash: hash.into(),
        parent_hash: parent.into(),
        miner: format!("0xminer{}", number % 2),
        difficulty: "131072".into(),
        gas_used: 21_000 * u64::from(tx_count),
        gas_limit: 30_000_000,
        timestamp: 1_000 + number as i64 * 12,
        tx_count,
        uncles: vec![],
    }
}

pub fn tx(hash: &str, block_number: u64, from: &str, to: Option<&str>) -> Transaction {
    Transaction {
        hash: hash.into(),
        block_number,
        nonce: 0,
        from: from.into(),
        to: to.map(String::from),
        value: "1000000000000000000".into(),
        gas: 21_000,
        gas_price: "1000000000".into(),
        timestamp: 1_000 + block_number as i64 * 12,
        input: "0x".into(),
    }
}

/// A block with `tx_count` transactions whose hashes are `0xtx{tag}{n}_{i}`.
pub fn fetched(number: u64, hash: &str, parent: &str, tx_count: u32, tag: &str) -> FetchedBlock {
    let txs = (0..tx_count)
        .map(|i| {
            let to = format!("0xto{number}_{i}");
            tx(
                &format!("0xtx{tag}{number}_{i}"),
                number,
                &format!("0xfrom{number}"),
                Some(to.as_str()),
            )
        })
        .collect();
    FetchedBlock::new(block(number, hash, parent, tx_count), txs)
}

/// A linear chain `0..len` with hashes `0x{tag}{n}` and `n % 4` transactions each.
pub fn chain(len: u64, tag: &str) -> Vec<FetchedBlock> {
    (0..len)
        .map(|n| {
            let parent = if n == 0 {
                "0x0".to_string()
            } else {
                format!("0x{tag}{}", n - 1)
            };
            fetched(n, &format!("0x{tag}{n}"), &parent, (n % 4) as u32, tag)
        })
        .collect()
}

pub fn test_config() -> MirrorConfig {
    MirrorConfig {
        retry_min_delay_ms: 1,
        retry_max_delay_ms: 1,
        sweep_pause_ms: 1,
        ..MirrorConfig::default()
    }
}

pub fn context(mock: MockChain) -> (MirrorContext, Arc<MemoryStore>, Arc<MockChain>) {
    let store = Arc::new(MemoryStore::new());
    let mock = Arc::new(mock);
    let ctx = MirrorContext::new(mock.clone(), store.clone(), test_config());
    (ctx, store, mock)
}

pub fn harness(mock: MockChain) -> (BlockWriter, Arc<MemoryStore>, Arc<MockChain>) {
    let (ctx, store, mock) = context(mock);
    (BlockWriter::new(ctx, CancellationToken::new()), store, mock)
}

/// Poll `check` until it returns `true` or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[derive(Default)]
struct MockState {
    blocks: BTreeMap<u64, FetchedBlock>,
    failures: HashMap<u64, u32>,
    fetches: HashMap<u64, u32>,
    balances: HashMap<String, u128>,
    failing_balances: HashSet<String>,
    balance_calls: Vec<String>,
    genesis: Vec<String>,
    heads: Option<mpsc::UnboundedSender<BlockRef>>,
    subscriptions: u32,
    hang_subscribe: bool,
}

/// Scripted `ChainClient` serving a fixed canonical chain.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(blocks: Vec<FetchedBlock>) -> Self {
        let mock = Self::default();
        for b in blocks {
            mock.set_block(b);
        }
        mock
    }

    /// Replace the canonical block at its number.
    pub fn set_block(&self, block: FetchedBlock) {
        self.state.lock().unwrap().blocks.insert(block.number(), block);
    }

    /// Fail the next `times` fetches of block `number`.
    pub fn fail_next(&self, number: u64, times: u32) {
        self.state.lock().unwrap().failures.insert(number, times);
    }

    /// Fetch attempts (failed ones included) for block `number`.
    pub fn fetches(&self, number: u64) -> u32 {
        self.state.lock().unwrap().fetches.get(&number).copied().unwrap_or(0)
    }

    pub fn set_balance(&self, address: &str, wei: u128) {
        self.state.lock().unwrap().balances.insert(address.into(), wei);
    }

    pub fn fail_balance(&self, address: &str) {
        self.state.lock().unwrap().failing_balances.insert(address.into());
    }

    pub fn clear_balance_failure(&self, address: &str) {
        self.state.lock().unwrap().failing_balances.remove(address);
    }

    pub fn balance_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().balance_calls.clone()
    }

    pub fn set_genesis(&self, addresses: &[&str]) {
        self.state.lock().unwrap().genesis = addresses.iter().map(|a| a.to_string()).collect();
    }

    /// Emit a new-head notification on the open subscription.
    pub fn push_head(&self, head: BlockRef) -> bool {
        match &self.state.lock().unwrap().heads {
            Some(tx) => tx.send(head).is_ok(),
            None => false,
        }
    }

    /// Drop the open subscription, closing its stream.
    pub fn close_heads(&self) {
        self.state.lock().unwrap().heads = None;
    }

    /// Make every later subscribe call wait forever.
    pub fn hang_subscriptions(&self) {
        self.state.lock().unwrap().hang_subscribe = true;
    }

    pub fn subscriptions(&self) -> u32 {
        self.state.lock().unwrap().subscriptions
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn latest_block_number(&self) -> Result<u64, MirrorError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }

    async fn block(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<Option<FetchedBlock>, MirrorError> {
        let mut s = self.state.lock().unwrap();
        let found = match &id {
            BlockId::Number(n) => s.blocks.get(n).cloned(),
            BlockId::Hash(h) => s.blocks.values().find(|b| &b.block.hash == h).cloned(),
            BlockId::Latest => s.blocks.values().next_back().cloned(),
        };
        let Some(mut found) = found else {
            return Ok(None);
        };

        let number = found.number();
        *s.fetches.entry(number).or_default() += 1;
        if let Some(left) = s.failures.get_mut(&number) {
            if *left > 0 {
                *left -= 1;
                return Err(MirrorError::Rpc(format!("scripted failure for {id}")));
            }
        }
        if !include_transactions {
            found.transactions.clear();
        }
        Ok(Some(found))
    }

    async fn subscribe_new_heads(&self) -> Result<HeadStream, MirrorError> {
        let hang = self.state.lock().unwrap().hang_subscribe;
        if hang {
            std::future::pending::<()>().await;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut s = self.state.lock().unwrap();
        s.heads = Some(tx);
        s.subscriptions += 1;
        Ok(rx)
    }

    async fn balance(&self, address: &str) -> Result<u128, MirrorError> {
        let mut s = self.state.lock().unwrap();
        s.balance_calls.push(address.to_string());
        if s.failing_balances.contains(address) {
            return Err(MirrorError::Rpc(format!("balance of {address} unavailable")));
        }
        Ok(s.balances.get(address).copied().unwrap_or(0))
    }

    async fn transaction_count(&self, _address: &str) -> Result<u64, MirrorError> {
        Ok(1)
    }

    async fn genesis_allocation(&self) -> Result<Vec<String>, MirrorError> {
        Ok(self.state.lock().unwrap().genesis.clone())
    }

    async fn is_connected(&self) -> bool {
        true
    }
}
