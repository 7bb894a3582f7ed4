//! Shared types for the mirror: blocks, transactions, addresses.

use serde::{Deserialize, Serialize};

// ─── Block ────────────────────────────────────────────────────────────────────

/// A mirrored block header.
///
/// `number` is the primary key in every store. Blocks are never mutated in
/// place: a divergent row is deleted together with its transactions and
/// re-inserted from a fresh fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Address credited with the block reward.
    pub miner: String,
    /// Difficulty as a decimal string (exceeds `u64` on some chains).
    pub difficulty: String,
    pub gas_used: u64,
    pub gas_limit: u64,
    /// Chain time of the block (seconds since epoch).
    pub timestamp: i64,
    /// Number of transactions the block declares.
    pub tx_count: u32,
    /// Uncle (ommer) hashes.
    pub uncles: Vec<String>,
}

impl Block {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &Block) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }

    /// Short reference used in logs and head notifications.
    pub fn reference(&self) -> BlockRef {
        BlockRef {
            number: self.number,
            hash: self.hash.clone(),
        }
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A mirrored transaction. Keyed by `(hash, block_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub block_number: u64,
    pub nonce: u64,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Transferred value in wei, decimal string.
    pub value: String,
    pub gas: u64,
    /// Gas price in wei, decimal string.
    pub gas_price: String,
    /// Inherited from the containing block.
    pub timestamp: i64,
    /// Call data (`0x…`).
    pub input: String,
}

/// A block together with its transactions, as returned by a full fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

impl FetchedBlock {
    pub fn new(block: Block, transactions: Vec<Transaction>) -> Self {
        Self {
            block,
            transactions,
        }
    }

    pub fn number(&self) -> u64 {
        self.block.number
    }
}

// ─── Address ──────────────────────────────────────────────────────────────────

/// Balance record for an address observed on chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Lowercase `0x…` address.
    pub address: String,
    /// Balance in ether for display (e.g. `"1.5"`).
    pub balance: String,
    /// Balance in ether as a float, for sorting.
    pub balance_value: f64,
    /// Start time of the sweep pass that wrote this record.
    pub last_updated: i64,
    /// Number of transactions sent from this address (account nonce).
    pub tx_count: u64,
}

// ─── Block references ─────────────────────────────────────────────────────────

/// Number + hash of a block, as carried by a new-head notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

/// Selects a block in a `ChainClient::block` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    Number(u64),
    Hash(String),
    Latest,
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "#{n}"),
            Self::Hash(h) => write!(f, "{h}"),
            Self::Latest => write!(f, "latest"),
        }
    }
}

/// Upper bound of a backfill interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockTarget {
    Number(u64),
    /// Resolved to the node's head once, when a sweep starts.
    Latest,
}

// ─── Balance formatting ───────────────────────────────────────────────────────

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Format a wei amount as an ether string with trailing zeros trimmed.
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let frac = wei % WEI_PER_ETHER;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:018}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}

/// Ether value of a wei amount as `f64`.
pub fn ether_value(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETHER as f64
}

// ─── Tests ────────────────────────────────────────────────────────────────────
