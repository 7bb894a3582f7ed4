//! chainmirror-core — keeps a local store eventually consistent with a chain.
//!
//! # Architecture
//!
//! ```text
//! LiveIngestor ──┐
//!                ├──► BlockWriter (dedupe, count check) ──► Reconciler (reorg walk)
//! BackfillSweeper┘            │
//!                             ▼
//!                         DataStore ◄── BalanceSweeper ◄── ChainClient
//! ```
//!
//! All loops share one [`MirrorContext`] (chain client, store, config).
//! Concurrent writers are kept apart only by the store's unique keys.

pub mod backfill;
pub mod backoff;
pub mod balance;
pub mod client;
pub mod config;
pub mod error;
pub mod live;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use backfill::{BackfillSweeper, SweepStats};
pub use backoff::{retry_forever, Backoff};
pub use balance::{BalancePass, BalanceSweeper};
pub use client::{ChainClient, HeadStream};
pub use config::{MirrorConfig, MirrorContext};
pub use error::MirrorError;
pub use live::LiveIngestor;
pub use reconcile::{ReconcileReport, ReconcileState, Reconciler};
pub use store::{DataStore, MemoryStore};
pub use types::{Address, Block, BlockId, BlockRef, BlockTarget, FetchedBlock, Transaction};
pub use writer::{BlockWriter, WriteOutcome};
