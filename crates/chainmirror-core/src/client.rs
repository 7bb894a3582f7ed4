//! The `ChainClient` trait: everything the mirror needs from a node.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MirrorError;
use crate::types::{BlockId, BlockRef, FetchedBlock};

/// Stream of new-head notifications. The channel closes when the
/// underlying subscription breaks.
pub type HeadStream = mpsc::UnboundedReceiver<BlockRef>;

/// RPC access to a node.
///
/// Implementations are stateless from the mirror's point of view and are
/// shared across all loops as `Arc<dyn ChainClient>`.
///
/// Every call may fail with a transient error (`MirrorError::is_transient`).
/// A `None` result is a valid terminal answer (e.g. an unmined number).
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Number of the node's current head.
    async fn latest_block_number(&self) -> Result<u64, MirrorError>;

    /// Fetch a block, optionally with its full transaction list.
    async fn block(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<Option<FetchedBlock>, MirrorError>;

    /// Subscribe to new-head notifications.
    async fn subscribe_new_heads(&self) -> Result<HeadStream, MirrorError>;

    /// Current balance of `address` in wei.
    async fn balance(&self, address: &str) -> Result<u128, MirrorError>;

    /// Number of transactions sent from `address`.
    async fn transaction_count(&self, address: &str) -> Result<u64, MirrorError>;

    /// Addresses funded in the genesis block.
    async fn genesis_allocation(&self) -> Result<Vec<String>, MirrorError>;

    /// Returns `true` if the node answers requests.
    async fn is_connected(&self) -> bool;
}
