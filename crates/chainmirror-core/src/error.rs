//! Error types for the chainmirror pipeline.

use thiserror::Error;

/// Errors that can occur while mirroring.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// Node unreachable, request timed out, or the node returned an error.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("node is not reachable at {url}")]
    NotConnected { url: String },

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A unique constraint rejected the insert.
    #[error("duplicate {entity} '{key}'")]
    Duplicate { entity: &'static str, key: String },

    #[error("reorg at block {block_number} exceeded max depth {depth}")]
    ReorgDepthExceeded { block_number: u64, depth: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl MirrorError {
    /// Returns `true` for failures that a later retry may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::NotConnected { .. } | Self::Subscription(_)
        )
    }

    /// Returns `true` if a unique constraint rejected the write.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    pub fn duplicate_block(number: u64) -> Self {
        Self::Duplicate {
            entity: "block",
            key: number.to_string(),
        }
    }
}
