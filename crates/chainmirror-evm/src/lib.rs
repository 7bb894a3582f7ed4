//! chainmirror-evm — `ChainClient` for EVM JSON-RPC nodes.
//!
//! - [`http`] — request/response calls over `reqwest`
//! - [`ws`] — `eth_subscribe("newHeads")` over `tokio-tungstenite`
//! - [`parse`] — node JSON → mirror model
//! - [`genesis`] — genesis allocation from a `genesis.json`
//! - [`builder`] — fluent `MirrorConfig` builder

pub mod builder;
pub mod client;
pub mod genesis;
pub mod http;
pub mod parse;
pub mod rpc;
pub mod ws;

pub use builder::MirrorBuilder;
pub use client::{EvmChainClient, EvmClientConfig};
