//! Genesis allocation loading.
//!
//! Reads the `alloc` object of a geth-style `genesis.json`. Keys may be
//! given with or without the `0x` prefix and in any case.

use std::path::Path;

use serde_json::Value;

use chainmirror_core::error::MirrorError;

/// Addresses funded at genesis, normalised to lowercase `0x…`, sorted.
pub async fn load_genesis_allocation(path: &Path) -> Result<Vec<String>, MirrorError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        MirrorError::Config(format!("cannot read genesis file {}: {e}", path.display()))
    })?;
    parse_genesis_allocation(&raw)
}

pub fn parse_genesis_allocation(raw: &str) -> Result<Vec<String>, MirrorError> {
    let genesis: Value =
        serde_json::from_str(raw).map_err(|e| MirrorError::Decode(format!("genesis: {e}")))?;
    let alloc = genesis
        .get("alloc")
        .and_then(Value::as_object)
        .ok_or_else(|| MirrorError::Decode("genesis: missing 'alloc' object".into()))?;

    let mut addresses: Vec<String> = alloc
        .keys()
        .map(|k| {
            let k = k.trim().to_ascii_lowercase();
            if k.starts_with("0x") {
                k
            } else {
                format!("0x{k}")
            }
        })
        .collect();
    addresses.sort();
    addresses.dedup();
    Ok(addresses)
}
