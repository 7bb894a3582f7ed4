//! Conversion of node JSON into the mirror's model.
//!
//! Quantities arrive as `0x`-prefixed hex. Values that can exceed `u64`
//! (difficulty, wei amounts) are stored as decimal strings.

use serde_json::Value;

use chainmirror_core::error::MirrorError;
use chainmirror_core::types::{Block, BlockRef, FetchedBlock, Transaction};

/// Parse a hex quantity (with or without `0x`) to `u64`.
pub fn parse_hex_u64(s: &str) -> Result<u64, MirrorError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| MirrorError::Decode(format!("invalid hex quantity '{s}': {e}")))
}

/// Parse a hex quantity (with or without `0x`) to `u128`.
pub fn parse_hex_u128(s: &str) -> Result<u128, MirrorError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| MirrorError::Decode(format!("invalid hex quantity '{s}': {e}")))
}

fn field<'a>(v: &'a Value, key: &str) -> Result<&'a str, MirrorError> {
    v[key]
        .as_str()
        .ok_or_else(|| MirrorError::Decode(format!("missing field '{key}'")))
}

fn quantity(v: &Value, key: &str) -> Result<u64, MirrorError> {
    parse_hex_u64(field(v, key)?)
}

/// Hex quantity rendered as a decimal string.
fn decimal(v: &Value, key: &str) -> Result<String, MirrorError> {
    Ok(parse_hex_u128(field(v, key)?)?.to_string())
}

/// Convert an `eth_getBlockBy*` result into a block and its transactions.
///
/// With hash-only transaction lists the transaction vector is empty, but
/// `tx_count` still reflects the block's declared count.
pub fn block_from_json(v: &Value) -> Result<FetchedBlock, MirrorError> {
    let txs = v["transactions"].as_array().map(Vec::as_slice).unwrap_or(&[]);
    let uncles = v["uncles"]
        .as_array()
        .map(|a| a.iter().filter_map(|u| u.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let block = Block {
        number: quantity(v, "number")?,
        hash: field(v, "hash")?.to_string(),
        parent_hash: field(v, "parentHash")?.to_string(),
        miner: field(v, "miner")?.to_ascii_lowercase(),
        difficulty: v["difficulty"]
            .as_str()
            .map(parse_hex_u128)
            .transpose()?
            .unwrap_or(0)
            .to_string(),
        gas_used: quantity(v, "gasUsed")?,
        gas_limit: quantity(v, "gasLimit")?,
        timestamp: quantity(v, "timestamp")? as i64,
        tx_count: txs.len() as u32,
        uncles,
    };

    let transactions = txs
        .iter()
        .filter(|t| t.is_object())
        .map(|t| tx_from_json(t, block.timestamp))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FetchedBlock::new(block, transactions))
}

/// Convert a full transaction object. `timestamp` comes from the block.
pub fn tx_from_json(v: &Value, timestamp: i64) -> Result<Transaction, MirrorError> {
    Ok(Transaction {
        hash: field(v, "hash")?.to_string(),
        block_number: quantity(v, "blockNumber")?,
        nonce: quantity(v, "nonce")?,
        from: field(v, "from")?.to_ascii_lowercase(),
        to: v["to"].as_str().map(str::to_ascii_lowercase),
        value: decimal(v, "value")?,
        gas: quantity(v, "gas")?,
        // Type-2 transactions without a gasPrice field
        gas_price: match v["gasPrice"].as_str() {
            Some(p) => parse_hex_u128(p)?.to_string(),
            None => "0".into(),
        },
        timestamp,
        input: v["input"].as_str().unwrap_or("0x").to_string(),
    })
}

/// Convert a `newHeads` notification payload.
pub fn head_from_json(v: &Value) -> Result<BlockRef, MirrorError> {
    Ok(BlockRef {
        number: quantity(v, "number")?,
        hash: field(v, "hash")?.to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::block_json;
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_hex_basic() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert_eq!(parse_hex_u64("0x").unwrap(), 0);
        assert!(parse_hex_u64("0xzz").is_err());
        assert_eq!(
            parse_hex_u128("0x10000000000000000").unwrap(),
            u128::from(u64::MAX) + 1
        );
    }

    #[test]
    fn full_block() {
        let fetched = block_from_json(&block_json(16, true)).unwrap();
        let b = &fetched.block;
        assert_eq!(b.number, 16);
        assert_eq!(b.parent_hash, "0xblock15");
        assert_eq!(b.miner, "0xminer");
        assert_eq!(b.difficulty, "2");
        assert_eq!(b.gas_limit, 30_000_000);
        assert_eq!(b.timestamp, 100);
        assert_eq!(b.tx_count, 1);
        assert_eq!(b.uncles, vec!["0xu1".to_string()]);

        let tx = &fetched.transactions[0];
        assert_eq!(tx.block_number, 16);
        assert_eq!(tx.nonce, 42);
        assert_eq!(tx.from, "0xabc0000000000000000000000000000000000001");
        assert_eq!(tx.to, None);
        assert_eq!(tx.value, "1000000000000000000");
        assert_eq!(tx.gas_price, "20000000000");
        assert_eq!(tx.timestamp, 100);
    }

    #[test]
    fn hash_only_block_keeps_declared_count() {
        let fetched = block_from_json(&block_json(3, false)).unwrap();
        assert_eq!(fetched.block.tx_count, 1);
        assert!(fetched.transactions.is_empty());
    }

    #[test]
    fn missing_field_is_decode_error() {
        let mut v = block_json(1, true);
        v.as_object_mut().unwrap().remove("hash");
        assert!(matches!(block_from_json(&v), Err(MirrorError::Decode(_))));
    }

    #[test]
    fn head_notification() {
        let head =
            head_from_json(&json!({"number": "0x10", "hash": "0xh", "parentHash": "0xp"})).unwrap();
        assert_eq!(head, BlockRef { number: 16, hash: "0xh".into() });
    }
}
