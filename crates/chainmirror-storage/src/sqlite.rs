//! SQLite storage backend for ChainMirror.
//!
//! Persists blocks, transactions and address balances to a single SQLite
//! file. The primary keys carry the mirror's uniqueness rules, so a second
//! writer racing on the same block number gets `MirrorError::Duplicate`.
//! Block and transaction inserts journal their addresses into
//! `address_observations` in the same SQL transaction.
//!
//! # Usage
//! ```rust,no_run
//! use chainmirror_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("./mirror.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction as DbTransaction};
use tracing::debug;

use chainmirror_core::error::MirrorError;
use chainmirror_core::store::DataStore;
use chainmirror_core::types::{Address, Block, Transaction};

const BLOCK_COLUMNS: &str =
    "number, hash, parent_hash, miner, difficulty, gas_used, gas_limit, timestamp, tx_count, uncles";

const TX_COLUMNS: &str =
    "hash, block_number, nonce, from_address, to_address, value, gas, gas_price, timestamp, input";

fn storage(e: impl std::fmt::Display) -> MirrorError {
    MirrorError::Storage(e.to_string())
}

async fn observe(
    db_tx: &mut DbTransaction<'_, Sqlite>,
    address: &str,
) -> Result<(), MirrorError> {
    sqlx::query("INSERT INTO address_observations (address) VALUES (?)")
        .bind(address)
        .execute(&mut **db_tx)
        .await
        .map_err(storage)?;
    Ok(())
}

/// SQLite-backed `DataStore`.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./mirror.db"`) or a full
    /// SQLite URL (`"sqlite:./mirror.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, MirrorError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage)?;
        let store = Self { pool };
        store.init_schema(true).await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every pooled connection would see its own empty database, so the
    /// pool is pinned to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage)?;

        let store = Self { pool };
        store.init_schema(false).await?;
        Ok(store)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), MirrorError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }

        let statements = [
            "CREATE TABLE IF NOT EXISTS blocks (
                number      INTEGER PRIMARY KEY,
                hash        TEXT    NOT NULL,
                parent_hash TEXT    NOT NULL,
                miner       TEXT    NOT NULL,
                difficulty  TEXT    NOT NULL,
                gas_used    INTEGER NOT NULL,
                gas_limit   INTEGER NOT NULL,
                timestamp   INTEGER NOT NULL,
                tx_count    INTEGER NOT NULL,
                uncles      TEXT    NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS transactions (
                hash         TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                nonce        INTEGER NOT NULL,
                from_address TEXT    NOT NULL,
                to_address   TEXT,
                value        TEXT    NOT NULL,
                gas          INTEGER NOT NULL,
                gas_price    TEXT    NOT NULL,
                timestamp    INTEGER NOT NULL,
                input        TEXT    NOT NULL,
                PRIMARY KEY (hash, block_number)
            );",
            "CREATE TABLE IF NOT EXISTS addresses (
                address       TEXT    PRIMARY KEY,
                balance       TEXT    NOT NULL,
                balance_value REAL    NOT NULL,
                last_updated  INTEGER NOT NULL,
                tx_count      INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS address_observations (
                seq     INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT    NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_blocks_hash ON blocks (hash);",
            "CREATE INDEX IF NOT EXISTS idx_tx_block ON transactions (block_number);",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage)?;
        }
        Ok(())
    }
}

// ─── Row decoding ─────────────────────────────────────────────────────────────

fn block_from_row(row: &SqliteRow) -> Result<Block, MirrorError> {
    let uncles: String = row.try_get("uncles").map_err(storage)?;
    Ok(Block {
        number: row.try_get::<i64, _>("number").map_err(storage)? as u64,
        hash: row.try_get("hash").map_err(storage)?,
        parent_hash: row.try_get("parent_hash").map_err(storage)?,
        miner: row.try_get("miner").map_err(storage)?,
        difficulty: row.try_get("difficulty").map_err(storage)?,
        gas_used: row.try_get::<i64, _>("gas_used").map_err(storage)? as u64,
        gas_limit: row.try_get::<i64, _>("gas_limit").map_err(storage)? as u64,
        timestamp: row.try_get("timestamp").map_err(storage)?,
        tx_count: row.try_get::<i64, _>("tx_count").map_err(storage)? as u32,
        uncles: serde_json::from_str(&uncles).map_err(storage)?,
    })
}

fn tx_from_row(row: &SqliteRow) -> Result<Transaction, MirrorError> {
    Ok(Transaction {
        hash: row.try_get("hash").map_err(storage)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(storage)? as u64,
        nonce: row.try_get::<i64, _>("nonce").map_err(storage)? as u64,
        from: row.try_get("from_address").map_err(storage)?,
        to: row.try_get("to_address").map_err(storage)?,
        value: row.try_get("value").map_err(storage)?,
        gas: row.try_get::<i64, _>("gas").map_err(storage)? as u64,
        gas_price: row.try_get("gas_price").map_err(storage)?,
        timestamp: row.try_get("timestamp").map_err(storage)?,
        input: row.try_get("input").map_err(storage)?,
    })
}

fn address_from_row(row: &SqliteRow) -> Result<Address, MirrorError> {
    Ok(Address {
        address: row.try_get("address").map_err(storage)?,
        balance: row.try_get("balance").map_err(storage)?,
        balance_value: row.try_get("balance_value").map_err(storage)?,
        last_updated: row.try_get("last_updated").map_err(storage)?,
        tx_count: row.try_get::<i64, _>("tx_count").map_err(storage)? as u64,
    })
}

// ─── DataStore impl ───────────────────────────────────────────────────────────

#[async_trait]
impl DataStore for SqliteStore {
    async fn insert_block(&self, block: &Block) -> Result<(), MirrorError> {
        let uncles = serde_json::to_string(&block.uncles).map_err(storage)?;
        let mut db_tx = self.pool.begin().await.map_err(storage)?;
        let result = sqlx::query(&format!(
            "INSERT INTO blocks ({BLOCK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(block.number as i64)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(&block.miner)
        .bind(&block.difficulty)
        .bind(block.gas_used as i64)
        .bind(block.gas_limit as i64)
        .bind(block.timestamp)
        .bind(i64::from(block.tx_count))
        .bind(&uncles)
        .execute(&mut *db_tx)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(MirrorError::duplicate_block(block.number));
            }
            Err(e) => return Err(storage(e)),
        }
        observe(&mut db_tx, &block.miner).await?;
        db_tx.commit().await.map_err(storage)?;

        debug!(block = block.number, hash = %block.hash, "block stored");
        Ok(())
    }

    async fn block(&self, number: u64) -> Result<Option<Block>, MirrorError> {
        let row = sqlx::query(&format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE number = ?"))
            .bind(number as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, MirrorError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE hash = ? ORDER BY number LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(block_from_row).transpose()
    }

    async fn delete_block(&self, number: u64) -> Result<bool, MirrorError> {
        let result = sqlx::query("DELETE FROM blocks WHERE number = ?")
            .bind(number as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn highest_block(&self) -> Result<Option<u64>, MirrorError> {
        let row = sqlx::query("SELECT MAX(number) AS max_number FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let max: Option<i64> = row.try_get("max_number").map_err(storage)?;
        Ok(max.map(|n| n as u64))
    }

    async fn block_count(&self) -> Result<u64, MirrorError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM blocks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage)?;
        Ok(cnt as u64)
    }

    async fn insert_transactions(&self, txs: &[Transaction]) -> Result<u64, MirrorError> {
        if txs.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT OR IGNORE INTO transactions ({TX_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        let mut db_tx = self.pool.begin().await.map_err(storage)?;
        let mut inserted = 0;
        for tx in txs {
            let result = sqlx::query(&sql)
                .bind(&tx.hash)
                .bind(tx.block_number as i64)
                .bind(tx.nonce as i64)
                .bind(&tx.from)
                .bind(tx.to.as_deref())
                .bind(&tx.value)
                .bind(tx.gas as i64)
                .bind(&tx.gas_price)
                .bind(tx.timestamp)
                .bind(&tx.input)
                .execute(&mut *db_tx)
                .await
                .map_err(storage)?;
            if result.rows_affected() == 0 {
                continue;
            }
            inserted += result.rows_affected();
            observe(&mut db_tx, &tx.from).await?;
            if let Some(to) = &tx.to {
                observe(&mut db_tx, to).await?;
            }
        }
        db_tx.commit().await.map_err(storage)?;

        debug!(requested = txs.len(), inserted, "transactions stored");
        Ok(inserted)
    }

    async fn transaction(&self, hash: &str) -> Result<Option<Transaction>, MirrorError> {
        let row = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE hash = ? ORDER BY block_number LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(tx_from_row).transpose()
    }

    async fn transactions_in_block(
        &self,
        block_number: u64,
    ) -> Result<Vec<Transaction>, MirrorError> {
        let rows = sqlx::query(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE block_number = ? ORDER BY hash"
        ))
        .bind(block_number as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        rows.iter().map(tx_from_row).collect()
    }

    async fn count_transactions(&self, block_number: u64) -> Result<u64, MirrorError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM transactions WHERE block_number = ?")
            .bind(block_number as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage)?;
        Ok(cnt as u64)
    }

    async fn delete_transactions(&self, block_number: u64) -> Result<u64, MirrorError> {
        let result = sqlx::query("DELETE FROM transactions WHERE block_number = ?")
            .bind(block_number as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn observation_cursor(&self) -> Result<u64, MirrorError> {
        // sqlite_sequence keeps the high-water mark after the rows are pruned
        let row = sqlx::query(
            "SELECT COALESCE(
                (SELECT seq FROM sqlite_sequence WHERE name = 'address_observations'), 0
             ) AS cursor",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        let cursor: i64 = row.try_get("cursor").map_err(storage)?;
        Ok(cursor as u64)
    }

    async fn addresses_observed_since(
        &self,
        cursor: u64,
    ) -> Result<BTreeSet<String>, MirrorError> {
        let rows = sqlx::query("SELECT DISTINCT address FROM address_observations WHERE seq > ?")
            .bind(cursor as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("address").map_err(storage))
            .collect()
    }

    async fn prune_observations(&self, cursor: u64) -> Result<u64, MirrorError> {
        let result = sqlx::query("DELETE FROM address_observations WHERE seq <= ?")
            .bind(cursor as i64)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected())
    }

    async fn upsert_address(&self, address: &Address) -> Result<(), MirrorError> {
        sqlx::query(
            "INSERT INTO addresses (address, balance, balance_value, last_updated, tx_count)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                balance       = excluded.balance,
                balance_value = excluded.balance_value,
                last_updated  = excluded.last_updated,
                tx_count      = excluded.tx_count",
        )
        .bind(&address.address)
        .bind(&address.balance)
        .bind(address.balance_value)
        .bind(address.last_updated)
        .bind(address.tx_count as i64)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn address(&self, address: &str) -> Result<Option<Address>, MirrorError> {
        let row = sqlx::query(
            "SELECT address, balance, balance_value, last_updated, tx_count
             FROM addresses WHERE address = ?",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(address_from_row).transpose()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
