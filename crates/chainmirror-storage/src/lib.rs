//! chainmirror-storage — persistent `DataStore` backends for ChainMirror.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//! - `MemoryStore` — re-exported from `chainmirror-core` (dev/testing)

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use chainmirror_core::store::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
