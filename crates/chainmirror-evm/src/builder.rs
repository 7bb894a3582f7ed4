//! Fluent builder API for mirror configuration.
//!
//! # Example
//!
//! ```rust
//! use chainmirror_evm::MirrorBuilder;
//!
//! let config = MirrorBuilder::new()
//!     .chain("sepolia")
//!     .backfill_range(5_000_000, None)
//!     .retry_delay_ms(2_000, 15_000)
//!     .balance_interval_secs(120)
//!     .build_config();
//! assert_eq!(config.max_reorg_depth, 64);
//! ```

use chainmirror_core::config::MirrorConfig;

/// Fluent builder for `MirrorConfig`.
#[derive(Default)]
pub struct MirrorBuilder {
    config: MirrorConfig,
}

impl MirrorBuilder {
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: MirrorConfig) -> Self {
        Self { config }
    }

    /// Set the chain label used in logs.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Range of the first backfill sweep. `end = None` means the node head.
    pub fn backfill_range(mut self, start: u64, end: Option<u64>) -> Self {
        self.config.backfill_start = start;
        self.config.backfill_end = end;
        self
    }

    /// Bounds of the randomized retry delay. `max` is raised to `min` if lower.
    pub fn retry_delay_ms(mut self, min: u64, max: u64) -> Self {
        self.config.retry_min_delay_ms = min;
        self.config.retry_max_delay_ms = max.max(min);
        self
    }

    pub fn balance_interval_secs(mut self, secs: u64) -> Self {
        self.config.balance_interval_secs = secs;
        self
    }

    /// Ancestors the reconciler may purge before raising an alert.
    pub fn max_reorg_depth(mut self, depth: u64) -> Self {
        self.config.max_reorg_depth = depth;
        self
    }

    pub fn max_write_attempts(mut self, attempts: u32) -> Self {
        self.config.max_write_attempts = attempts.max(1);
        self
    }

    pub fn sweep_pause_ms(mut self, ms: u64) -> Self {
        self.config.sweep_pause_ms = ms;
        self
    }

    pub fn refresh_genesis_every_pass(mut self, every_pass: bool) -> Self {
        self.config.refresh_genesis_every_pass = every_pass;
        self
    }

    /// Build the `MirrorConfig`.
    pub fn build_config(self) -> MirrorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmirror_core::types::BlockTarget;

    #[test]
    fn builder_defaults() {
        let cfg = MirrorBuilder::new().build_config();
        assert_eq!(cfg.chain, "ethereum");
        assert_eq!(cfg.retry_min_delay_ms, 10_000);
        assert_eq!(cfg.retry_max_delay_ms, 60_000);
        assert_eq!(cfg.balance_interval_secs, 300);
        assert_eq!(cfg.backfill_target(), BlockTarget::Latest);
    }

    #[test]
    fn builder_custom() {
        let cfg = MirrorBuilder::new()
            .chain("holesky")
            .backfill_range(100, Some(200))
            .retry_delay_ms(500, 100)
            .max_reorg_depth(8)
            .max_write_attempts(0)
            .refresh_genesis_every_pass(false)
            .build_config();

        assert_eq!(cfg.chain, "holesky");
        assert_eq!(cfg.backfill_start, 100);
        assert_eq!(cfg.backfill_target(), BlockTarget::Number(200));
        assert_eq!(cfg.retry_max_delay_ms, 500);
        assert_eq!(cfg.max_reorg_depth, 8);
        assert_eq!(cfg.max_write_attempts, 1);
        assert!(!cfg.refresh_genesis_every_pass);
    }
}
