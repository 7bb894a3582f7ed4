//! Application config: optional TOML file, overridden by flags.
//!
//! ```toml
//! rpc_url      = "http://127.0.0.1:8545"
//! ws_url       = "ws://127.0.0.1:8546"
//! database     = "./mirror.db"
//! genesis_file = "./genesis.json"
//!
//! [log]
//! level = "info"
//! json  = false
//!
//! [mirror]
//! chain                 = "ethereum"
//! backfill_start        = 0
//! balance_interval_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use chainmirror_core::config::MirrorConfig;
use chainmirror_evm::{EvmClientConfig, MirrorBuilder};

use crate::logging::LogConfig;

/// Flags of `chainmirror run`.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// TOML config file
    #[arg(long, short, env = "CHAINMIRROR_CONFIG")]
    pub config: Option<PathBuf>,
    /// HTTP JSON-RPC endpoint
    #[arg(long, env = "CHAINMIRROR_RPC_URL")]
    pub rpc_url: Option<String>,
    /// WebSocket endpoint for new-head notifications
    #[arg(long, env = "CHAINMIRROR_WS_URL")]
    pub ws_url: Option<String>,
    /// SQLite database path (in-memory store when omitted)
    #[arg(long, env = "CHAINMIRROR_DATABASE")]
    pub database: Option<String>,
    /// genesis.json whose `alloc` addresses get balance refreshes
    #[arg(long)]
    pub genesis: Option<PathBuf>,
    /// Global log level
    #[arg(long)]
    pub log_level: Option<String>,
    /// Chain label used in logs
    #[arg(long)]
    pub chain: Option<String>,
    /// First block of the initial backfill sweep
    #[arg(long)]
    pub from_block: Option<u64>,
    /// Last block of the initial backfill sweep (default: node head)
    #[arg(long)]
    pub to_block: Option<u64>,
    /// Seconds between balance sweep passes
    #[arg(long)]
    pub balance_interval: Option<u64>,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub genesis_file: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            ws_url: None,
            database: None,
            genesis_file: None,
            request_timeout_secs: default_request_timeout(),
            log: LogConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, or the parsed file when `path` is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `args.config`, then apply the flags.
    pub fn resolve(args: &RunArgs) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, args: &RunArgs) {
        if let Some(url) = &args.rpc_url {
            self.rpc_url = url.clone();
        }
        if let Some(url) = &args.ws_url {
            self.ws_url = Some(url.clone());
        }
        if let Some(db) = &args.database {
            self.database = Some(db.clone());
        }
        if let Some(genesis) = &args.genesis {
            self.genesis_file = Some(genesis.clone());
        }
        if let Some(level) = &args.log_level {
            self.log.level = level.clone();
        }

        let start = args.from_block.unwrap_or(self.mirror.backfill_start);
        let end = args.to_block.or(self.mirror.backfill_end);
        let mut builder = MirrorBuilder::from_config(std::mem::take(&mut self.mirror))
            .backfill_range(start, end);
        if let Some(chain) = &args.chain {
            builder = builder.chain(chain.clone());
        }
        if let Some(secs) = args.balance_interval {
            builder = builder.balance_interval_secs(secs);
        }
        self.mirror = builder.build_config();
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            anyhow::bail!("rpc_url must not be empty");
        }
        let m = &self.mirror;
        if m.retry_max_delay_ms < m.retry_min_delay_ms {
            anyhow::bail!(
                "mirror.retry_max_delay_ms ({}) is below retry_min_delay_ms ({})",
                m.retry_max_delay_ms,
                m.retry_min_delay_ms
            );
        }
        if let Some(end) = m.backfill_end {
            if end < m.backfill_start {
                anyhow::bail!(
                    "mirror.backfill_end ({end}) is below backfill_start ({})",
                    m.backfill_start
                );
            }
        }
        Ok(())
    }

    pub fn client_config(&self) -> EvmClientConfig {
        EvmClientConfig {
            rpc_url: self.rpc_url.clone(),
            ws_url: self.ws_url.clone(),
            genesis_file: self.genesis_file.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
