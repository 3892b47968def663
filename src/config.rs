//! Application configuration: trading-pair registry, ambient logging,
//! outbox tuning, and persistence connection settings, loaded once from a
//! YAML file at process start.

use crate::core_types::{AssetId, UserId};
use crate::symbol_manager::SymbolManager;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    pub asset_id: AssetId,
    pub name: String,
    /// Internal storage precision - never change after initial setup.
    pub internal_scale: u32,
    /// Client-facing precision for API input/output.
    pub asset_precision: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub symbol_id: u32,
    pub symbol: String,
    pub base_asset_id: AssetId,
    pub quote_asset_id: AssetId,
    pub price_scale: u32,
    pub price_precision: u32,
    pub min_qty: u64,
    pub max_qty: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for the rolling file appender; defaults to the working
    /// directory if absent.
    pub dir: Option<String>,
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "spot-matching-core".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            file_prefix: default_log_file_prefix(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    #[serde(default = "default_warm_up_seconds")]
    pub warm_up_seconds: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_batch_size() -> usize {
    crate::outbox::DEFAULT_BATCH_SIZE
}

fn default_tick_seconds() -> u64 {
    crate::outbox::DEFAULT_TICK.as_secs()
}

fn default_warm_up_seconds() -> u64 {
    crate::outbox::DEFAULT_WARM_UP.as_secs()
}

fn default_queue_capacity() -> usize {
    10_000
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_seconds: default_tick_seconds(),
            warm_up_seconds: default_warm_up_seconds(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub assets: Vec<AssetConfig>,
    pub symbols: Vec<SymbolConfig>,
    /// Users exempt from Intake's pre-freeze, e.g. market makers under a
    /// separate risk agreement (§4.4).
    #[serde(default)]
    pub market_maker_exempt_user_ids: Vec<UserId>,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub database_max_connections: u32,
}

fn default_snapshot_depth() -> usize {
    50
}

fn default_db_max_connections() -> u32 {
    10
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let raw = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_ref.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_ref.display().to_string(),
            source,
        })
    }

    pub fn build_symbol_manager(&self) -> SymbolManager {
        let mut mgr = SymbolManager::new();
        for asset in &self.assets {
            mgr.add_asset(
                asset.asset_id,
                asset.internal_scale,
                asset.asset_precision,
                &asset.name,
            );
        }
        for symbol in &self.symbols {
            if let Err(err) = mgr.insert_symbol(
                &symbol.symbol,
                symbol.symbol_id,
                symbol.base_asset_id,
                symbol.quote_asset_id,
                symbol.price_scale,
                symbol.price_precision,
                symbol.min_qty,
                symbol.max_qty,
                symbol.is_active,
            ) {
                tracing::error!(symbol = %symbol.symbol, %err, "failed to register trading pair");
            }
        }
        mgr
    }

    pub fn market_maker_exempt_set(&self) -> FxHashSet<UserId> {
        self.market_maker_exempt_user_ids.iter().copied().collect()
    }

    pub fn outbox_worker_config(&self) -> crate::outbox::OutboxWorkerConfig {
        crate::outbox::OutboxWorkerConfig {
            batch_size: self.outbox.batch_size,
            tick: std::time::Duration::from_secs(self.outbox.tick_seconds),
            warm_up: std::time::Duration::from_secs(self.outbox.warm_up_seconds),
        }
    }

    /// Mirrors the configured asset/trading-pair registry into the store on
    /// every process start, so a cold boot always leaves the relational
    /// catalog consistent with the YAML that drove `build_symbol_manager`.
    pub async fn sync_registry(
        &self,
        assets: &dyn crate::persistence::AssetRepository,
        pairs: &dyn crate::persistence::TradingPairRepository,
    ) -> Result<(), crate::persistence::PersistenceError> {
        for asset in &self.assets {
            assets
                .upsert_asset(
                    asset.asset_id as i32,
                    &asset.name,
                    asset.internal_scale as i32,
                    asset.asset_precision as i32,
                )
                .await?;
        }
        for symbol in &self.symbols {
            let base_asset = self.assets.iter().find(|a| a.asset_id == symbol.base_asset_id);
            let quote_asset = self.assets.iter().find(|a| a.asset_id == symbol.quote_asset_id);
            // Quantities are precision-bound by the base asset, not a separate
            // per-pair setting (§3 - no quantity_precision field on TradingPair).
            let quantity_precision = base_asset.map(|a| a.asset_precision).unwrap_or(0);
            pairs
                .upsert_trading_pair(
                    symbol.symbol_id as i32,
                    &symbol.symbol,
                    base_asset.map(|a| a.name.as_str()).unwrap_or(""),
                    quote_asset.map(|a| a.name.as_str()).unwrap_or(""),
                    symbol.price_precision as i32,
                    quantity_precision as i32,
                    rust_decimal::Decimal::from(symbol.min_qty),
                    rust_decimal::Decimal::from(symbol.max_qty),
                    symbol.is_active,
                )
                .await?;
        }
        Ok(())
    }
}
