//! Process wiring for the spot-trading matching core: loads configuration,
//! brings up persistence, spawns one matching-engine actor and one
//! settlement task per configured trading pair, and runs the write-behind
//! outbox worker until shutdown.
//!
//! No HTTP/WebSocket surface is wired here (Non-goal) - this binary is the
//! exchange's matching core process; an external gateway is expected to
//! submit orders via whatever transport it chooses, consulting the crate's
//! `intake`/`engine` API directly or through a future adapter.

use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use rustc_hash::FxHashMap;

use spot_matching_core::config::AppConfig;
use spot_matching_core::core_types::SymbolId;
use spot_matching_core::ledger::BalanceLedger;
use spot_matching_core::messages::EngineCommand;
use spot_matching_core::models::OrderRegistry;
use spot_matching_core::outbox::{self, Outbox};
use spot_matching_core::persistence::{
    BalanceRepository, Database, OrderRepository, PgAssetRepository, PgBalanceRepository,
    PgOrderRepository, PgTradeRepository, PgTradingPairRepository, TradeRepository, schema,
};
use spot_matching_core::recovery;
use spot_matching_core::settlement::{self, Settlement};
use spot_matching_core::snapshot;
use spot_matching_core::engine;

fn config_path() -> String {
    std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let config = AppConfig::from_file(&path)
        .with_context(|| format!("loading configuration from {path}"))?;

    let _log_guard = spot_matching_core::logging::init_logging(&config.logging);
    tracing::info!(config = %path, "starting spot-matching-core");

    let symbols = Arc::new(config.build_symbol_manager());
    let ledger = Arc::new(BalanceLedger::new());
    let registry = Arc::new(OrderRegistry::new());
    let outbox = Arc::new(Outbox::new(config.outbox.queue_capacity));
    let prices: engine::BestPriceCache = Arc::new(DashMap::new());

    let db = Database::connect(&config.database_url, config.database_max_connections)
        .await
        .context("connecting to Postgres")?;
    schema::ensure_schema(db.pool())
        .await
        .context("ensuring relational schema")?;

    let asset_repo = PgAssetRepository::new(db.clone());
    let pair_repo = PgTradingPairRepository::new(db.clone());
    config
        .sync_registry(&asset_repo, &pair_repo)
        .await
        .context("syncing asset/trading-pair registry")?;

    let order_repo: Arc<dyn OrderRepository> = Arc::new(PgOrderRepository::new(db.clone()));
    let trade_repo: Arc<dyn TradeRepository> = Arc::new(PgTradeRepository::new(db.clone()));
    let balance_repo: Arc<dyn BalanceRepository> = Arc::new(PgBalanceRepository::new(db.clone()));

    let mut command_senders: FxHashMap<SymbolId, tokio::sync::mpsc::Sender<EngineCommand>> =
        FxHashMap::default();

    for symbol in config.symbols.iter().filter(|s| s.is_active) {
        let symbol_id = symbol.symbol_id as SymbolId;
        let info = symbols
            .get_symbol_info_by_id(symbol_id)
            .with_context(|| format!("symbol {symbol_id} missing from built SymbolManager"))?;
        let base_asset = symbols
            .assets
            .get(&info.base_asset_id)
            .with_context(|| format!("base asset for symbol {symbol_id} missing from registry"))?;

        let recovered = recovery::recover_symbol(
            symbol_id,
            info,
            base_asset,
            order_repo.as_ref(),
            trade_repo.as_ref(),
        )
        .await
        .with_context(|| format!("warm-starting engine for symbol {symbol_id}"))?;

        let (snapshot_tx, _snapshot_rx) = snapshot::channel();
        let (cmd_tx, log_rx) =
            engine::spawn_with(recovered, prices.clone(), snapshot_tx, config.snapshot_depth);

        let settlement = Arc::new(Settlement::new(
            ledger.clone(),
            symbols.clone(),
            registry.clone(),
            outbox.clone(),
        ));
        tokio::spawn(settlement::run(settlement, log_rx));

        command_senders.insert(symbol_id, cmd_tx);
        tracing::info!(symbol = %symbol.symbol, symbol_id, "matching engine actor started");
    }

    tokio::spawn(outbox::run(
        outbox.clone(),
        order_repo,
        trade_repo,
        balance_repo,
        config.outbox_worker_config(),
    ));
    tracing::info!("write-behind outbox worker started");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received, exiting");
    Ok(())
}
