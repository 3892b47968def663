//! Repository traits for data access abstraction (§6 "Persistent storage").
//!
//! This module provides traits that abstract data access, enabling:
//! - Testability through mock implementations
//! - Flexibility to swap data sources
//! - Clean separation between business logic and infrastructure
//!
//! All three traits expose idempotent upserts by primary key (Invariant
//! X1) since the write-behind Outbox (§4.6) may redeliver an item after a
//! crash between a successful write and the processing-queue drain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Every repository method returns this rather than a bare `sqlx::Error` so
/// the write-behind Outbox can distinguish a store-level failure from the
/// domain errors raised elsewhere in the pipeline.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Thin wrapper over a connection pool, grounded in the same
/// `PgPoolOptions` construction/health-check shape used for every other
/// external dependency in this codebase.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub user_id: i64,
    pub trading_pair_id: i32,
    pub side: i16,
    pub order_type: i16,
    pub status: i16,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradeRow {
    pub id: i64,
    pub trading_pair_id: i32,
    pub buy_order_id: i64,
    pub sell_order_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct BalanceRow {
    pub available: Decimal,
    pub frozen: Decimal,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn upsert_order(&self, order: &OrderRow) -> Result<(), PersistenceError>;
    async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>, PersistenceError>;
    async fn get_orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<OrderRow>, PersistenceError>;
    /// Orders still resting on the book (§5 "Recovery" warm start) - status
    /// `Active` (1) or `PartiallyFilled` (2).
    async fn get_resting_orders(&self, trading_pair_id: i32) -> Result<Vec<OrderRow>, PersistenceError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn upsert_trade(&self, trade: &TradeRow) -> Result<(), PersistenceError>;
    async fn get_trades_for_pair(
        &self,
        trading_pair_id: i32,
        limit: i64,
    ) -> Result<Vec<TradeRow>, PersistenceError>;
    /// Highest persisted trade id for a pair, 0 if none - used to reseed
    /// `MatchingEngine::recover`'s `tradeSeq` on warm start.
    async fn max_trade_id(&self, trading_pair_id: i32) -> Result<i64, PersistenceError>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    async fn upsert_balance(
        &self,
        user_id: i64,
        symbol: &str,
        available: Decimal,
        frozen: Decimal,
    ) -> Result<(), PersistenceError>;
    async fn get_balance(
        &self,
        user_id: i64,
        symbol: &str,
    ) -> Result<Option<BalanceRow>, PersistenceError>;
}

pub struct PgOrderRepository {
    db: Database,
}

impl PgOrderRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn upsert_order(&self, order: &OrderRow) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, trading_pair_id, side, type, status, price, quantity,
                 filled_quantity, avg_price, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                filled_quantity = EXCLUDED.filled_quantity,
                avg_price = EXCLUDED.avg_price,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.trading_pair_id)
        .bind(order.side)
        .bind(order.order_type)
        .bind(order.status)
        .bind(order.price)
        .bind(order.quantity)
        .bind(order.filled_quantity)
        .bind(order.avg_price)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_order(&self, order_id: i64) -> Result<Option<OrderRow>, PersistenceError> {
        sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, user_id, trading_pair_id, side, type AS order_type, status,
                      price, quantity, filled_quantity, avg_price, created_at, updated_at
               FROM orders WHERE id = $1"#,
        )
        .bind(order_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }

    async fn get_orders_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<OrderRow>, PersistenceError> {
        sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, user_id, trading_pair_id, side, type AS order_type, status,
                      price, quantity, filled_quantity, avg_price, created_at, updated_at
               FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2"#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }

    async fn get_resting_orders(&self, trading_pair_id: i32) -> Result<Vec<OrderRow>, PersistenceError> {
        sqlx::query_as::<_, OrderRow>(
            r#"SELECT id, user_id, trading_pair_id, side, type AS order_type, status,
                      price, quantity, filled_quantity, avg_price, created_at, updated_at
               FROM orders WHERE trading_pair_id = $1 AND status IN (1, 2)"#,
        )
        .bind(trading_pair_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }
}

pub struct PgTradeRepository {
    db: Database,
}

impl PgTradeRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradeRepository for PgTradeRepository {
    async fn upsert_trade(&self, trade: &TradeRow) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO trades
                (id, trading_pair_id, buy_order_id, sell_order_id, buyer_id, seller_id,
                 price, quantity, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(trade.trading_pair_id)
        .bind(trade.buy_order_id)
        .bind(trade.sell_order_id)
        .bind(trade.buyer_id)
        .bind(trade.seller_id)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.executed_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_trades_for_pair(
        &self,
        trading_pair_id: i32,
        limit: i64,
    ) -> Result<Vec<TradeRow>, PersistenceError> {
        sqlx::query_as::<_, TradeRow>(
            r#"SELECT id, trading_pair_id, buy_order_id, sell_order_id, buyer_id, seller_id,
                      price, quantity, executed_at
               FROM trades WHERE trading_pair_id = $1 ORDER BY executed_at DESC LIMIT $2"#,
        )
        .bind(trading_pair_id)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }

    async fn max_trade_id(&self, trading_pair_id: i32) -> Result<i64, PersistenceError> {
        let max: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(id) FROM trades WHERE trading_pair_id = $1")
                .bind(trading_pair_id)
                .fetch_one(self.db.pool())
                .await
                .map_err(PersistenceError::from)?;
        Ok(max.0.unwrap_or(0))
    }
}

pub struct PgBalanceRepository {
    db: Database,
}

impl PgBalanceRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BalanceRepository for PgBalanceRepository {
    async fn upsert_balance(
        &self,
        user_id: i64,
        symbol: &str,
        available: Decimal,
        frozen: Decimal,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO assets (user_id, symbol, available, frozen)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, symbol) DO UPDATE SET
                available = EXCLUDED.available,
                frozen = EXCLUDED.frozen
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .bind(available)
        .bind(frozen)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get_balance(
        &self,
        user_id: i64,
        symbol: &str,
    ) -> Result<Option<BalanceRow>, PersistenceError> {
        sqlx::query_as::<_, BalanceRow>(
            "SELECT available, frozen FROM assets WHERE user_id = $1 AND symbol = $2",
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct AssetRow {
    pub asset_id: i32,
    pub internal_scale: i32,
    pub asset_precision: i32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TradingPairRow {
    pub id: i32,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_precision: i32,
    pub quantity_precision: i32,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub is_active: bool,
}

/// Mirrors the static registry §3 builds from `AppConfig` into the store,
/// so a cold-started process (or an external reporting tool) can read the
/// asset/trading-pair catalog without re-parsing the YAML config.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn upsert_asset(
        &self,
        asset_id: i32,
        name: &str,
        internal_scale: i32,
        asset_precision: i32,
    ) -> Result<(), PersistenceError>;
    async fn list_assets(&self) -> Result<Vec<AssetRow>, PersistenceError>;
}

#[async_trait]
pub trait TradingPairRepository: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn upsert_trading_pair(
        &self,
        id: i32,
        symbol: &str,
        base_asset: &str,
        quote_asset: &str,
        price_precision: i32,
        quantity_precision: i32,
        min_quantity: Decimal,
        max_quantity: Decimal,
        is_active: bool,
    ) -> Result<(), PersistenceError>;
    async fn list_trading_pairs(&self) -> Result<Vec<TradingPairRow>, PersistenceError>;
}

pub struct PgAssetRepository {
    db: Database,
}

impl PgAssetRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn upsert_asset(
        &self,
        asset_id: i32,
        name: &str,
        internal_scale: i32,
        asset_precision: i32,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO asset_registry (asset_id, name, internal_scale, asset_precision)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (asset_id) DO UPDATE SET
                name = EXCLUDED.name,
                internal_scale = EXCLUDED.internal_scale,
                asset_precision = EXCLUDED.asset_precision
            "#,
        )
        .bind(asset_id)
        .bind(name)
        .bind(internal_scale)
        .bind(asset_precision)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_assets(&self) -> Result<Vec<AssetRow>, PersistenceError> {
        sqlx::query_as::<_, AssetRow>(
            "SELECT asset_id, internal_scale, asset_precision FROM asset_registry ORDER BY asset_id",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }
}

pub struct PgTradingPairRepository {
    db: Database,
}

impl PgTradingPairRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TradingPairRepository for PgTradingPairRepository {
    async fn upsert_trading_pair(
        &self,
        id: i32,
        symbol: &str,
        base_asset: &str,
        quote_asset: &str,
        price_precision: i32,
        quantity_precision: i32,
        min_quantity: Decimal,
        max_quantity: Decimal,
        is_active: bool,
    ) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO trading_pairs
                (id, symbol, base_asset, quote_asset, price_precision, quantity_precision,
                 min_quantity, max_quantity, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                price_precision = EXCLUDED.price_precision,
                quantity_precision = EXCLUDED.quantity_precision,
                min_quantity = EXCLUDED.min_quantity,
                max_quantity = EXCLUDED.max_quantity,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(id)
        .bind(symbol)
        .bind(base_asset)
        .bind(quote_asset)
        .bind(price_precision)
        .bind(quantity_precision)
        .bind(min_quantity)
        .bind(max_quantity)
        .bind(is_active)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_trading_pairs(&self) -> Result<Vec<TradingPairRow>, PersistenceError> {
        sqlx::query_as::<_, TradingPairRow>(
            r#"SELECT id, symbol, base_asset, quote_asset, price_precision, quantity_precision,
                      min_quantity, max_quantity, is_active
               FROM trading_pairs ORDER BY id"#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)
    }
}
