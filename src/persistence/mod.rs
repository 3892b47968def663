//! Relational persistence: Postgres-backed repositories for the three
//! entity kinds the write-behind Outbox writes (§4.6, §6).

pub mod repository;
pub mod schema;

pub use repository::{
    AssetRepository, AssetRow, BalanceRepository, BalanceRow, Database, OrderRepository,
    OrderRow, PersistenceError, PgAssetRepository, PgBalanceRepository, PgOrderRepository,
    PgTradeRepository, PgTradingPairRepository, TradeRepository, TradeRow, TradingPairRepository,
    TradingPairRow,
};
