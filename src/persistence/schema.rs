//! Relational schema (§6 "Persistent storage, outbound"). Monetary columns
//! are `NUMERIC(38, 8)` - 8-decimal precision, plenty of headroom above any
//! symbol's internal scale - matching the write-behind Outbox's upsert
//! payloads, which always carry `Decimal` at this boundary.

use sqlx::PgPool;

pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGINT PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_ASSET_REGISTRY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS asset_registry (
    asset_id INT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    internal_scale INT NOT NULL,
    asset_precision INT NOT NULL
)
"#;

pub const CREATE_TRADING_PAIRS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trading_pairs (
    id INT PRIMARY KEY,
    symbol TEXT NOT NULL UNIQUE,
    base_asset TEXT NOT NULL,
    quote_asset TEXT NOT NULL,
    price_precision INT NOT NULL,
    quantity_precision INT NOT NULL,
    min_quantity NUMERIC(38, 8) NOT NULL,
    max_quantity NUMERIC(38, 8) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT true
)
"#;

pub const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders (
    id BIGINT PRIMARY KEY,
    user_id BIGINT NOT NULL,
    trading_pair_id INT NOT NULL REFERENCES trading_pairs(id),
    side SMALLINT NOT NULL,
    type SMALLINT NOT NULL,
    status SMALLINT NOT NULL,
    price NUMERIC(38, 8),
    quantity NUMERIC(38, 8) NOT NULL,
    filled_quantity NUMERIC(38, 8) NOT NULL DEFAULT 0,
    avg_price NUMERIC(38, 8) NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

pub const CREATE_ORDERS_USER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS orders_user_id_idx ON orders (user_id)";

/// Backs `get_resting_orders` - warm start filters by pair and status on
/// every boot (§5 "Recovery").
pub const CREATE_ORDERS_RESTING_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS orders_resting_idx ON orders (trading_pair_id, status)";

pub const CREATE_TRADES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trades (
    id BIGINT PRIMARY KEY,
    trading_pair_id INT NOT NULL REFERENCES trading_pairs(id),
    buy_order_id BIGINT NOT NULL,
    sell_order_id BIGINT NOT NULL,
    buyer_id BIGINT NOT NULL,
    seller_id BIGINT NOT NULL,
    price NUMERIC(38, 8) NOT NULL,
    quantity NUMERIC(38, 8) NOT NULL,
    executed_at TIMESTAMPTZ NOT NULL
)
"#;

pub const CREATE_TRADES_PAIR_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS trades_trading_pair_id_idx ON trades (trading_pair_id, executed_at)";

/// Despite the name, this is the balance ledger's durable mirror, keyed by
/// the asset's display symbol rather than a numeric id, per §6.
pub const CREATE_ASSETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS assets (
    user_id BIGINT NOT NULL,
    symbol TEXT NOT NULL,
    available NUMERIC(38, 8) NOT NULL DEFAULT 0,
    frozen NUMERIC(38, 8) NOT NULL DEFAULT 0,
    PRIMARY KEY (user_id, symbol)
)
"#;

/// Creates every table this crate owns if it does not already exist.
/// Idempotent - safe to run on every process start (§5 "Recovery").
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_USERS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_ASSET_REGISTRY_TABLE).execute(pool).await?;
    sqlx::query(CREATE_TRADING_PAIRS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_ORDERS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_ORDERS_USER_INDEX).execute(pool).await?;
    sqlx::query(CREATE_ORDERS_RESTING_INDEX).execute(pool).await?;
    sqlx::query(CREATE_TRADES_TABLE).execute(pool).await?;
    sqlx::query(CREATE_TRADES_PAIR_INDEX).execute(pool).await?;
    sqlx::query(CREATE_ASSETS_TABLE).execute(pool).await?;
    tracing::info!("relational schema ensured");
    Ok(())
}
