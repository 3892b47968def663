//! Warm-start recovery (§5): reconstructs a symbol's `MatchingEngine` from
//! the relational store instead of a blank book, for a process restart that
//! must not forget resting orders or replay already-settled trades.

use crate::core_types::{OrderId, SymbolId, UserId};
use crate::engine::{EngineError, MatchingEngine};
use crate::models::{Order, OrderStatus, OrderType, Side};
use crate::money::ScaledAmount;
use crate::persistence::{OrderRepository, OrderRow, PersistenceError, TradeRepository};
use crate::symbol_manager::{AssetInfo, SymbolInfo};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("persisted order {order_id} has an unrecognized {field} value {value}")]
    InvalidEncoding {
        order_id: i64,
        field: &'static str,
        value: i16,
    },
}

fn side_from_row(order_id: i64, value: i16) -> Result<Side, RecoveryError> {
    match value {
        0 => Ok(Side::Buy),
        1 => Ok(Side::Sell),
        _ => Err(RecoveryError::InvalidEncoding {
            order_id,
            field: "side",
            value,
        }),
    }
}

fn order_type_from_row(order_id: i64, value: i16) -> Result<OrderType, RecoveryError> {
    match value {
        0 => Ok(OrderType::Limit),
        1 => Ok(OrderType::Market),
        _ => Err(RecoveryError::InvalidEncoding {
            order_id,
            field: "order_type",
            value,
        }),
    }
}

fn status_from_row(order_id: i64, value: i16) -> Result<OrderStatus, RecoveryError> {
    match value {
        0 => Ok(OrderStatus::Pending),
        1 => Ok(OrderStatus::Active),
        2 => Ok(OrderStatus::PartiallyFilled),
        3 => Ok(OrderStatus::Filled),
        4 => Ok(OrderStatus::Cancelled),
        _ => Err(RecoveryError::InvalidEncoding {
            order_id,
            field: "status",
            value,
        }),
    }
}

/// Rebuilds the `Order` a resting `OrderRow` represents, with `quantity`
/// reduced to what's still unfilled - the book only ever holds the
/// remaining size, never the original order size (§3 "Book entry").
fn row_to_resting_order(
    row: &OrderRow,
    symbol_id: SymbolId,
    info: &SymbolInfo,
    base_asset: &AssetInfo,
) -> Result<Order, RecoveryError> {
    let side = side_from_row(row.id, row.side)?;
    let order_type = order_type_from_row(row.id, row.order_type)?;
    let status = status_from_row(row.id, row.status)?;

    let price = row.price.map(|p| info.truncate_price(p));
    let remaining = (row.quantity - row.filled_quantity).max(Decimal::ZERO);
    let quantity = base_asset.truncate_amount(remaining);

    Ok(Order {
        id: row.id as OrderId,
        user_id: row.user_id as UserId,
        symbol_id,
        side,
        order_type,
        price,
        quantity,
        quote_budget: None,
        filled_quantity: ScaledAmount::from(0u64),
        avg_price: info.truncate_price(row.avg_price),
        status,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Warm-starts one symbol's engine: reseeds `tradeSeq`/`logSeq` from the
/// highest persisted trade id, then replays every still-resting order back
/// onto a fresh book. `logSeq` has no dedicated persisted counter - reusing
/// `tradeSeq` is safe since it only needs to stay monotonic within this
/// process's lifetime, never compared against a stored value.
pub async fn recover_symbol(
    symbol_id: SymbolId,
    info: &SymbolInfo,
    base_asset: &AssetInfo,
    order_repo: &dyn OrderRepository,
    trade_repo: &dyn TradeRepository,
) -> Result<MatchingEngine, RecoveryError> {
    let last_seq = trade_repo.max_trade_id(symbol_id as i32).await? as u64;
    let mut engine = MatchingEngine::recover(symbol_id, info.qty_unit().to_raw(), last_seq, last_seq);

    let resting = order_repo.get_resting_orders(symbol_id as i32).await?;
    for row in &resting {
        let order = row_to_resting_order(row, symbol_id, info, base_asset)?;
        engine.restore_resting(&order)?;
    }
    tracing::info!(symbol_id, restored = resting.len(), last_seq, "warm-started engine from store");
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::TradeRow;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        orders: Vec<OrderRow>,
        max_trade_id: i64,
    }

    struct FakeRepos(Mutex<FakeStore>);

    #[async_trait]
    impl OrderRepository for FakeRepos {
        async fn upsert_order(&self, _order: &OrderRow) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_order(&self, _order_id: i64) -> Result<Option<OrderRow>, PersistenceError> {
            Ok(None)
        }
        async fn get_orders_for_user(
            &self,
            _user_id: i64,
            _limit: i64,
        ) -> Result<Vec<OrderRow>, PersistenceError> {
            Ok(Vec::new())
        }
        async fn get_resting_orders(&self, _trading_pair_id: i32) -> Result<Vec<OrderRow>, PersistenceError> {
            Ok(self.0.lock().unwrap().orders.clone())
        }
    }

    #[async_trait]
    impl TradeRepository for FakeRepos {
        async fn upsert_trade(&self, _trade: &TradeRow) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn get_trades_for_pair(
            &self,
            _trading_pair_id: i32,
            _limit: i64,
        ) -> Result<Vec<TradeRow>, PersistenceError> {
            Ok(Vec::new())
        }
        async fn max_trade_id(&self, _trading_pair_id: i32) -> Result<i64, PersistenceError> {
            Ok(self.0.lock().unwrap().max_trade_id)
        }
    }

    fn sample_symbol() -> (SymbolInfo, AssetInfo) {
        let mut mgr = crate::symbol_manager::SymbolManager::new();
        mgr.add_asset(1, 8, 8, "BTC");
        mgr.add_asset(2, 8, 2, "USDT");
        mgr.insert_symbol("BTCUSDT", 1, 1, 2, 2, 2, 100, 100_000_000_00, true)
            .unwrap();
        let info = mgr.get_symbol_info_by_id(1).unwrap().clone();
        let base = mgr.assets.get(&1).unwrap().clone();
        (info, base)
    }

    #[tokio::test]
    async fn recovered_engine_reinserts_resting_order_at_remaining_size() {
        let (info, base) = sample_symbol();
        let now = Utc::now();
        let repos = FakeRepos(Mutex::new(FakeStore {
            orders: vec![OrderRow {
                id: 1,
                user_id: 10,
                trading_pair_id: 1,
                side: 0,
                order_type: 0,
                status: 2,
                price: Some(Decimal::new(30000, 2)),
                quantity: Decimal::new(100000000, 8),
                filled_quantity: Decimal::new(40000000, 8),
                avg_price: Decimal::new(30000, 2),
                created_at: now,
                updated_at: now,
            }],
            max_trade_id: 7,
        }));

        let engine = recover_symbol(1, &info, &base, &repos, &repos).await.unwrap();
        assert!(engine.book().contains(1));
        assert_eq!(engine.stats().orders_submitted, 0);
    }

    #[tokio::test]
    async fn recovery_with_no_resting_orders_yields_empty_book() {
        let (info, base) = sample_symbol();
        let repos = FakeRepos(Mutex::new(FakeStore::default()));
        let engine = recover_symbol(1, &info, &base, &repos, &repos).await.unwrap();
        assert!(!engine.book().contains(1));
    }
}
