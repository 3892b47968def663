//! Trade Settlement (§4.5): consumes the engine's ordered log stream,
//! applies the ledger mutations for each `Match`, and keeps the durable
//! `Order`/`Trade` projections current for the write-behind Outbox.

use crate::core_types::OrderId;
use crate::ledger::BalanceLedger;
use crate::messages::LogBatch;
use crate::models::{DoneReason, LogEntry, OrderRegistry, OrderStatus, OrderType, ResidualFreeze, Side};
use crate::outbox::{BalanceItem, Outbox};
use crate::persistence::{OrderRow, TradeRow};
use crate::symbol_manager::SymbolManager;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Running fill accumulator for one order: `(filled_qty, notional_sum)`
/// where `notional_sum = Σ price_i * qty_i` over its Matches so far, used
/// to recompute `avgPrice = notional_sum / filled_qty` at `Done`.
#[derive(Debug, Default, Clone, Copy)]
struct FillState {
    filled_qty: u64,
    notional_sum: u128,
}

pub struct Settlement {
    ledger: Arc<BalanceLedger>,
    symbols: Arc<SymbolManager>,
    registry: Arc<OrderRegistry>,
    outbox: Arc<Outbox>,
    fills: DashMap<OrderId, FillState>,
}

impl Settlement {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        symbols: Arc<SymbolManager>,
        registry: Arc<OrderRegistry>,
        outbox: Arc<Outbox>,
    ) -> Self {
        Self {
            ledger,
            symbols,
            registry,
            outbox,
            fills: DashMap::new(),
        }
    }

    pub fn handle_batch(&self, batch: LogBatch) {
        for entry in batch.entries {
            self.handle_entry(batch.symbol_id, entry);
        }
    }

    fn handle_entry(&self, symbol_id: crate::core_types::SymbolId, entry: LogEntry) {
        match entry {
            LogEntry::Open { book_order, .. } => {
                self.persist_order_status(book_order.order_id, OrderStatus::Active);
            }
            LogEntry::Match { trade, .. } => {
                let Some(info) = self.symbols.get_symbol_info_by_id(symbol_id) else {
                    tracing::error!(symbol_id, "settlement saw a Match for an unknown symbol");
                    return;
                };
                let base_asset = info.base_asset_id;
                let quote_asset = info.quote_asset_id;
                let qty = trade.quantity.to_raw();
                let price = trade.price.to_raw();
                let quote_amount = info.calculate_quote_qty(price, qty);

                // No `.await` between these four calls: the whole step runs
                // to completion before this task yields, giving it the
                // same atomicity a single-writer transaction would (§4.5).
                if let Err(err) = self
                    .ledger
                    .settle_debit_frozen(trade.buyer_id, quote_asset, quote_amount.into())
                {
                    tracing::error!(%err, order=trade.buy_order_id, "settle_debit_frozen(buyer, quote) failed");
                }
                if let Err(err) = self
                    .ledger
                    .settle_credit_available(trade.buyer_id, base_asset, qty.into())
                {
                    tracing::error!(%err, order=trade.buy_order_id, "settle_credit_available(buyer, base) failed");
                }
                if let Err(err) = self
                    .ledger
                    .settle_debit_frozen(trade.seller_id, base_asset, qty.into())
                {
                    tracing::error!(%err, order=trade.sell_order_id, "settle_debit_frozen(seller, base) failed");
                }
                if let Err(err) = self.ledger.settle_credit_available(
                    trade.seller_id,
                    quote_asset,
                    quote_amount.into(),
                ) {
                    tracing::error!(%err, order=trade.sell_order_id, "settle_credit_available(seller, quote) failed");
                }

                self.accumulate_fill(trade.buy_order_id, qty, price);
                self.accumulate_fill(trade.sell_order_id, qty, price);

                self.enqueue_balance_snapshot(trade.buyer_id, base_asset);
                self.enqueue_balance_snapshot(trade.buyer_id, quote_asset);
                self.enqueue_balance_snapshot(trade.seller_id, base_asset);
                self.enqueue_balance_snapshot(trade.seller_id, quote_asset);

                if let Err(err) = self.outbox.enqueue_trade(TradeRow {
                    id: trade.id as i64,
                    trading_pair_id: symbol_id as i32,
                    buy_order_id: trade.buy_order_id as i64,
                    sell_order_id: trade.sell_order_id as i64,
                    buyer_id: trade.buyer_id as i64,
                    seller_id: trade.seller_id as i64,
                    price: info.price_as_decimal(price),
                    quantity: info.qty_as_decimal(qty),
                    executed_at: trade.executed_at,
                }) {
                    tracing::error!(%err, trade_id = trade.id, "failed to enqueue trade for persistence");
                }
            }
            LogEntry::Done {
                order_id,
                side,
                remaining,
                residual_freeze,
                reason,
                ..
            } => {
                self.unfreeze_residual(order_id, side, residual_freeze, reason);
                self.persist_order_status(order_id, reason.into());
            }
        }
    }

    fn accumulate_fill(&self, order_id: OrderId, qty: u64, price: u64) {
        let mut state = self.fills.entry(order_id).or_default();
        state.filled_qty = state.filled_qty.saturating_add(qty);
        state.notional_sum = state
            .notional_sum
            .saturating_add(price as u128 * qty as u128);
    }

    /// Unfreezes whatever a terminal `Done` leaves over-frozen. A limit buy
    /// freezes its own limit price's notional at submission; once the book
    /// is done with it (filled, or cancelled with size left over) anything
    /// still frozen beyond what actually got spent - price improvement on
    /// the matched portion, an unmatched remainder, or both - is released.
    /// That reconciliation runs on every reason, not only `Cancelled`: a
    /// limit buy that fills in full at a better price than its limit still
    /// leaves a gap between frozen and spent that nothing else closes.
    /// Sell-side and market-order freezes are exact quantities/budgets the
    /// engine already tracks precisely, so they keep the old
    /// `residual_freeze`-driven, cancel-only path.
    fn unfreeze_residual(&self, order_id: OrderId, side: Side, residual: ResidualFreeze, reason: DoneReason) {
        let Some(meta) = self.registry.get(order_id) else {
            tracing::error!(order_id, "no OrderMeta for residual unfreeze");
            return;
        };
        let Some(info) = self.symbols.get_symbol_info_by_id(meta.symbol_id) else {
            return;
        };

        if side == Side::Buy && meta.order_type == OrderType::Limit {
            let Some(price) = meta.price else { return };
            let frozen = info.calculate_quote_qty(price.to_raw(), meta.quantity.to_raw());
            let spent = self.spent_notional(order_id, info);
            let amount = frozen.saturating_sub(spent);
            if amount > 0 {
                if let Err(err) = self
                    .ledger
                    .unfreeze(meta.user_id, info.quote_asset_id, amount.into())
                {
                    tracing::error!(%err, order_id, "limit buy residual unfreeze failed");
                }
                self.enqueue_balance_snapshot(meta.user_id, info.quote_asset_id);
            }
            return;
        }

        if reason != DoneReason::Cancelled {
            return;
        }
        let (asset_id, amount) = match residual {
            ResidualFreeze::None => return,
            ResidualFreeze::Limit { size, .. } => (info.base_asset_id, size),
            ResidualFreeze::MarketBuyFunds { funds } => (info.quote_asset_id, funds),
            ResidualFreeze::MarketSellSize { size } => (info.base_asset_id, size),
        };
        if amount == 0 {
            return;
        }
        if let Err(err) = self.ledger.unfreeze(meta.user_id, asset_id, amount.into()) {
            tracing::error!(%err, order_id, "residual unfreeze failed");
        }
        self.enqueue_balance_snapshot(meta.user_id, asset_id);
    }

    /// Total executed notional for an order so far, in quote-asset raw
    /// units (`Σ price_i * qty_i / qty_unit`, the same normalization
    /// `SymbolInfo::calculate_quote_qty` applies to a single fill).
    fn spent_notional(&self, order_id: OrderId, info: &crate::symbol_manager::SymbolInfo) -> u64 {
        let Some(state) = self.fills.get(&order_id) else {
            return 0;
        };
        let qty_unit = info.qty_unit().to_raw().max(1) as u128;
        (state.notional_sum / qty_unit) as u64
    }

    fn persist_order_status(&self, order_id: OrderId, status: OrderStatus) {
        let Some(meta) = self.registry.get(order_id) else {
            tracing::error!(order_id, "no OrderMeta when persisting order status");
            return;
        };
        let state = self.fills.get(&order_id).map(|s| *s).unwrap_or_default();
        let info = self.symbols.get_symbol_info_by_id(meta.symbol_id);
        let avg_price_raw = if state.filled_qty > 0 {
            (state.notional_sum / state.filled_qty as u128) as u64
        } else {
            0
        };
        let (price_dec, qty_dec, filled_dec, avg_dec) = match info {
            Some(info) => (
                meta.price.map(|p| info.price_as_decimal(p.to_raw())),
                info.qty_as_decimal(meta.quantity.to_raw()),
                info.qty_as_decimal(state.filled_qty),
                info.price_as_decimal(avg_price_raw),
            ),
            None => (None, meta.quantity.to_raw().into(), state.filled_qty.into(), avg_price_raw.into()),
        };
        if let Err(err) = self.outbox.enqueue_order(OrderRow {
            id: order_id as i64,
            user_id: meta.user_id as i64,
            trading_pair_id: meta.symbol_id as i32,
            side: meta.side as i16,
            order_type: meta.order_type as i16,
            status: status as i16,
            price: price_dec,
            quantity: qty_dec,
            filled_quantity: filled_dec,
            avg_price: avg_dec,
            created_at: meta.created_at,
            updated_at: chrono::Utc::now(),
        }) {
            tracing::error!(%err, order_id, "failed to enqueue order for persistence");
        }
    }

    fn enqueue_balance_snapshot(&self, user_id: crate::core_types::UserId, asset_id: crate::core_types::AssetId) {
        let Some(name) = self.symbols.get_asset_name(asset_id) else {
            return;
        };
        let snap = self.ledger.get(user_id, asset_id);
        let decimals = self.symbols.get_asset_internal_scale(asset_id).unwrap_or(8);
        let unit = Decimal::from(10u64.pow(decimals));
        if let Err(err) = self.outbox.enqueue_balance(BalanceItem {
            user_id: user_id as i64,
            symbol: name,
            available: Decimal::from(snap.available) / unit,
            frozen: Decimal::from(snap.frozen) / unit,
        }) {
            tracing::error!(%err, user_id, asset_id, "failed to enqueue balance snapshot for persistence");
        }
    }
}

/// Runs Settlement against a symbol's broadcast log stream until the
/// channel closes (engine shutdown) or lags.
pub async fn run(settlement: Arc<Settlement>, mut log_rx: broadcast::Receiver<LogBatch>) {
    loop {
        match log_rx.recv().await {
            Ok(batch) => settlement.handle_batch(batch),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "settlement lagged behind the engine log stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, OrderMeta, OrderType};
    use crate::money::ScaledAmount;
    use chrono::Utc;

    fn setup() -> (Arc<Settlement>, Arc<BalanceLedger>, Arc<SymbolManager>, Arc<OrderRegistry>) {
        let mut mgr = SymbolManager::new();
        mgr.add_asset(1, 8, 8, "BTC");
        mgr.add_asset(2, 8, 2, "USDT");
        mgr.insert_symbol("BTCUSDT", 1, 1, 2, 2, 2, 100, 100_000_000_00, true)
            .unwrap();
        let symbols = Arc::new(mgr);
        let ledger = Arc::new(BalanceLedger::new());
        let registry = Arc::new(OrderRegistry::new());
        let outbox = Arc::new(Outbox::new(1000));
        let settlement = Arc::new(Settlement::new(
            ledger.clone(),
            symbols.clone(),
            registry.clone(),
            outbox,
        ));
        (settlement, ledger, symbols, registry)
    }

    #[test]
    fn match_moves_funds_both_directions() {
        let (settlement, ledger, _symbols, registry) = setup();
        ledger.deposit(10, 1, ScaledAmount::from(1_000_000u64)).unwrap();
        ledger.freeze(10, 1, ScaledAmount::from(1_000_000u64)).unwrap();
        ledger.deposit(20, 2, ScaledAmount::from(1_000_000u64)).unwrap();
        ledger.freeze(20, 2, ScaledAmount::from(1_000_000u64)).unwrap();

        let sell_meta = OrderMeta::from_order(&Order::new_pending(
            1, 10, 1, Side::Sell, OrderType::Limit,
            Some(ScaledAmount::from(100u64)), ScaledAmount::from(1_000_000u64), None, Utc::now(),
        ));
        let buy_meta = OrderMeta::from_order(&Order::new_pending(
            2, 20, 1, Side::Buy, OrderType::Limit,
            Some(ScaledAmount::from(100u64)), ScaledAmount::from(1_000_000u64), None, Utc::now(),
        ));
        registry.insert(1, sell_meta);
        registry.insert(2, buy_meta);

        let trade = crate::models::Trade {
            id: 1,
            symbol_id: 1,
            buy_order_id: 2,
            sell_order_id: 1,
            buyer_id: 20,
            seller_id: 10,
            price: ScaledAmount::from(100u64),
            quantity: ScaledAmount::from(1_000_000u64),
            fee: ScaledAmount::from(0u64),
            executed_at: Utc::now(),
        };
        settlement.handle_entry(1, LogEntry::Match { seq: 1, symbol_id: 1, ts: Utc::now(), trade_seq: 1, trade, taker_side: Side::Buy });

        let seller_base = ledger.get(10, 1);
        let buyer_base = ledger.get(20, 1);
        assert_eq!(seller_base.frozen, 0);
        assert_eq!(buyer_base.available, 1_000_000);
    }

    #[test]
    fn cancelled_limit_buy_unfreezes_residual_notional() {
        let (settlement, ledger, symbols, registry) = setup();
        ledger.deposit(1, 2, ScaledAmount::from(10_000_000u64)).unwrap();
        ledger.freeze(1, 2, ScaledAmount::from(10_000_000u64)).unwrap();

        let meta = OrderMeta::from_order(&Order::new_pending(
            1, 1, 1, Side::Buy, OrderType::Limit,
            Some(ScaledAmount::from(100u64)), ScaledAmount::from(500_000u64), None, Utc::now(),
        ));
        registry.insert(1, meta);

        let info = symbols.get_symbol_info_by_id(1).unwrap();
        let residual_notional = info.calculate_quote_qty(100, 500_000);

        settlement.handle_entry(
            1,
            LogEntry::Done {
                seq: 1,
                symbol_id: 1,
                ts: Utc::now(),
                order_id: 1,
                user_id: 1,
                side: Side::Buy,
                remaining: 500_000,
                residual_freeze: ResidualFreeze::Limit { size: 500_000, price: 100 },
                reason: DoneReason::Cancelled,
            },
        );

        let snap = ledger.get(1, 2);
        assert_eq!(snap.available, 10_000_000 - (10_000_000 - residual_notional));
        assert_eq!(snap.frozen, 10_000_000 - residual_notional);
    }

    /// A limit buy that fills completely at a better price than its own
    /// limit (maker price below the taker's limit) still over-froze the
    /// difference at submission - the `Done` reason here is `Filled`, not
    /// `Cancelled`, so the old cancel-only unfreeze would have left this
    /// gap stuck frozen forever.
    #[test]
    fn filled_limit_buy_with_price_improvement_unfreezes_the_gap() {
        let (settlement, ledger, symbols, registry) = setup();
        ledger.deposit(1, 2, ScaledAmount::from(30_050u64)).unwrap();
        ledger.freeze(1, 2, ScaledAmount::from(30_050u64)).unwrap();
        ledger.deposit(2, 1, ScaledAmount::from(100_000_000u64)).unwrap();
        ledger.freeze(2, 1, ScaledAmount::from(100_000_000u64)).unwrap();

        let buy_meta = OrderMeta::from_order(&Order::new_pending(
            1, 1, 1, Side::Buy, OrderType::Limit,
            Some(ScaledAmount::from(30_050u64)), ScaledAmount::from(100_000_000u64), None, Utc::now(),
        ));
        let sell_meta = OrderMeta::from_order(&Order::new_pending(
            2, 2, 1, Side::Sell, OrderType::Limit,
            Some(ScaledAmount::from(30_000u64)), ScaledAmount::from(100_000_000u64), None, Utc::now(),
        ));
        registry.insert(1, buy_meta);
        registry.insert(2, sell_meta);

        let info = symbols.get_symbol_info_by_id(1).unwrap();
        let spent = info.calculate_quote_qty(30_000, 100_000_000);

        let trade = crate::models::Trade {
            id: 1,
            symbol_id: 1,
            buy_order_id: 1,
            sell_order_id: 2,
            buyer_id: 1,
            seller_id: 2,
            price: ScaledAmount::from(30_000u64),
            quantity: ScaledAmount::from(100_000_000u64),
            fee: ScaledAmount::from(0u64),
            executed_at: Utc::now(),
        };
        settlement.handle_entry(1, LogEntry::Match { seq: 1, symbol_id: 1, ts: Utc::now(), trade_seq: 1, trade, taker_side: Side::Buy });
        settlement.handle_entry(
            1,
            LogEntry::Done {
                seq: 2,
                symbol_id: 1,
                ts: Utc::now(),
                order_id: 1,
                user_id: 1,
                side: Side::Buy,
                remaining: 0,
                residual_freeze: ResidualFreeze::None,
                reason: DoneReason::Filled,
            },
        );

        let buyer_quote = ledger.get(1, 2);
        assert_eq!(buyer_quote.frozen, 0);
        assert_eq!(buyer_quote.available, 30_050 - spent);
    }
}
