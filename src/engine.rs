//! Matching Engine Core (§4.3): one single-writer actor per symbol,
//! consuming `Submit`/`Cancel` in arrival order and emitting an ordered
//! `Open`/`Match`/`Done` log.

use crate::core_types::{OrderId, SymbolId, UserId};
use crate::messages::{CancelOutcome, EngineCommand, LogBatch};
use crate::models::{
    BookOrder, DoneReason, LogEntry, Order, OrderType, ResidualFreeze, Side, Trade,
};
use crate::orderbook::OrderBook;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// Best bid/ask for a symbol, refreshed by the engine actor after every
/// command it processes. Intake consults this (never the book itself,
/// which is private to the actor) to derive a market-buy `estimatedPrice`
/// and to detect the `NoLiquidity` edge case (§4.4) without taking a lock
/// shared with the matching hot path.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestPrices {
    pub best_bid: Option<u64>,
    pub best_ask: Option<u64>,
}

pub type BestPriceCache = Arc<DashMap<SymbolId, BestPrices>>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Must be impossible under the §4 contracts - Intake assigns order ids
    /// monotonically and the book's `processedOrderIds` guard is checked
    /// first. Its triggering is a bug, not a recoverable condition.
    #[error("duplicate order id {0} reached the book after the idempotence guard")]
    DuplicateOrderId(OrderId),
    /// Warm-start replay (`restore_resting`) saw an order id already marked
    /// processed on a freshly constructed book - the recovery source (the
    /// persisted `orders` table) is internally inconsistent.
    #[error("recovery replay found order {0} already marked processed on a fresh book")]
    CorruptBook(OrderId),
}

/// Operator-visibility counters for one symbol's actor, in the shape of the
/// teacher's `UBSCoreStats` (§ engine statistics). Updated by `run` after
/// each command; never consulted by the matching logic itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
    pub orders_submitted: u64,
    pub orders_opened: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub trades_executed: u64,
    pub cancel_requests: u64,
}

/// Default channel capacity for the engine's inbound command queue. Callers
/// await (backpressure) once full, per the concurrency model's bounded
/// channel requirement (§5).
pub const COMMAND_CHANNEL_CAPACITY: usize = 4096;
/// Log stream subscribers that fall behind simply miss batches (lagged);
/// this channel exists for fan-out, not for guaranteed delivery - Settlement
/// and the Outbox each hold their own durable queue downstream of it.
const LOG_CHANNEL_CAPACITY: usize = 8192;

pub struct MatchingEngine {
    symbol_id: SymbolId,
    /// Base-asset scale factor (`SymbolInfo::qty_unit`), needed to convert
    /// between a market buy's quote-funds budget and base-asset trade size
    /// without going through `SymbolManager` on the matching hot path.
    qty_unit: u64,
    book: OrderBook,
    log_seq: u64,
    trade_seq: u64,
    stats: EngineStats,
}

impl MatchingEngine {
    pub fn new(symbol_id: SymbolId, qty_unit: u64) -> Self {
        Self {
            symbol_id,
            qty_unit,
            book: OrderBook::new(),
            log_seq: 0,
            trade_seq: 0,
            stats: EngineStats::default(),
        }
    }

    /// Warm-start constructor (§5 "Recovery"): counters resume at
    /// `max persisted value + 1`; resting orders are replayed by the caller
    /// via `restore_resting`.
    pub fn recover(symbol_id: SymbolId, qty_unit: u64, last_log_seq: u64, last_trade_seq: u64) -> Self {
        Self {
            symbol_id,
            qty_unit,
            book: OrderBook::new(),
            log_seq: last_log_seq,
            trade_seq: last_trade_seq,
            stats: EngineStats::default(),
        }
    }

    /// Re-inserts a resting Active/PartiallyFilled order into a freshly
    /// recovered book, bypassing matching. Used only during warm start.
    pub fn restore_resting(&mut self, order: &Order) -> Result<(), EngineError> {
        if self.book.is_processed(order.id) {
            return Err(EngineError::CorruptBook(order.id));
        }
        self.book
            .insert(BookOrder::from_order(order))
            .map_err(|_| EngineError::DuplicateOrderId(order.id))?;
        self.book.mark_processed(order.id);
        Ok(())
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Submit algorithm (§4.3). Returns the ordered log entries produced;
    /// an already-processed order id yields an empty list (idempotence).
    pub fn submit(&mut self, order: Order) -> Result<Vec<LogEntry>, EngineError> {
        if self.book.is_processed(order.id) {
            return Ok(Vec::new());
        }
        self.stats.orders_submitted += 1;

        let now = Utc::now();
        let side = order.side;
        let order_type = order.order_type;
        let limit_price = order.price.map(|p| p.to_raw());
        let order_id = order.id;
        let user_id = order.user_id;

        let mut taker_size = order.quantity.to_raw();
        let mut taker_funds = order.quote_budget.map(|f| f.to_raw());

        let mut entries = Vec::new();
        let symbol_id = self.symbol_id;
        let qty_unit = self.qty_unit.max(1) as u128;
        let log_seq = &mut self.log_seq;
        let trade_seq = &mut self.trade_seq;

        self.book.match_against(side, |maker: &BookOrder| {
            if order_type == OrderType::Limit {
                let price = limit_price.expect("limit order always carries a price");
                let worse = match side {
                    Side::Buy => maker.price > price,
                    Side::Sell => maker.price < price,
                };
                if worse {
                    return None;
                }
            }

            let trade_price = maker.price;
            let trade_size = match order_type {
                OrderType::Market if side == Side::Buy => {
                    let funds = taker_funds.unwrap_or(0);
                    if funds == 0 {
                        return None;
                    }
                    // funds * qty_unit / price, truncated toward zero to the
                    // base unit - the inverse of SymbolInfo::calculate_quote_qty,
                    // kept in raw `u64`s since the engine never touches SymbolManager.
                    let candidate =
                        (funds as u128 * qty_unit / trade_price.max(1) as u128) as u64;
                    candidate.min(maker.size)
                }
                _ => taker_size.min(maker.size),
            };

            if trade_size == 0 {
                return None;
            }

            let maker_exhausted = trade_size >= maker.size;

            let (buy_order_id, sell_order_id, buyer_id, seller_id) = match side {
                Side::Buy => (order_id, maker.order_id, user_id, maker.user_id),
                Side::Sell => (maker.order_id, order_id, maker.user_id, user_id),
            };

            *trade_seq += 1;
            let this_trade_seq = *trade_seq;
            *log_seq += 1;
            let trade = Trade {
                id: this_trade_seq,
                symbol_id,
                buy_order_id,
                sell_order_id,
                buyer_id,
                seller_id,
                price: trade_price.into(),
                quantity: trade_size.into(),
                fee: 0u64.into(),
                executed_at: now,
            };
            entries.push(LogEntry::Match {
                seq: *log_seq,
                symbol_id,
                ts: now,
                trade_seq: this_trade_seq,
                trade,
                taker_side: side,
            });

            match order_type {
                OrderType::Market if side == Side::Buy => {
                    let spent = trade_size as u128 * trade_price as u128 / qty_unit;
                    taker_funds = Some(taker_funds.unwrap_or(0).saturating_sub(spent as u64));
                }
                _ => {
                    taker_size = taker_size.saturating_sub(trade_size);
                }
            }

            if maker_exhausted {
                *log_seq += 1;
                entries.push(LogEntry::Done {
                    seq: *log_seq,
                    symbol_id,
                    ts: now,
                    order_id: maker.order_id,
                    user_id: maker.user_id,
                    side: maker.side,
                    remaining: 0,
                    residual_freeze: ResidualFreeze::None,
                    reason: DoneReason::Filled,
                });
            }

            Some(trade_size)
        });

        let taker_exhausted = match order_type {
            OrderType::Market if side == Side::Buy => taker_funds.unwrap_or(0) == 0,
            _ => taker_size == 0,
        };

        if order_type == OrderType::Limit && !taker_exhausted {
            let book_order = BookOrder {
                order_id,
                user_id,
                side,
                order_type,
                price: limit_price.expect("limit order always carries a price"),
                size: taker_size,
                funds: None,
            };
            self.book
                .insert(book_order.clone())
                .map_err(|_| EngineError::DuplicateOrderId(order_id))?;
            self.log_seq += 1;
            entries.push(LogEntry::Open {
                seq: self.log_seq,
                symbol_id: self.symbol_id,
                ts: now,
                book_order,
            });
        } else {
            let (remaining, residual, reason) = match order_type {
                OrderType::Limit => (0, ResidualFreeze::None, DoneReason::Filled),
                OrderType::Market if side == Side::Sell => {
                    if taker_size == 0 {
                        (0, ResidualFreeze::None, DoneReason::Filled)
                    } else {
                        (
                            taker_size,
                            ResidualFreeze::MarketSellSize { size: taker_size },
                            DoneReason::Cancelled,
                        )
                    }
                }
                OrderType::Market => {
                    let leftover = taker_funds.unwrap_or(0);
                    if leftover == 0 {
                        (0, ResidualFreeze::None, DoneReason::Filled)
                    } else {
                        (
                            leftover,
                            ResidualFreeze::MarketBuyFunds { funds: leftover },
                            DoneReason::Cancelled,
                        )
                    }
                }
            };
            self.log_seq += 1;
            entries.push(LogEntry::Done {
                seq: self.log_seq,
                symbol_id: self.symbol_id,
                ts: now,
                order_id,
                user_id,
                side,
                remaining,
                residual_freeze: residual,
                reason,
            });
        }

        self.book.mark_processed(order_id);
        self.accumulate_stats(&entries);
        Ok(entries)
    }

    /// Tallies `EngineStats` from a batch of log entries just produced.
    /// Entries are inspected rather than tallied inline during matching
    /// since the matching closure already holds a mutable borrow of `book`,
    /// not `stats`.
    fn accumulate_stats(&mut self, entries: &[LogEntry]) {
        for entry in entries {
            match entry {
                LogEntry::Match { .. } => self.stats.trades_executed += 1,
                LogEntry::Open { .. } => self.stats.orders_opened += 1,
                LogEntry::Done {
                    reason: DoneReason::Filled,
                    ..
                } => self.stats.orders_filled += 1,
                LogEntry::Done {
                    reason: DoneReason::Cancelled,
                    ..
                } => self.stats.orders_cancelled += 1,
            }
        }
    }

    /// Cancel algorithm (§4.3). The caller supplies `side` since a bare
    /// order id/user id pair doesn't carry it; Intake/persistence look this
    /// up from the Order row before dispatching the command.
    pub fn cancel(
        &mut self,
        order_id: OrderId,
        user_id: UserId,
        side: Side,
    ) -> (CancelOutcome, Vec<LogEntry>) {
        self.stats.cancel_requests += 1;
        self.book.mark_processed(order_id);
        let Some(removed) = self.book.remove_full(order_id) else {
            return (
                CancelOutcome {
                    cancelled: false,
                    remaining: 0,
                },
                Vec::new(),
            );
        };
        let remaining = removed.size;
        let residual_freeze = ResidualFreeze::Limit {
            size: removed.size,
            price: removed.price,
        };
        let now = Utc::now();
        self.log_seq += 1;
        let entry = LogEntry::Done {
            seq: self.log_seq,
            symbol_id: self.symbol_id,
            ts: now,
            order_id,
            user_id,
            side,
            remaining,
            residual_freeze,
            reason: DoneReason::Cancelled,
        };
        self.stats.orders_cancelled += 1;
        (
            CancelOutcome {
                cancelled: true,
                remaining,
            },
            vec![entry],
        )
    }
}

/// Runs the per-symbol actor: serially drains `Submit`/`Cancel` messages
/// from a bounded channel and broadcasts the resulting log batches.
///
/// Suspension points are exactly (a) awaiting the next command and (b)
/// the broadcast send, which is non-blocking (lagging receivers just miss
/// entries) - matching never yields mid-computation.
pub async fn run(
    mut engine: MatchingEngine,
    mut commands: mpsc::Receiver<EngineCommand>,
    log_tx: broadcast::Sender<LogBatch>,
    prices: BestPriceCache,
    snapshot_tx: crate::snapshot::SnapshotSender,
    snapshot_depth: usize,
) {
    while let Some(cmd) = commands.recv().await {
        let symbol_id = engine.symbol_id;
        match cmd {
            EngineCommand::Submit(order) => match engine.submit(*order) {
                Ok(entries) => {
                    if !entries.is_empty() {
                        let _ = log_tx.send(LogBatch { symbol_id, entries });
                    }
                }
                Err(err) => {
                    tracing::error!(%err, symbol_id, "engine invariant breach, halting actor");
                    return;
                }
            },
            EngineCommand::Cancel {
                order_id,
                user_id,
                side,
                reply,
            } => {
                let (outcome, entries) = engine.cancel(order_id, user_id, side);
                if !entries.is_empty() {
                    let _ = log_tx.send(LogBatch { symbol_id, entries });
                }
                let _ = reply.send(outcome);
            }
        }
        prices.insert(
            symbol_id,
            BestPrices {
                best_bid: engine.book().best_bid(),
                best_ask: engine.book().best_ask(),
            },
        );
        crate::snapshot::publish(&snapshot_tx, symbol_id, engine.book().snapshot(snapshot_depth));
    }
}

#[allow(clippy::type_complexity)]
pub fn spawn(
    symbol_id: SymbolId,
    qty_unit: u64,
    prices: BestPriceCache,
    snapshot_tx: crate::snapshot::SnapshotSender,
    snapshot_depth: usize,
) -> (mpsc::Sender<EngineCommand>, broadcast::Receiver<LogBatch>) {
    spawn_with(
        MatchingEngine::new(symbol_id, qty_unit),
        prices,
        snapshot_tx,
        snapshot_depth,
    )
}

/// Same as `spawn`, but starting from an already warm-started engine (§5
/// "Recovery") instead of a fresh one.
#[allow(clippy::type_complexity)]
pub fn spawn_with(
    engine: MatchingEngine,
    prices: BestPriceCache,
    snapshot_tx: crate::snapshot::SnapshotSender,
    snapshot_depth: usize,
) -> (mpsc::Sender<EngineCommand>, broadcast::Receiver<LogBatch>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (log_tx, log_rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    tokio::spawn(run(engine, cmd_rx, log_tx, prices, snapshot_tx, snapshot_depth));
    (cmd_tx, log_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::ScaledAmount;

    fn limit_order(id: OrderId, user: UserId, side: Side, price: u64, qty: u64) -> Order {
        Order::new_pending(
            id,
            user,
            1,
            side,
            OrderType::Limit,
            Some(ScaledAmount::from(price)),
            ScaledAmount::from(qty),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn crossing_limit_orders_produce_match_then_two_dones() {
        let mut engine = MatchingEngine::new(1, 1);
        let sell = limit_order(1, 10, Side::Sell, 30000, 1000);
        let open_entries = engine.submit(sell).unwrap();
        assert!(matches!(open_entries[0], LogEntry::Open { .. }));

        let buy = limit_order(2, 20, Side::Buy, 30050, 1000);
        let entries = engine.submit(buy).unwrap();
        assert!(matches!(entries[0], LogEntry::Match { .. }));
        let done_count = entries
            .iter()
            .filter(|e| matches!(e, LogEntry::Done { .. }))
            .count();
        assert_eq!(done_count, 2);
    }

    #[test]
    fn fifo_at_price_level() {
        let mut engine = MatchingEngine::new(1, 1);
        engine
            .submit(limit_order(1, 10, Side::Sell, 30000, 2000))
            .unwrap();
        engine
            .submit(limit_order(2, 11, Side::Sell, 30000, 1000))
            .unwrap();

        let entries = engine
            .submit(limit_order(3, 20, Side::Buy, 30000, 2000))
            .unwrap();
        let matched_sellers: Vec<_> = entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Match { trade, .. } => Some(trade.sell_order_id),
                _ => None,
            })
            .collect();
        assert_eq!(matched_sellers, vec![1]);
        assert!(engine.book().contains(2));
        assert!(!engine.book().contains(1));
    }

    #[test]
    fn idempotent_resubmit_is_noop() {
        let mut engine = MatchingEngine::new(1, 1);
        let order = limit_order(1, 10, Side::Buy, 100, 500);
        let first = engine.submit(order.clone()).unwrap();
        assert!(!first.is_empty());
        let second = engine.submit(order).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn market_sell_against_empty_book_is_cancelled() {
        let mut engine = MatchingEngine::new(1, 1);
        let order = Order::new_pending(
            1,
            10,
            1,
            Side::Sell,
            OrderType::Market,
            None,
            ScaledAmount::from(500u64),
            None,
            Utc::now(),
        );
        let entries = engine.submit(order).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0],
            LogEntry::Done {
                reason: DoneReason::Cancelled,
                remaining: 500,
                ..
            }
        ));
    }

    #[test]
    fn market_buy_consumes_funds_and_refunds_residual_via_done() {
        let mut engine = MatchingEngine::new(1, 1);
        engine
            .submit(limit_order(1, 10, Side::Sell, 100, 50))
            .unwrap();

        let order = Order::new_pending(
            2,
            20,
            1,
            Side::Buy,
            OrderType::Market,
            None,
            ScaledAmount::from(0u64),
            Some(ScaledAmount::from(10_100u64)),
            Utc::now(),
        );
        let entries = engine.submit(order).unwrap();
        let matched: u64 = entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Match { trade, .. } => Some(trade.quantity.to_raw()),
                _ => None,
            })
            .sum();
        assert_eq!(matched, 50);
        let done = entries
            .iter()
            .find(|e| matches!(e, LogEntry::Done { order_id: 2, .. }))
            .unwrap();
        assert!(matches!(
            done,
            LogEntry::Done {
                reason: DoneReason::Cancelled,
                remaining: 5100,
                ..
            }
        ));
    }

    #[test]
    fn cancel_unknown_order_is_noop() {
        let mut engine = MatchingEngine::new(1, 1);
        let (outcome, entries) = engine.cancel(999, 1, Side::Buy);
        assert!(!outcome.cancelled);
        assert!(entries.is_empty());
    }

    #[test]
    fn cancel_resting_order_returns_remaining() {
        let mut engine = MatchingEngine::new(1, 1);
        engine
            .submit(limit_order(1, 10, Side::Buy, 100, 500))
            .unwrap();
        let (outcome, entries) = engine.cancel(1, 10, Side::Buy);
        assert!(outcome.cancelled);
        assert_eq!(outcome.remaining, 500);
        assert_eq!(entries.len(), 1);
    }
}
