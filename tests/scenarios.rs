//! End-to-end scenarios exercising the full Intake -> Engine -> Settlement ->
//! Ledger pipeline together, the way a single engine actor and its
//! settlement task would see it in production - just driven synchronously,
//! one command at a time, so each assertion lines up with a specific step.

use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use spot_matching_core::core_types::{OrderId, SymbolId};
use spot_matching_core::engine::{BestPrices, EngineError, MatchingEngine};
use spot_matching_core::intake::{IntakeError, OrderIntake};
use spot_matching_core::ledger::BalanceLedger;
use spot_matching_core::messages::{LogBatch, SubmitRequest};
use spot_matching_core::models::{LogEntry, Order, OrderMeta, OrderRegistry, OrderType, Side};
use spot_matching_core::money::ScaledAmount;
use spot_matching_core::symbol_manager::SymbolManager;

const BTC: u32 = 1;
const USDT: u32 = 2;
const BTCUSDT: SymbolId = 1;

fn btcusdt_market() -> SymbolManager {
    let mut mgr = SymbolManager::new();
    mgr.add_asset(BTC, 8, 8, "BTC");
    mgr.add_asset(USDT, 8, 2, "USDT");
    mgr.insert_symbol("BTCUSDT", BTCUSDT, BTC, USDT, 2, 2, 100, 100_000_000_00, true)
        .unwrap();
    mgr
}

/// Bundles one symbol's worth of pipeline state and drives it the way
/// `engine::run` + `settlement::run` would, minus the actor/channel
/// plumbing - each call below is one inbound message, end to end.
struct Harness {
    symbols: Arc<SymbolManager>,
    ledger: Arc<BalanceLedger>,
    registry: Arc<OrderRegistry>,
    prices: Arc<DashMap<SymbolId, BestPrices>>,
    engine: MatchingEngine,
    settlement: Arc<spot_matching_core::settlement::Settlement>,
    exempt: FxHashSet<u64>,
}

impl Harness {
    fn new() -> Self {
        let symbols = Arc::new(btcusdt_market());
        let qty_unit = symbols.get_symbol_info_by_id(BTCUSDT).unwrap().qty_unit().to_raw();
        let ledger = Arc::new(BalanceLedger::new());
        let registry = Arc::new(OrderRegistry::new());
        let outbox = Arc::new(spot_matching_core::outbox::Outbox::new(1024));
        let settlement = Arc::new(spot_matching_core::settlement::Settlement::new(
            ledger.clone(),
            symbols.clone(),
            registry.clone(),
            outbox,
        ));
        Self {
            symbols,
            ledger,
            registry,
            prices: Arc::new(DashMap::new()),
            engine: MatchingEngine::new(BTCUSDT, qty_unit),
            settlement,
            exempt: FxHashSet::default(),
        }
    }

    fn deposit(&self, user_id: u64, asset_id: u32, amount: u64) {
        self.ledger
            .deposit(user_id, asset_id, ScaledAmount::from(amount))
            .unwrap();
    }

    /// Runs one `SubmitRequest` through Intake, the engine, and Settlement,
    /// then refreshes the best-price cache exactly as `engine::run` does
    /// after every command (§4.3).
    fn submit(&mut self, req: SubmitRequest) -> Result<Vec<LogEntry>, IntakeError> {
        let intake = OrderIntake::new(
            &self.symbols,
            &self.ledger,
            &self.prices,
            &self.registry,
            &self.exempt,
            next_order_id(),
        );
        let order = intake.process(req)?;
        self.registry.insert(order.id, OrderMeta::from_order(&order));
        let entries = self.submit_order(order);
        Ok(entries)
    }

    fn submit_order(&mut self, order: Order) -> Vec<LogEntry> {
        let entries = self.engine.submit(order).unwrap();
        self.settle(entries.clone());
        self.refresh_prices();
        entries
    }

    fn cancel(&mut self, order_id: OrderId, user_id: u64, side: Side) -> Vec<LogEntry> {
        let (_, entries) = self.engine.cancel(order_id, user_id, side);
        self.settle(entries.clone());
        self.refresh_prices();
        entries
    }

    fn settle(&self, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        self.settlement.handle_batch(LogBatch {
            symbol_id: BTCUSDT,
            entries,
        });
    }

    fn refresh_prices(&self) {
        self.prices.insert(
            BTCUSDT,
            BestPrices {
                best_bid: self.engine.book().best_bid(),
                best_ask: self.engine.book().best_ask(),
            },
        );
    }
}

// Intake assigns order ids; tests only need them to be unique within a run.
fn next_order_id() -> OrderId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn limit(user_id: u64, side: Side, price: &str, qty: &str) -> SubmitRequest {
    SubmitRequest {
        user_id,
        symbol: "BTCUSDT".to_string(),
        side,
        order_type: OrderType::Limit,
        price: Some(price.parse().unwrap()),
        quantity: qty.parse().unwrap(),
    }
}

fn market(user_id: u64, side: Side, qty: &str) -> SubmitRequest {
    SubmitRequest {
        user_id,
        symbol: "BTCUSDT".to_string(),
        side,
        order_type: OrderType::Market,
        price: None,
        quantity: qty.parse().unwrap(),
    }
}

/// Scenario A - crossing limit orders (§8). U1 rests a sell at 30000, U2
/// crosses with a buy at 30050; they trade at the resting price, 30000, so
/// U2's own notional freeze (based on its 30050 limit) leaves a 0.05 USDT
/// price-improvement gap that unfreezes once the order is Done.
#[test]
fn scenario_a_crossing_limit_orders() {
    let mut h = Harness::new();
    h.deposit(1, BTC, 100_000_000); // 1.00000000 BTC
    h.deposit(2, USDT, 10_000_000); // 100000.00 USDT

    h.submit(limit(1, Side::Sell, "30000", "0.001")).unwrap();
    let u1_btc = h.ledger.get(1, BTC);
    assert_eq!(u1_btc.available, 100_000_000 - 100_000);
    assert_eq!(u1_btc.frozen, 100_000);

    let entries = h.submit(limit(2, Side::Buy, "30050", "0.001")).unwrap();
    assert!(matches!(entries[0], LogEntry::Match { .. }));
    let done_count = entries.iter().filter(|e| matches!(e, LogEntry::Done { .. })).count();
    assert_eq!(done_count, 2);

    let u1_btc = h.ledger.get(1, BTC);
    let u2_btc = h.ledger.get(2, BTC);
    let u1_usdt = h.ledger.get(1, USDT);
    let u2_usdt = h.ledger.get(2, USDT);
    assert_eq!(u1_btc.frozen, 0);
    assert_eq!(u2_btc.available, 100_000);
    assert_eq!(u1_usdt.available, 3000); // credited 30 USDT at trade price
    assert_eq!(u2_usdt.frozen, 0); // price-improvement residual unfrozen on Done
}

/// Scenario B - FIFO at a price level (§8). Two asks at the same price;
/// a buy smaller than their combined size only fills the older one.
#[test]
fn scenario_b_fifo_at_a_level() {
    let mut h = Harness::new();
    h.deposit(10, BTC, 100_000_000);
    h.deposit(11, BTC, 100_000_000);
    h.deposit(20, USDT, 10_000_000);

    let a1 = h.submit(limit(10, Side::Sell, "30000", "0.002")).unwrap();
    let a1_id = match &a1[0] {
        LogEntry::Open { book_order, .. } => book_order.order_id,
        _ => panic!("expected Open"),
    };
    h.submit(limit(11, Side::Sell, "30000", "0.001")).unwrap();

    let entries = h.submit(limit(20, Side::Buy, "30000", "0.002")).unwrap();
    let matched_sellers: Vec<_> = entries
        .iter()
        .filter_map(|e| match e {
            LogEntry::Match { trade, .. } => Some(trade.sell_order_id),
            _ => None,
        })
        .collect();
    assert_eq!(matched_sellers, vec![a1_id]);
    assert!(!h.engine.book().contains(a1_id));
}

/// Scenario C - market buy against an empty book is rejected at Intake,
/// before it ever reaches the engine or touches a balance (§8).
#[test]
fn scenario_c_market_buy_no_liquidity() {
    let mut h = Harness::new();
    h.deposit(30, USDT, 10_000_000);

    let err = h.submit(market(30, Side::Buy, "1")).unwrap_err();
    assert!(matches!(err, IntakeError::NoLiquidity));

    let snap = h.ledger.get(30, USDT);
    assert_eq!(snap.available, 10_000_000);
    assert_eq!(snap.frozen, 0);
}

/// Scenario D - partial fill then cancel (§8). A resting sell takes a
/// partial hit, then the seller cancels the remainder; the unfilled base
/// quantity unfreezes, and the quote credit from the earlier match stands.
#[test]
fn scenario_d_partial_fill_then_cancel() {
    let mut h = Harness::new();
    h.deposit(40, BTC, 100_000_000); // seller: 1.00000000 BTC
    h.deposit(41, USDT, 10_000_000); // buyer: 100000.00 USDT

    let open = h.submit(limit(40, Side::Sell, "100", "1")).unwrap();
    let seller_id = match &open[0] {
        LogEntry::Open { book_order, .. } => book_order.order_id,
        _ => panic!("expected Open"),
    };

    h.submit(limit(41, Side::Buy, "100", "0.4")).unwrap();
    let seller_btc = h.ledger.get(40, BTC);
    assert_eq!(seller_btc.frozen, 100_000_000 - 40_000_000);
    let seller_usdt = h.ledger.get(40, USDT);
    assert_eq!(seller_usdt.available, 4000); // 0.4 * 100 credited at the match

    h.cancel(seller_id, 40, Side::Sell);
    let seller_btc = h.ledger.get(40, BTC);
    assert_eq!(seller_btc.frozen, 0);
    assert_eq!(seller_btc.available, 100_000_000 - 40_000_000);
}

/// Scenario E - idempotent resubmit (§8). Resubmitting the exact same
/// `Order` (same id) a second time must be a pure no-op: no second Trade,
/// no further ledger movement.
#[test]
fn scenario_e_idempotent_resubmit() {
    let mut h = Harness::new();
    h.deposit(50, BTC, 100_000_000);
    h.deposit(51, USDT, 10_000_000);

    h.submit(limit(50, Side::Sell, "100", "0.5")).unwrap();
    let buy = Order::new_pending(
        999,
        51,
        BTCUSDT,
        Side::Buy,
        OrderType::Limit,
        Some(ScaledAmount::from(10000u64)),
        ScaledAmount::from(50_000_000u64),
        None,
        chrono::Utc::now(),
    );
    h.registry.insert(buy.id, OrderMeta::from_order(&buy));

    let first = h.submit_order(buy.clone());
    assert!(!first.is_empty());
    let before = h.ledger.get(51, USDT);

    let second = h.submit_order(buy);
    assert!(second.is_empty());
    let after = h.ledger.get(51, USDT);
    assert_eq!(before.available, after.available);
    assert_eq!(before.frozen, after.frozen);
}

/// Scenario F - market buy residual refund (§8). A market buy's slippage
/// buffer exceeds what the book can actually fill; the unspent buffer
/// unfreezes back to available once the order is Done.
#[test]
fn scenario_f_market_buy_residual_refund() {
    let mut h = Harness::new();
    h.deposit(60, BTC, 100_000_000);
    h.deposit(61, USDT, 10_000_000);

    h.submit(limit(60, Side::Sell, "100", "0.5")).unwrap();
    let entries = h.submit(market(61, Side::Buy, "1")).unwrap();

    let matched: u64 = entries
        .iter()
        .filter_map(|e| match e {
            LogEntry::Match { trade, .. } => Some(trade.quantity.to_raw()),
            _ => None,
        })
        .sum();
    assert_eq!(matched, 50_000_000); // 0.5 BTC, all the resting liquidity

    let buyer_btc = h.ledger.get(61, BTC);
    assert_eq!(buyer_btc.available, 50_000_000);

    let buyer_usdt = h.ledger.get(61, USDT);
    assert_eq!(buyer_usdt.frozen, 0); // spent 50, remaining buffer unfrozen
    assert_eq!(buyer_usdt.available, 10_000_000 - 5000); // only the 50 USDT spent is gone
}

/// `restore_resting` rejects an order id the book already has marked
/// processed - the defensive check a corrupt recovery source would trip.
#[test]
fn restore_resting_rejects_already_processed_id() {
    let mut h = Harness::new();
    h.deposit(70, BTC, 100_000_000);
    let open = h.submit(limit(70, Side::Sell, "100", "0.1")).unwrap();
    let resting_id = match &open[0] {
        LogEntry::Open { book_order, .. } => book_order.order_id,
        _ => panic!("expected Open"),
    };

    let dup = Order::new_pending(
        resting_id,
        70,
        BTCUSDT,
        Side::Sell,
        OrderType::Limit,
        Some(ScaledAmount::from(10000u64)),
        ScaledAmount::from(10_000_000u64),
        None,
        chrono::Utc::now(),
    );
    let err = h.engine.restore_resting(&dup).unwrap_err();
    assert!(matches!(err, EngineError::CorruptBook(_)));
}
