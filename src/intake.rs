//! Order Intake & Validation (§4.4): resolves a `SubmitRequest` against the
//! trading-pair registry, truncates and bounds-checks quantities, determines
//! the freeze amount for the order's type, and hands a persisted `Pending`
//! order to the engine.

use crate::core_types::{OrderId, SymbolId, UserId};
use crate::engine::BestPriceCache;
use crate::ledger::{BalanceLedger, LedgerError};
use crate::messages::{IntakeErrorKind, SubmitRequest};
use crate::models::{Order, OrderMeta, OrderRegistry, OrderType, Side};
use crate::money::ScaledAmount;
use crate::symbol_manager::SymbolManager;
use chrono::Utc;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Market-buy slippage buffer: freeze `quantity * estimatedPrice * 1.01`,
/// refunding the unused residual once the order settles (§4.4, §9).
const SLIPPAGE_NUMERATOR: u64 = 101;
const SLIPPAGE_DENOMINATOR: u64 = 100;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("unknown trading pair")]
    UnknownSymbol,
    #[error("trading pair is not active")]
    InactiveSymbol,
    #[error("quantity must be positive after truncation")]
    InvalidQuantity,
    #[error("limit order requires a positive price")]
    InvalidPrice,
    #[error("quantity outside the trading pair's [minQty, maxQty] bounds")]
    OutOfBounds,
    #[error("insufficient available balance")]
    InsufficientAvailable,
    #[error("market buy has no resting liquidity to estimate a price against")]
    NoLiquidity,
}

impl From<&IntakeError> for IntakeErrorKind {
    fn from(e: &IntakeError) -> Self {
        match e {
            IntakeError::UnknownSymbol => IntakeErrorKind::UnknownSymbol,
            IntakeError::InactiveSymbol => IntakeErrorKind::InactiveSymbol,
            IntakeError::InvalidQuantity => IntakeErrorKind::InvalidQuantity,
            IntakeError::InvalidPrice => IntakeErrorKind::InvalidPrice,
            IntakeError::OutOfBounds => IntakeErrorKind::OutOfBounds,
            IntakeError::InsufficientAvailable => IntakeErrorKind::InsufficientAvailable,
            IntakeError::NoLiquidity => IntakeErrorKind::NoLiquidity,
        }
    }
}

impl From<LedgerError> for IntakeError {
    fn from(_: LedgerError) -> Self {
        IntakeError::InsufficientAvailable
    }
}

/// Validates and freezes funds for one `SubmitRequest`, producing a
/// `Pending` order ready for `EngineCommand::Submit`. Order ids are
/// assigned monotonically here, satisfying the engine's expectation that
/// ids never repeat across a symbol's lifetime.
pub struct OrderIntake<'a> {
    symbols: &'a SymbolManager,
    ledger: &'a BalanceLedger,
    prices: &'a BestPriceCache,
    registry: &'a OrderRegistry,
    next_order_id: AtomicU64,
    /// Users exempt from pre-freeze (market makers providing firm two-sided
    /// quotes under a separate risk agreement); see §4.4 "Non-goals".
    market_maker_exempt: &'a FxHashSet<UserId>,
}

impl<'a> OrderIntake<'a> {
    pub fn new(
        symbols: &'a SymbolManager,
        ledger: &'a BalanceLedger,
        prices: &'a BestPriceCache,
        registry: &'a OrderRegistry,
        market_maker_exempt: &'a FxHashSet<UserId>,
        starting_order_id: OrderId,
    ) -> Self {
        Self {
            symbols,
            ledger,
            prices,
            registry,
            next_order_id: AtomicU64::new(starting_order_id),
            market_maker_exempt,
        }
    }

    fn allocate_order_id(&self) -> OrderId {
        self.next_order_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn process(&self, req: SubmitRequest) -> Result<Order, IntakeError> {
        let symbol_id = self
            .symbols
            .get_symbol_id(&req.symbol)
            .ok_or(IntakeError::UnknownSymbol)?;
        let info = self
            .symbols
            .get_symbol_info_by_id(symbol_id)
            .ok_or(IntakeError::UnknownSymbol)?;
        if !info.is_active {
            return Err(IntakeError::InactiveSymbol);
        }
        let base_asset = self
            .symbols
            .assets
            .get(&info.base_asset_id)
            .ok_or(IntakeError::UnknownSymbol)?;
        if !self.symbols.assets.contains_key(&info.quote_asset_id) {
            return Err(IntakeError::UnknownSymbol);
        }

        let quantity = base_asset.truncate_amount(req.quantity);
        if quantity.to_raw() == 0 {
            return Err(IntakeError::InvalidQuantity);
        }
        if !info.in_bounds(quantity.to_raw()) {
            return Err(IntakeError::OutOfBounds);
        }

        let price = match req.order_type {
            OrderType::Limit => {
                let p = req
                    .price
                    .map(|p| info.truncate_price(p))
                    .ok_or(IntakeError::InvalidPrice)?;
                if p.to_raw() == 0 {
                    return Err(IntakeError::InvalidPrice);
                }
                Some(p)
            }
            OrderType::Market => None,
        };

        let exempt = self.market_maker_exempt.contains(&req.user_id);
        let order_id = self.allocate_order_id();
        let now = Utc::now();

        let (quote_budget, freeze_asset, freeze_amount) = match (req.order_type, req.side) {
            (OrderType::Limit, Side::Buy) => {
                let p = price.expect("limit order validated above");
                let notional = info.calculate_quote_qty(p.to_raw(), quantity.to_raw());
                (None, info.quote_asset_id, notional)
            }
            (OrderType::Limit, Side::Sell) => (None, info.base_asset_id, quantity.to_raw()),
            (OrderType::Market, Side::Sell) => (None, info.base_asset_id, quantity.to_raw()),
            (OrderType::Market, Side::Buy) => {
                let estimated_price = self
                    .prices
                    .get(&symbol_id)
                    .and_then(|p| p.best_ask)
                    .ok_or(IntakeError::NoLiquidity)?;
                let notional = info.calculate_quote_qty(estimated_price, quantity.to_raw());
                let buffered = (notional as u128 * SLIPPAGE_NUMERATOR as u128
                    / SLIPPAGE_DENOMINATOR as u128) as u64;
                (Some(ScaledAmount::from(buffered)), info.quote_asset_id, buffered)
            }
        };

        if !exempt && freeze_amount > 0 {
            self.ledger
                .freeze(req.user_id, freeze_asset, ScaledAmount::from(freeze_amount))?;
        }

        let order = Order::new_pending(
            order_id,
            req.user_id,
            symbol_id as SymbolId,
            req.side,
            req.order_type,
            price,
            quantity,
            quote_budget,
            now,
        );
        self.registry.insert(order.id, OrderMeta::from_order(&order));
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Arc;

    fn symbols() -> SymbolManager {
        let mut mgr = SymbolManager::new();
        mgr.add_asset(1, 8, 8, "BTC");
        mgr.add_asset(2, 8, 2, "USDT");
        mgr.insert_symbol("BTCUSDT", 1, 1, 2, 2, 2, 100, 100_000_000_00, true)
            .unwrap();
        mgr
    }

    fn req(side: Side, order_type: OrderType, price: Option<u64>, qty: u64) -> SubmitRequest {
        SubmitRequest {
            user_id: 1,
            symbol: "BTCUSDT".to_string(),
            side,
            order_type,
            price: price.map(rust_decimal::Decimal::from),
            quantity: rust_decimal::Decimal::new(qty as i64, 8),
        }
    }

    #[test]
    fn limit_buy_freezes_quote_notional() {
        let symbols = symbols();
        let ledger = BalanceLedger::new();
        ledger
            .deposit(1, 2, ScaledAmount::from(100_000_000u64))
            .unwrap();
        let prices: BestPriceCache = Arc::new(DashMap::new());
        let registry = OrderRegistry::new();
        let exempt = FxHashSet::default();
        let intake = OrderIntake::new(&symbols, &ledger, &prices, &registry, &exempt, 1);

        let order = intake
            .process(req(Side::Buy, OrderType::Limit, Some(30000), 1_000_000))
            .unwrap();
        assert_eq!(order.side, Side::Buy);
        let snap = ledger.get(1, 2);
        assert!(snap.frozen > 0);
    }

    #[test]
    fn market_buy_without_liquidity_is_rejected() {
        let symbols = symbols();
        let ledger = BalanceLedger::new();
        ledger
            .deposit(1, 2, ScaledAmount::from(100_000_000u64))
            .unwrap();
        let prices: BestPriceCache = Arc::new(DashMap::new());
        let registry = OrderRegistry::new();
        let exempt = FxHashSet::default();
        let intake = OrderIntake::new(&symbols, &ledger, &prices, &registry, &exempt, 1);

        let err = intake
            .process(req(Side::Buy, OrderType::Market, None, 1_000_000))
            .unwrap_err();
        assert!(matches!(err, IntakeError::NoLiquidity));
    }

    #[test]
    fn insufficient_balance_rejects_without_partial_freeze() {
        let symbols = symbols();
        let ledger = BalanceLedger::new();
        let prices: BestPriceCache = Arc::new(DashMap::new());
        let registry = OrderRegistry::new();
        let exempt = FxHashSet::default();
        let intake = OrderIntake::new(&symbols, &ledger, &prices, &registry, &exempt, 1);

        let err = intake
            .process(req(Side::Buy, OrderType::Limit, Some(30000), 1_000_000))
            .unwrap_err();
        assert!(matches!(err, IntakeError::InsufficientAvailable));
        let snap = ledger.get(1, 2);
        assert_eq!(snap.frozen, 0);
    }

    #[test]
    fn market_maker_exempt_user_skips_freeze() {
        let symbols = symbols();
        let ledger = BalanceLedger::new();
        let prices: BestPriceCache = Arc::new(DashMap::new());
        let registry = OrderRegistry::new();
        let mut exempt = FxHashSet::default();
        exempt.insert(1u64);
        let intake = OrderIntake::new(&symbols, &ledger, &prices, &registry, &exempt, 1);

        intake
            .process(req(Side::Sell, OrderType::Limit, Some(30000), 1_000_000))
            .unwrap();
        let snap = ledger.get(1, 1);
        assert_eq!(snap.frozen, 0);
    }
}
