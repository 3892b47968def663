//! Domain types: Order, Trade, the in-book order view, and the append-only
//! log entry sum type emitted by the matching engine.

use crate::core_types::{OrderId, SeqNum, SymbolId, TradeId, UserId};
use crate::money::ScaledAmount;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// Invariant O2: terminal status is sticky.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

/// Why an order left the book, carried on a `Done` log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoneReason {
    Filled,
    Cancelled,
}

impl From<DoneReason> for OrderStatus {
    fn from(r: DoneReason) -> Self {
        match r {
            DoneReason::Filled => OrderStatus::Filled,
            DoneReason::Cancelled => OrderStatus::Cancelled,
        }
    }
}

/// An Order as owned by Intake/persistence. `filled_quantity`, `status`, and
/// `avg_price` are authoritative on the engine's in-memory book view while
/// the order rests; this struct is the projection Settlement writes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub symbol_id: SymbolId,
    pub side: Side,
    pub order_type: OrderType,
    /// Required when `order_type == Limit`; ignored for Market.
    pub price: Option<ScaledAmount>,
    pub quantity: ScaledAmount,
    /// Market-buy only: the quote-asset budget to spend (post 1% slippage
    /// buffer, computed by Intake), truncated toward zero during matching.
    pub quote_budget: Option<ScaledAmount>,
    pub filled_quantity: ScaledAmount,
    pub avg_price: ScaledAmount,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: OrderId,
        user_id: UserId,
        symbol_id: SymbolId,
        side: Side,
        order_type: OrderType,
        price: Option<ScaledAmount>,
        quantity: ScaledAmount,
        quote_budget: Option<ScaledAmount>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            symbol_id,
            side,
            order_type,
            price,
            quantity,
            quote_budget,
            filled_quantity: ScaledAmount::from(0u64),
            avg_price: ScaledAmount::from(0u64),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant O1: `0 <= filled_quantity <= quantity`.
    pub fn remaining(&self) -> u64 {
        self.quantity.to_raw().saturating_sub(self.filled_quantity.to_raw())
    }
}

/// The book's view of a resting (or in-flight taker) order. Lives in the
/// book only while `status ∈ {Active, PartiallyFilled}` (data model "Book
/// entry"). `funds` is `Some` only for a market-buy taker.
#[derive(Debug, Clone)]
pub struct BookOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; for a market order this is only meaningful as the
    /// maker's price once it has been crossed (a market order never rests).
    pub price: u64,
    /// Remaining base-asset size.
    pub size: u64,
    /// Market-buy only: remaining quote-asset budget.
    pub funds: Option<u64>,
}

impl BookOrder {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            side: order.side,
            order_type: order.order_type,
            price: order.price.map(|p| p.to_raw()).unwrap_or(0),
            size: order.quantity.to_raw(),
            funds: order.quote_budget.map(|f| f.to_raw()),
        }
    }
}

/// Immutable once emitted (data model "Trade").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub symbol_id: SymbolId,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub price: ScaledAmount,
    pub quantity: ScaledAmount,
    /// Always zero: fee computation is explicitly out of scope.
    pub fee: ScaledAmount,
    pub executed_at: DateTime<Utc>,
}

/// Append-only per-symbol log entry (data model §3). `seq` is `logSeq`;
/// only `Match` carries a `trade_seq`.
#[derive(Debug, Clone)]
pub enum LogEntry {
    Open {
        seq: SeqNum,
        symbol_id: SymbolId,
        ts: DateTime<Utc>,
        book_order: BookOrder,
    },
    Match {
        seq: SeqNum,
        symbol_id: SymbolId,
        ts: DateTime<Utc>,
        trade_seq: SeqNum,
        trade: Trade,
        taker_side: Side,
    },
    Done {
        seq: SeqNum,
        symbol_id: SymbolId,
        ts: DateTime<Utc>,
        order_id: OrderId,
        user_id: UserId,
        side: Side,
        /// Remaining size (base asset) or remaining funds (market-buy quote
        /// asset) at the moment this order left the book.
        remaining: u64,
        /// Residual asset to unfreeze for `reason == Cancelled`: base
        /// quantity for a sell or market-buy-by-size, quote notional for a
        /// cancelled resting limit buy, quote funds for a market buy.
        residual_freeze: ResidualFreeze,
        reason: DoneReason,
    },
}

impl LogEntry {
    pub fn seq(&self) -> SeqNum {
        match self {
            LogEntry::Open { seq, .. } => *seq,
            LogEntry::Match { seq, .. } => *seq,
            LogEntry::Done { seq, .. } => *seq,
        }
    }
}

/// What the residual, if any, represents so Settlement knows which asset
/// and amount to unfreeze for a cancelled order (§4.5).
#[derive(Debug, Clone, Copy)]
pub enum ResidualFreeze {
    None,
    /// Resting limit order: unfreeze `size * price` quote (buy) or `size`
    /// base (sell).
    Limit { size: u64, price: u64 },
    /// Market buy: unfreeze the remaining quote funds directly.
    MarketBuyFunds { funds: u64 },
    /// Market sell: unfreeze the remaining base size directly.
    MarketSellSize { size: u64 },
}

/// The fields of an `Order` that never change once Intake creates it.
/// Shared between Intake (writer, once) and Settlement (reader) so
/// Settlement can reconstruct a full `Order` row from a log stream that
/// only ever carries ids and deltas (§4.5).
#[derive(Debug, Clone)]
pub struct OrderMeta {
    pub user_id: UserId,
    pub symbol_id: SymbolId,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<ScaledAmount>,
    pub quantity: ScaledAmount,
    pub created_at: DateTime<Utc>,
}

impl OrderMeta {
    pub fn from_order(order: &Order) -> Self {
        Self {
            user_id: order.user_id,
            symbol_id: order.symbol_id,
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            quantity: order.quantity,
            created_at: order.created_at,
        }
    }
}

/// Process-wide registry of `OrderMeta`, populated by Intake at submission
/// time and consulted by Settlement as the engine's log stream reports
/// fills/cancellations for each id.
#[derive(Debug, Default)]
pub struct OrderRegistry {
    entries: DashMap<OrderId, OrderMeta>,
}

impl OrderRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn insert(&self, order_id: OrderId, meta: OrderMeta) {
        self.entries.insert(order_id, meta);
    }

    pub fn get(&self, order_id: OrderId) -> Option<OrderMeta> {
        self.entries.get(&order_id).map(|e| e.clone())
    }
}
