//! Per-symbol order book: two price-indexed priority structures (bids
//! descending, asks ascending), FIFO by order id within a price level.
//!
//! Bids are keyed by `u64::MAX - price` so that ascending `BTreeMap`
//! iteration yields descending price order without a custom comparator.

use crate::core_types::OrderId;
use crate::models::{BookOrder, Side};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};

fn bid_key(price: u64) -> u64 {
    u64::MAX - price
}

/// One aggregated price level in a depth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthLevel {
    pub price: u64,
    pub aggregated_size: u64,
    pub order_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct DepthSnapshot {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

#[derive(Debug, thiserror::Error)]
pub enum OrderBookError {
    #[error("order {0} already present in book")]
    DuplicateOrderId(OrderId),
    #[error("order {0} not found in book")]
    UnknownOrder(OrderId),
    #[error("decrease amount {amount} exceeds resting size {size} for order {order_id}")]
    DecreaseExceedsSize {
        order_id: OrderId,
        amount: u64,
        size: u64,
    },
}

/// Where an order lives: its price bucket key (already side-transformed for
/// bids) so `remove`/`decrease_size` can locate it in O(1).
#[derive(Debug, Clone, Copy)]
struct Location {
    side: Side,
    price_key: u64,
}

pub struct OrderBook {
    bids: BTreeMap<u64, VecDeque<BookOrder>>,
    asks: BTreeMap<u64, VecDeque<BookOrder>>,
    index: FxHashMap<OrderId, Location>,
    /// Idempotence guard against replayed Submit/Cancel messages (§4.2, §5).
    processed_order_ids: FxHashSet<OrderId>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: FxHashMap::default(),
            processed_order_ids: FxHashSet::default(),
        }
    }

    pub fn is_processed(&self, order_id: OrderId) -> bool {
        self.processed_order_ids.contains(&order_id)
    }

    pub fn mark_processed(&mut self, order_id: OrderId) {
        self.processed_order_ids.insert(order_id);
    }

    /// Insert a resting order at its priority position. Requires the id not
    /// already present.
    pub fn insert(&mut self, book_order: BookOrder) -> Result<(), OrderBookError> {
        if self.index.contains_key(&book_order.order_id) {
            return Err(OrderBookError::DuplicateOrderId(book_order.order_id));
        }
        let order_id = book_order.order_id;
        let side = book_order.side;
        let price_key = match side {
            Side::Buy => bid_key(book_order.price),
            Side::Sell => book_order.price,
        };
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        levels.entry(price_key).or_default().push_back(book_order);
        self.index.insert(order_id, Location { side, price_key });
        Ok(())
    }

    /// Subtract `amount` from the resting size of `order_id`; removes the
    /// entry entirely once its size reaches zero.
    pub fn decrease_size(&mut self, order_id: OrderId, amount: u64) -> Result<(), OrderBookError> {
        let loc = *self
            .index
            .get(&order_id)
            .ok_or(OrderBookError::UnknownOrder(order_id))?;
        let levels = match loc.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = levels
            .get_mut(&loc.price_key)
            .ok_or(OrderBookError::UnknownOrder(order_id))?;
        let pos = queue
            .iter()
            .position(|o| o.order_id == order_id)
            .ok_or(OrderBookError::UnknownOrder(order_id))?;
        let size = queue[pos].size;
        if amount > size {
            return Err(OrderBookError::DecreaseExceedsSize {
                order_id,
                amount,
                size,
            });
        }
        queue[pos].size -= amount;
        if queue[pos].size == 0 {
            queue.remove(pos);
            if queue.is_empty() {
                levels.remove(&loc.price_key);
            }
            self.index.remove(&order_id);
        }
        Ok(())
    }

    /// Used by cancel: removes the entry and returns its remaining size.
    pub fn remove(&mut self, order_id: OrderId) -> Option<u64> {
        self.remove_full(order_id).map(|o| o.size)
    }

    /// Like `remove`, but returns the whole resting order so the caller can
    /// recover its price/side/funds for residual-freeze accounting (§4.5).
    pub fn remove_full(&mut self, order_id: OrderId) -> Option<BookOrder> {
        let loc = self.index.remove(&order_id)?;
        let levels = match loc.side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let queue = levels.get_mut(&loc.price_key)?;
        let pos = queue.iter().position(|o| o.order_id == order_id)?;
        let removed = queue.remove(pos)?;
        if queue.is_empty() {
            levels.remove(&loc.price_key);
        }
        Some(removed)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Best maker price on the side opposite `taker_side`, or `None` if
    /// that side is empty.
    pub fn best_opposite_price(&self, taker_side: Side) -> Option<u64> {
        match taker_side {
            Side::Buy => self.asks.keys().next().copied(),
            Side::Sell => self.bids.keys().next().map(|k| u64::MAX - k),
        }
    }

    /// Match-order iterator for a taker of `taker_side`: for a buy, asks
    /// ascending price; for a sell, bids descending price. Within a level,
    /// FIFO by insertion order (front of the `VecDeque`).
    ///
    /// Mutates the book as it consumes makers via the supplied callback,
    /// which returns how much of the front maker's size was consumed; the
    /// iteration stops when the callback returns `None` (taker exhausted).
    pub fn match_against<F>(&mut self, taker_side: Side, mut on_maker: F)
    where
        F: FnMut(&BookOrder) -> Option<u64>,
    {
        let opposite = match taker_side {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        loop {
            let Some((&level_key, queue)) = opposite.iter_mut().next() else {
                break;
            };
            let Some(front) = queue.front().cloned() else {
                opposite.remove(&level_key);
                continue;
            };
            match on_maker(&front) {
                Some(consumed) if consumed > 0 => {
                    let order_id = front.order_id;
                    let front_size = front.size;
                    if consumed >= front_size {
                        queue.pop_front();
                        self.index.remove(&order_id);
                        if queue.is_empty() {
                            opposite.remove(&level_key);
                        }
                    } else {
                        queue[0].size -= consumed;
                    }
                }
                _ => break,
            }
        }
    }

    pub fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next().map(|k| u64::MAX - k)
    }

    pub fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    pub fn spread(&self) -> Option<u64> {
        Some(self.best_ask()?.saturating_sub(self.best_bid()?))
    }

    /// Aggregate per-price levels to `{price, aggregatedSize, orderCount}`,
    /// top `depth` on each side.
    pub fn snapshot(&self, depth: usize) -> DepthSnapshot {
        let bids = self
            .bids
            .iter()
            .take(depth)
            .map(|(key, queue)| DepthLevel {
                price: u64::MAX - key,
                aggregated_size: queue.iter().map(|o| o.size).sum(),
                order_count: queue.len() as u32,
            })
            .collect();
        let asks = self
            .asks
            .iter()
            .take(depth)
            .map(|(&price, queue)| DepthLevel {
                price,
                aggregated_size: queue.iter().map(|o| o.size).sum(),
                order_count: queue.len() as u32,
            })
            .collect();
        DepthSnapshot { bids, asks }
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }
}
