//! Wire-shaped request/response types for the external interfaces (§6) and
//! the internal command grammar the per-symbol engine actor consumes.
//!
//! # Message Flow
//!
//! ```text
//! Intake → EngineCommand::Submit/Cancel → Engine → LogEntry stream
//!                                                     ├─→ Settlement
//!                                                     ├─→ Outbox
//!                                                     └─→ Snapshot
//! ```

use crate::core_types::{OrderId, SymbolId, UserId};
use crate::models::{LogEntry, Order, Side};
use rust_decimal::Decimal;
use tokio::sync::oneshot;

/// Submit (inbound), §6. `quote_budget` is filled in by Intake for a
/// market-buy after it resolves `estimatedPrice` and applies the slippage
/// buffer; it is never supplied directly by the caller of Intake.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: UserId,
    pub symbol: String,
    pub side: Side,
    pub order_type: crate::models::OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeErrorKind {
    UnknownSymbol,
    InactiveSymbol,
    InvalidQuantity,
    InvalidPrice,
    OutOfBounds,
    InsufficientAvailable,
    NoLiquidity,
}

#[derive(Debug, Clone, Copy)]
pub struct CancelOutcome {
    pub cancelled: bool,
    pub remaining: u64,
}

/// The per-symbol engine actor's message grammar (§4.3, §5). The engine
/// never invents order ids or rejects a well-formed `Submit`; by the time a
/// message reaches this channel Intake has already validated and frozen
/// funds. A reply channel lets the caller observe the log entries a single
/// submit/cancel batch produced, which is what Settlement, the Outbox, and
/// the Snapshot publisher each subscribe to via the broadcast log stream
/// instead - the reply here only exists so synchronous callers (e.g. Cancel)
/// can report `{cancelled, remaining}` per §6.
pub enum EngineCommand {
    Submit(Box<Order>),
    Cancel {
        order_id: OrderId,
        user_id: UserId,
        /// Resolved by the caller (via the `OrderRegistry`) before dispatch -
        /// a bare order id doesn't carry enough to find it in the book.
        side: Side,
        reply: oneshot::Sender<CancelOutcome>,
    },
}

/// One call to the engine actor produces zero or more ordered `LogEntry`
/// values; they are broadcast together so every subscriber keeps seeing a
/// consistent batch boundary, matching §4.7 ("after each engine batch").
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub symbol_id: SymbolId,
    pub entries: Vec<LogEntry>,
}
