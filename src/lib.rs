//! Spot-trading matching engine core: order book, balance ledger, and
//! trade settlement for a single exchange process.
//!
//! # Modules
//!
//! - [`core_types`] - Fundamental id/type aliases
//! - [`money`] - Scaled-integer amount representation and conversions
//! - [`symbol_manager`] - TradingPair / asset registry
//! - [`config`] - Application configuration, loaded from YAML
//! - [`models`] - Order, Trade, and the append-only log entry types
//! - [`messages`] - Wire-shaped request/response and engine command types
//! - [`balance`] - Enforced per-asset balance type
//! - [`ledger`] - Balance Ledger (freeze/unfreeze/settle)
//! - [`orderbook`] - Price-time priority order book
//! - [`engine`] - Matching engine actor
//! - [`intake`] - Order validation and pre-freeze
//! - [`settlement`] - Trade settlement against the engine's log stream
//! - [`outbox`] - Write-behind persistence queue
//! - [`snapshot`] - Order book depth snapshot publisher
//! - [`persistence`] - Postgres-backed repositories
//! - [`recovery`] - Warm-start engine reconstruction from the store
//! - [`logging`] - Tracing subscriber setup

// Core types - must be first!
pub mod core_types;

pub mod money;
pub mod symbol_manager;

pub mod config;
pub mod logging;

pub mod balance;
pub mod ledger;
pub mod messages;
pub mod models;
pub mod orderbook;

pub mod engine;
pub mod intake;
pub mod outbox;
pub mod persistence;
pub mod recovery;
pub mod settlement;
pub mod snapshot;

// Convenient re-exports at crate root
pub use balance::Balance;
pub use config::AppConfig;
pub use core_types::{AssetId, OrderId, SeqNum, SymbolId, TradeId, UserId};
pub use engine::{EngineStats, MatchingEngine};
pub use ledger::BalanceLedger;
pub use messages::{CancelOutcome, EngineCommand, SubmitRequest};
pub use models::{Order, OrderStatus, OrderType, Side, Trade};
pub use orderbook::OrderBook;
pub use outbox::{Outbox, OutboxError};
pub use persistence::PersistenceError;
pub use recovery::RecoveryError;
pub use symbol_manager::SymbolManager;
