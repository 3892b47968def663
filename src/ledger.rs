//! Balance Ledger: per-`(userId, asset)` available/frozen custody.
//!
//! Backed by `dashmap` so each `(userId, assetId)` cell is independently
//! lockable - the sharded map's `entry()` API gives us exactly the
//! serializable-per-key semantics §4.1/§5 ask for without a global lock or
//! a dedicated actor per user.

use crate::balance::Balance;
use crate::core_types::{AssetId, UserId};
use crate::money::ScaledAmount;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient available balance for user {user_id} asset {asset_id}")]
    InsufficientAvailable { user_id: UserId, asset_id: AssetId },
    #[error("insufficient frozen balance for user {user_id} asset {asset_id}")]
    InsufficientFrozen { user_id: UserId, asset_id: AssetId },
    #[error("balance arithmetic overflow for user {user_id} asset {asset_id}")]
    Overflow { user_id: UserId, asset_id: AssetId },
}

/// Snapshot returned by reads: `(available, frozen)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub available: u64,
    pub frozen: u64,
}

/// Per-`(userId, asset)` available/frozen custody (§4.1).
///
/// All four mutating operations are all-or-nothing: on error the cell is
/// left untouched, satisfying "the ledger must not leak partially-applied
/// state on panic/abort" by construction (each op computes the whole new
/// `Balance` value before writing it back).
pub struct BalanceLedger {
    cells: DashMap<(UserId, AssetId), Balance>,
}

impl Default for BalanceLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    pub fn get(&self, user_id: UserId, asset_id: AssetId) -> BalanceSnapshot {
        match self.cells.get(&(user_id, asset_id)) {
            Some(b) => BalanceSnapshot {
                available: b.avail(),
                frozen: b.frozen(),
            },
            None => BalanceSnapshot {
                available: 0,
                frozen: 0,
            },
        }
    }

    /// Seed a balance directly, e.g. during warm-start rehydration from the
    /// relational store (§5 "Recovery") or in tests. Overwrites any existing
    /// cell for the key.
    pub fn seed(&self, user_id: UserId, asset_id: AssetId, available: u64, frozen: u64) {
        let mut balance = Balance::default();
        if available > 0 {
            balance.deposit(available).expect("seed deposit");
        }
        if frozen > 0 {
            balance.deposit(frozen).expect("seed deposit");
            balance.lock(frozen).expect("seed lock");
        }
        self.cells.insert((user_id, asset_id), balance);
    }

    /// `freeze(userId, symbol, amount)`: requires `available >= amount`.
    pub fn freeze(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let mut entry = self.cells.entry((user_id, asset_id)).or_default();
        entry
            .lock(amount.to_raw())
            .map_err(|_| LedgerError::InsufficientAvailable { user_id, asset_id })
    }

    /// `unfreeze(userId, symbol, amount)`: requires `frozen >= amount`.
    pub fn unfreeze(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let mut entry = self.cells.entry((user_id, asset_id)).or_default();
        entry
            .unlock(amount.to_raw())
            .map_err(|_| LedgerError::InsufficientFrozen { user_id, asset_id })
    }

    /// `settleDebitFrozen(userId, symbol, amount)`: requires `frozen >= amount`.
    pub fn settle_debit_frozen(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let mut entry = self.cells.entry((user_id, asset_id)).or_default();
        entry
            .spend_frozen(amount.to_raw())
            .map_err(|_| LedgerError::InsufficientFrozen { user_id, asset_id })
    }

    /// `settleCreditAvailable(userId, symbol, amount)`: unconditional credit.
    pub fn settle_credit_available(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let mut entry = self.cells.entry((user_id, asset_id)).or_default();
        entry
            .settle_credit(amount.to_raw())
            .map_err(|_| LedgerError::Overflow { user_id, asset_id })
    }

    /// Deposit funds (external, e.g. onboarding a market maker or a test
    /// fixture). Not part of the core matching path but needed to seed
    /// balances ahead of `freeze`.
    pub fn deposit(
        &self,
        user_id: UserId,
        asset_id: AssetId,
        amount: ScaledAmount,
    ) -> Result<(), LedgerError> {
        let mut entry = self.cells.entry((user_id, asset_id)).or_default();
        entry
            .deposit(amount.to_raw())
            .map_err(|_| LedgerError::Overflow { user_id, asset_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_then_unfreeze_round_trips() {
        let ledger = BalanceLedger::new();
        ledger.deposit(1, 1, ScaledAmount::from(1000u64)).unwrap();
        ledger.freeze(1, 1, ScaledAmount::from(400u64)).unwrap();
        let snap = ledger.get(1, 1);
        assert_eq!(snap.available, 600);
        assert_eq!(snap.frozen, 400);

        ledger.unfreeze(1, 1, ScaledAmount::from(400u64)).unwrap();
        let snap = ledger.get(1, 1);
        assert_eq!(snap.available, 1000);
        assert_eq!(snap.frozen, 0);
    }

    #[test]
    fn freeze_rejects_insufficient_available() {
        let ledger = BalanceLedger::new();
        ledger.deposit(1, 1, ScaledAmount::from(100u64)).unwrap();
        let err = ledger
            .freeze(1, 1, ScaledAmount::from(200u64))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientAvailable { .. }));
        // all-or-nothing: balance unchanged
        let snap = ledger.get(1, 1);
        assert_eq!(snap.available, 100);
        assert_eq!(snap.frozen, 0);
    }

    #[test]
    fn settle_debit_and_credit_conserve_supply() {
        let ledger = BalanceLedger::new();
        ledger.deposit(1, 1, ScaledAmount::from(1000u64)).unwrap();
        ledger.freeze(1, 1, ScaledAmount::from(1000u64)).unwrap();

        ledger
            .settle_debit_frozen(1, 1, ScaledAmount::from(1000u64))
            .unwrap();
        ledger
            .settle_credit_available(2, 1, ScaledAmount::from(1000u64))
            .unwrap();

        let seller = ledger.get(1, 1);
        let buyer = ledger.get(2, 1);
        assert_eq!(seller.available + seller.frozen, 0);
        assert_eq!(buyer.available + buyer.frozen, 1000);
    }

    #[test]
    fn unseeded_cell_reads_as_zero() {
        let ledger = BalanceLedger::new();
        let snap = ledger.get(42, 7);
        assert_eq!(snap.available, 0);
        assert_eq!(snap.frozen, 0);
    }
}
