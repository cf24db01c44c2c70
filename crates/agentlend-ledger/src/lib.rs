//! agentlend Ledger - custody of the fungible lending unit
//!
//! The ledger is:
//! - Account-keyed by `AccountRef` (agents, lenders, pool reserve, pool
//!   collateral, platform treasury)
//! - Double-entry (every debit has a matching credit; the outside world is the
//!   `External` account and is never balance-checked)
//! - Immutable (entries are append-only)
//! - Batch-atomic (a `LedgerBatch` is validated leg by leg, in order, against
//!   projected balances before any leg is applied)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Every entry has a reason
//! 3. A batch applies completely or not at all

use std::collections::HashMap;
use std::fmt;

use agentlend_types::{AgentId, Amount, EntryId, LenderId, LendingError, LoanId, PoolId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// An account that can hold value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountRef {
    /// Value outside the engine's custody
    External,
    /// A borrowing agent's wallet
    Agent(AgentId),
    /// A lender's wallet
    Lender(LenderId),
    /// Liquidity held by a pool
    PoolReserve(PoolId),
    /// Collateral locked against a pool's loans
    PoolCollateral(PoolId),
    /// Platform fees
    Treasury,
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External => write!(f, "external"),
            Self::Agent(id) => write!(f, "{}", id),
            Self::Lender(id) => write!(f, "{}", id),
            Self::PoolReserve(id) => write!(f, "reserve:{}", id),
            Self::PoolCollateral(id) => write!(f, "collateral:{}", id),
            Self::Treasury => write!(f, "treasury"),
        }
    }
}

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit (increase) to an account
    Credit,
    /// Debit (decrease) from an account
    Debit,
}

/// Reason for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Value brought into custody
    Deposit,
    /// Value taken out of custody
    Withdrawal,
    LiquiditySupply { pool_id: PoolId },
    LiquidityWithdrawal { pool_id: PoolId },
    CollateralLock { loan_id: LoanId },
    CollateralRelease { loan_id: LoanId },
    CollateralSeizure { loan_id: LoanId },
    Disbursement { loan_id: LoanId },
    Repayment { loan_id: LoanId },
    PlatformFee { loan_id: LoanId },
}

impl EntryReason {
    /// Loan this entry belongs to, if any
    pub fn loan_id(&self) -> Option<&LoanId> {
        match self {
            Self::CollateralLock { loan_id }
            | Self::CollateralRelease { loan_id }
            | Self::CollateralSeizure { loan_id }
            | Self::Disbursement { loan_id }
            | Self::Repayment { loan_id }
            | Self::PlatformFee { loan_id } => Some(loan_id),
            _ => None,
        }
    }
}

/// A single ledger entry (one side of a double-entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: AccountRef,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// One movement of value between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: Amount,
    pub reason: EntryReason,
}

/// Ordered transfers that commit together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerBatch {
    transfers: Vec<Transfer>,
}

impl LedgerBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transfer; zero amounts are dropped
    pub fn push(&mut self, from: AccountRef, to: AccountRef, amount: Amount, reason: EntryReason) {
        if amount.is_zero() {
            return;
        }
        self.transfers.push(Transfer {
            from,
            to,
            amount,
            reason,
        });
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }
}

/// The agentlend custody ledger
///
/// Plain owned state; the coordinator serializes access to it.
#[derive(Debug, Clone, Default)]
pub struct ValueLedger {
    balances: HashMap<AccountRef, Amount>,
    /// All entries (append-only)
    entries: Vec<LedgerEntry>,
    /// Loan references (loan_id -> entry positions)
    loan_refs: HashMap<LoanId, Vec<usize>>,
}

impl ValueLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of an account; unknown accounts hold zero
    pub fn balance(&self, account: &AccountRef) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::zero())
    }

    /// Bring value into custody (transfer in)
    pub fn deposit(&mut self, account: AccountRef, amount: Amount, at: DateTime<Utc>) -> Result<Amount> {
        let mut batch = LedgerBatch::new();
        batch.push(AccountRef::External, account.clone(), amount, EntryReason::Deposit);
        self.commit_nonempty(batch, "deposit", at)?;
        Ok(self.balance(&account))
    }

    /// Take value out of custody (transfer out)
    pub fn withdraw(&mut self, account: AccountRef, amount: Amount, at: DateTime<Utc>) -> Result<Amount> {
        let mut batch = LedgerBatch::new();
        batch.push(account.clone(), AccountRef::External, amount, EntryReason::Withdrawal);
        self.commit_nonempty(batch, "withdrawal", at)?;
        Ok(self.balance(&account))
    }

    fn commit_nonempty(&mut self, batch: LedgerBatch, field: &str, at: DateTime<Utc>) -> Result<()> {
        if batch.is_empty() {
            return Err(LendingError::invalid_amount(field, "amount must be greater than zero"));
        }
        self.commit(&batch, at)?;
        Ok(())
    }

    /// Validate a batch against current balances without applying it
    ///
    /// Legs are projected in order, so a later leg may spend what an earlier
    /// leg credited but never what it has not yet received.
    pub fn check(&self, batch: &LedgerBatch) -> Result<()> {
        self.project(batch).map(|_| ())
    }

    fn project(&self, batch: &LedgerBatch) -> Result<HashMap<AccountRef, Amount>> {
        let mut projected: HashMap<AccountRef, Amount> = HashMap::new();
        for transfer in batch.transfers() {
            if transfer.from != AccountRef::External {
                let current = projected
                    .get(&transfer.from)
                    .copied()
                    .unwrap_or_else(|| self.balance(&transfer.from));
                let after = current.checked_sub(transfer.amount).map_err(|_| {
                    LendingError::InsufficientBalance {
                        account: transfer.from.to_string(),
                        requested: transfer.amount,
                        available: current,
                    }
                })?;
                projected.insert(transfer.from.clone(), after);
            }
            if transfer.to != AccountRef::External {
                let current = projected
                    .get(&transfer.to)
                    .copied()
                    .unwrap_or_else(|| self.balance(&transfer.to));
                projected.insert(transfer.to.clone(), current.checked_add(transfer.amount)?);
            }
        }
        Ok(projected)
    }

    /// Apply a batch atomically
    ///
    /// Returns the ids of the entries written, in leg order (debit then credit
    /// per leg). On error nothing is written.
    pub fn commit(&mut self, batch: &LedgerBatch, at: DateTime<Utc>) -> Result<Vec<EntryId>> {
        // Validate first so a failing leg leaves no trace
        self.project(batch)?;

        let mut written = Vec::with_capacity(batch.len() * 2);
        for transfer in batch.transfers() {
            if transfer.from != AccountRef::External {
                let balance = self.balance(&transfer.from).saturating_sub(transfer.amount);
                written.push(self.append(&transfer.from, EntryType::Debit, transfer, balance, at));
            }
            if transfer.to != AccountRef::External {
                let balance = Amount(self.balance(&transfer.to).0.saturating_add(transfer.amount.0));
                written.push(self.append(&transfer.to, EntryType::Credit, transfer, balance, at));
            }
            debug!(
                from = %transfer.from,
                to = %transfer.to,
                amount = %transfer.amount,
                "ledger transfer"
            );
        }
        Ok(written)
    }

    fn append(
        &mut self,
        account: &AccountRef,
        entry_type: EntryType,
        transfer: &Transfer,
        balance_after: Amount,
        at: DateTime<Utc>,
    ) -> EntryId {
        self.balances.insert(account.clone(), balance_after);

        let entry = LedgerEntry {
            entry_id: EntryId::new(),
            account: account.clone(),
            entry_type,
            amount: transfer.amount,
            balance_after,
            reason: transfer.reason.clone(),
            created_at: at,
        };
        let entry_id = entry.entry_id.clone();

        if let Some(loan_id) = transfer.reason.loan_id() {
            self.loan_refs
                .entry(loan_id.clone())
                .or_default()
                .push(self.entries.len());
        }
        self.entries.push(entry);
        entry_id
    }

    /// Get all entries for an account
    pub fn account_entries(&self, account: &AccountRef) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get entries linked to a loan
    pub fn loan_entries(&self, loan_id: &LoanId) -> Vec<LedgerEntry> {
        match self.loan_refs.get(loan_id) {
            Some(positions) => positions
                .iter()
                .filter_map(|&i| self.entries.get(i))
                .cloned()
                .collect(),
            None => vec![],
        }
    }

    /// Get the total number of entries
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get recent entries (newest first)
    pub fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Sum of every balance held in custody
    pub fn total_in_custody(&self) -> Amount {
        self.balances.values().copied().sum()
    }
}
