//! Ledger state and its pure operations
//!
//! Everything here is synchronous and deterministic given a
//! [`TransactionStamp`]; the engine runs these inside the entity mailbox.

use crate::address::LedgerAddress;
use crate::types::{
    Adjustment, LedgerOutcome, LedgerSummary, LedgerTransaction, Posting, TransactionStamp,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Journal entries kept per ledger
pub const TRANSACTION_RETENTION: usize = 100;

/// Metadata key that waives the non-negative rule on a debit
pub const ALLOW_NEGATIVE_KEY: &str = "allowNegative";

/// Transaction type recorded by [`LedgerState::adjust_to`]
pub const ADJUSTMENT_TRANSACTION_TYPE: &str = "Adjustment";

const NEGATIVE_AMOUNT: &str = "amount must be non-negative";
const NEGATIVE_BALANCE: &str = "balance cannot be negative";
const OVERFLOW: &str = "amount exceeds the representable balance range";

/// Balance plus bounded journal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    /// Tenant
    pub organization_id: String,

    /// Owner type
    pub owner_type: String,

    /// Owner identifier
    pub owner_id: String,

    /// Running total, never recomputed from the journal
    pub balance: Decimal,

    /// Oldest first, at most [`TRANSACTION_RETENTION`] entries
    pub transactions: VecDeque<LedgerTransaction>,

    /// Set once by [`LedgerState::initialize`]
    pub is_initialized: bool,
}

impl LedgerState {
    /// Initialize the ledger for `address`. Returns `false` (and changes
    /// nothing) when it was already initialized.
    pub fn initialize(&mut self, address: &LedgerAddress) -> bool {
        if self.is_initialized {
            return false;
        }

        self.organization_id = address.organization_id.clone();
        self.owner_type = address.owner_type.clone();
        self.owner_id = address.owner_id.clone();
        self.balance = Decimal::ZERO;
        self.transactions.clear();
        self.is_initialized = true;
        true
    }

    /// Add `posting.amount` to the balance
    pub fn credit(&mut self, posting: Posting, stamp: TransactionStamp) -> LedgerOutcome {
        let before = self.balance;
        if posting.amount < Decimal::ZERO {
            return LedgerOutcome::rejected(posting.amount, before, NEGATIVE_AMOUNT);
        }

        let Some(after) = before.checked_add(posting.amount) else {
            return LedgerOutcome::rejected(posting.amount, before, OVERFLOW);
        };

        self.post(
            posting.amount,
            after,
            posting.transaction_type,
            posting.notes,
            posting.metadata,
            stamp,
        );
        LedgerOutcome::accepted(posting.amount, before, after, stamp.id)
    }

    /// Subtract `posting.amount` from the balance
    ///
    /// Rejected when the balance would go negative, unless the posting
    /// overrides the rule.
    pub fn debit(&mut self, posting: Posting, stamp: TransactionStamp) -> LedgerOutcome {
        let before = self.balance;
        if posting.amount < Decimal::ZERO {
            return LedgerOutcome::rejected(posting.amount, before, NEGATIVE_AMOUNT);
        }

        if !posting.overrides_non_negative() && posting.amount > before {
            return LedgerOutcome::rejected(
                posting.amount,
                before,
                format!(
                    "Insufficient balance. Current: {}, Requested: {}",
                    before, posting.amount
                ),
            );
        }

        let Some(after) = before.checked_sub(posting.amount) else {
            return LedgerOutcome::rejected(posting.amount, before, OVERFLOW);
        };

        let effect = without_negative_zero(-posting.amount);
        self.post(
            effect,
            after,
            posting.transaction_type,
            posting.notes,
            posting.metadata,
            stamp,
        );
        LedgerOutcome::accepted(effect, before, after, stamp.id)
    }

    /// Set the balance to `adjustment.target_balance`, journaling the delta.
    /// A zero delta is still journaled.
    pub fn adjust_to(&mut self, adjustment: Adjustment, stamp: TransactionStamp) -> LedgerOutcome {
        let before = self.balance;
        let target = adjustment.target_balance;
        if target < Decimal::ZERO {
            return LedgerOutcome::rejected(target, before, NEGATIVE_BALANCE);
        }

        let Some(delta) = target.checked_sub(before).map(without_negative_zero) else {
            return LedgerOutcome::rejected(target, before, OVERFLOW);
        };

        self.post(
            delta,
            target,
            ADJUSTMENT_TRANSACTION_TYPE.to_string(),
            adjustment.notes,
            adjustment.metadata,
            stamp,
        );
        LedgerOutcome::accepted(delta, before, target, stamp.id)
    }

    /// Current balance
    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// `balance >= amount`
    pub fn has_sufficient_balance(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }

    /// Retained journal, most recent first, at most `limit` entries
    pub fn transactions(&self, limit: Option<usize>) -> Vec<LedgerTransaction> {
        let limit = limit
            .unwrap_or(TRANSACTION_RETENTION)
            .min(TRANSACTION_RETENTION);
        self.transactions.iter().rev().take(limit).cloned().collect()
    }

    /// Overview without the journal
    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            balance: self.balance,
            transaction_count: self.transactions.len(),
            last_transaction_at: self.transactions.back().map(|tx| tx.timestamp),
            is_initialized: self.is_initialized,
        }
    }

    fn post(
        &mut self,
        amount: Decimal,
        balance_after: Decimal,
        transaction_type: String,
        notes: Option<String>,
        metadata: HashMap<String, String>,
        stamp: TransactionStamp,
    ) {
        self.balance = balance_after;
        self.transactions.push_back(LedgerTransaction {
            id: stamp.id,
            amount,
            balance_after,
            transaction_type,
            notes,
            timestamp: stamp.at,
            metadata,
        });
        while self.transactions.len() > TRANSACTION_RETENTION {
            self.transactions.pop_front();
        }
    }
}

/// Negating or subtracting can produce `-0`, which would persist as "-0"
fn without_negative_zero(value: Decimal) -> Decimal {
    if value.is_zero() {
        Decimal::ZERO
    } else {
        value
    }
}
