//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode snapshots)
//! - Exact arithmetic (Decimal for money and quantities)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Signed effect on the balance
    pub amount: Decimal,

    /// Balance right after this entry
    pub balance_after: Decimal,

    /// Caller tag, e.g. `Redemption`, `CashDrop`, `Waste`
    pub transaction_type: String,

    /// Free-form notes
    pub notes: Option<String>,

    /// When the entry was posted
    pub timestamp: DateTime<Utc>,

    /// Additional metadata (never null)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Identity and time assigned to a new journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionStamp {
    /// Transaction ID
    pub id: Uuid,

    /// Posting time
    pub at: DateTime<Utc>,
}

impl TransactionStamp {
    /// Fresh UUIDv7 at the current time
    pub fn now() -> Self {
        Self {
            id: Uuid::now_v7(),
            at: Utc::now(),
        }
    }
}

/// Credit or debit request
///
/// `amount` is the magnitude; the direction comes from the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Non-negative magnitude
    pub amount: Decimal,

    /// Caller tag stored on the journal entry
    pub transaction_type: String,

    /// Free-form notes
    pub notes: Option<String>,

    /// Stored verbatim on the journal entry
    pub metadata: HashMap<String, String>,

    /// Let a debit take the balance below zero
    pub allow_negative: bool,
}

impl Posting {
    /// Create a posting with no notes or metadata
    pub fn new(amount: Decimal, transaction_type: impl Into<String>) -> Self {
        Self {
            amount,
            transaction_type: transaction_type.into(),
            notes: None,
            metadata: HashMap::new(),
            allow_negative: false,
        }
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Add one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace the metadata map
    pub fn with_metadata_map(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Allow a debit to overdraw the balance
    pub fn allowing_negative(mut self) -> Self {
        self.allow_negative = true;
        self
    }

    /// Whether the non-negative rule is waived, either through the flag or
    /// through `metadata["allowNegative"] == "true"` (exact, case-sensitive)
    pub fn overrides_non_negative(&self) -> bool {
        self.allow_negative
            || self
                .metadata
                .get(crate::state::ALLOW_NEGATIVE_KEY)
                .is_some_and(|value| value == "true")
    }
}

/// Set-the-balance request (counts, reconciliations)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Balance after the adjustment; must be non-negative
    pub target_balance: Decimal,

    /// Free-form notes
    pub notes: Option<String>,

    /// Stored verbatim on the journal entry
    pub metadata: HashMap<String, String>,
}

impl Adjustment {
    /// Adjust to `target_balance`
    pub fn to(target_balance: Decimal) -> Self {
        Self {
            target_balance,
            notes: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Add one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of Credit, Debit or AdjustTo
///
/// Business-rule rejections are reported here with `success == false`; they
/// never surface as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerOutcome {
    /// Whether the operation was applied
    pub success: bool,

    /// Signed effect on the balance when applied, the requested value when rejected
    pub amount: Decimal,

    /// Balance before the operation
    pub balance_before: Decimal,

    /// Balance after the operation (equal to `balance_before` when rejected)
    pub balance_after: Decimal,

    /// Journal entry written, if any
    pub transaction_id: Option<Uuid>,

    /// Rejection reason
    pub error: Option<String>,
}

impl LedgerOutcome {
    /// Applied operation
    pub fn accepted(
        amount: Decimal,
        balance_before: Decimal,
        balance_after: Decimal,
        transaction_id: Uuid,
    ) -> Self {
        Self {
            success: true,
            amount,
            balance_before,
            balance_after,
            transaction_id: Some(transaction_id),
            error: None,
        }
    }

    /// Rejected operation; the balance is reported unchanged
    pub fn rejected(amount: Decimal, balance: Decimal, error: impl Into<String>) -> Self {
        Self {
            success: false,
            amount,
            balance_before: balance,
            balance_after: balance,
            transaction_id: None,
            error: Some(error.into()),
        }
    }
}

/// Cheap overview of a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    /// Current balance
    pub balance: Decimal,

    /// Retained journal entries (at most the retention window)
    pub transaction_count: usize,

    /// Time of the newest journal entry
    pub last_transaction_at: Option<DateTime<Utc>>,

    /// Whether Initialize has run
    pub is_initialized: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_flag() {
        let posting = Posting::new(Decimal::from(5), "Sale");
        assert!(!posting.overrides_non_negative());
        assert!(posting.clone().allowing_negative().overrides_non_negative());
    }

    #[test]
    fn test_override_metadata_is_exact_match() {
        let with = |value: &str| {
            Posting::new(Decimal::from(5), "Sale")
                .with_metadata("allowNegative", value)
                .overrides_non_negative()
        };

        assert!(with("true"));
        assert!(!with("True"));
        assert!(!with("TRUE"));
        assert!(!with("1"));
        assert!(!with("yes"));
        assert!(!with(" true"));
    }

    #[test]
    fn test_rejected_outcome_keeps_balance() {
        let outcome = LedgerOutcome::rejected(Decimal::from(7), Decimal::from(3), "nope");
        assert!(!outcome.success);
        assert_eq!(outcome.balance_before, outcome.balance_after);
        assert!(outcome.transaction_id.is_none());
        assert_eq!(outcome.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_stamp_ids_are_unique() {
        let a = TransactionStamp::now();
        let b = TransactionStamp::now();
        assert_ne!(a.id, b.id);
    }
}
