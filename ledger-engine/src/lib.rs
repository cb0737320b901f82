//! Brigade Ledger Engine
//!
//! Balance plus bounded transaction journal, reused for money (gift cards,
//! cash drawers, customer credit) and for quantities (inventory).
//!
//! # Architecture
//!
//! - **Addressing**: `(organization, owner type, owner id)` maps to one [`entity_host::EntityKey`]
//! - **Single Writer**: Every operation runs through the [`entity_host::ActorHost`] mailbox for its key
//! - **Write-Through**: Accepted postings are durable before the caller sees them
//! - **Bounded Journal**: The newest 100 transactions are retained, oldest evicted first

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Conservation: balance == Σ(credits) − Σ(debits) + Σ(adjustment deltas), exactly
//! - The balance is a persisted running total; it is never recomputed from the journal
//! - A debit never leaves a negative balance unless the posting explicitly allows it
//! - Rejected operations leave balance and journal untouched
//! - Initialize is idempotent

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod address;
pub mod engine;
pub mod error;
pub mod state;
pub mod types;

// Re-exports
pub use address::{owner_types, LedgerAddress, LEDGER_ENTITY_TYPE};
pub use engine::{LedgerEngine, LedgerRef};
pub use error::{Error, Result};
pub use state::{
    LedgerState, ADJUSTMENT_TRANSACTION_TYPE, ALLOW_NEGATIVE_KEY, TRANSACTION_RETENTION,
};
pub use types::{
    Adjustment, LedgerOutcome, LedgerSummary, LedgerTransaction, Posting, TransactionStamp,
};
