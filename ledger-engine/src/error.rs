//! Error types for the ledger engine
//!
//! Only infrastructure and integration failures are errors. Business-rule
//! rejections (negative amounts, insufficient balance) come back as an
//! unsuccessful [`LedgerOutcome`](crate::LedgerOutcome).

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Host error (storage, mailbox, timeout)
    #[error("Host error: {0}")]
    Host(#[from] entity_host::Error),

    /// Mutation attempted before Initialize
    #[error("Ledger not initialized: {0}")]
    NotInitialized(String),

    /// Owner address could not be mapped to an entity key
    #[error("Invalid ledger address: {0}")]
    InvalidAddress(String),
}
