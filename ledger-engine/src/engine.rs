//! Ledger operations executed through the actor host
//!
//! [`LedgerRef`] is the handle callers use for one ledger. Each method sends a
//! closure to the mailbox of the ledger's key, so operations on one ledger run
//! one at a time and accepted mutations are durable before the call returns.

use crate::address::LedgerAddress;
use crate::state::LedgerState;
use crate::types::{
    Adjustment, LedgerOutcome, LedgerSummary, LedgerTransaction, Posting, TransactionStamp,
};
use crate::{Error, Result};
use entity_host::{ActorHost, EntityKey, HostConfig, StateStore, Step};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

/// Ledger service over an [`ActorHost`]
#[derive(Clone, Debug)]
pub struct LedgerEngine {
    host: ActorHost<LedgerState>,
}

impl LedgerEngine {
    /// Create an engine with its own host over `store`
    pub fn new(store: Arc<dyn StateStore>, config: HostConfig) -> Result<Self> {
        let host = ActorHost::new(store, config)?;
        info!("Ledger engine started");
        Ok(Self { host })
    }

    /// Wrap an existing host
    pub fn from_host(host: ActorHost<LedgerState>) -> Self {
        Self { host }
    }

    /// Handle for the ledger at `address`
    pub fn ledger(&self, address: LedgerAddress) -> Result<LedgerRef> {
        let key = address.key()?;
        Ok(LedgerRef {
            host: self.host.clone(),
            address,
            key,
        })
    }

    /// Underlying host
    pub fn host(&self) -> &ActorHost<LedgerState> {
        &self.host
    }

    /// Stop the host; later ledger calls fail with a host error
    pub fn shutdown(&self) {
        self.host.shutdown();
    }
}

/// Handle for one ledger
#[derive(Clone, Debug)]
pub struct LedgerRef {
    host: ActorHost<LedgerState>,
    address: LedgerAddress,
    key: EntityKey,
}

impl LedgerRef {
    /// Ledger address
    pub fn address(&self) -> &LedgerAddress {
        &self.address
    }

    /// Entity key of the ledger
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Create the ledger if absent. Returns `true` when it was created,
    /// `false` when it already existed (nothing is written then).
    pub async fn initialize(&self) -> Result<bool> {
        let address = self.address.clone();
        let created = self
            .host
            .invoke(&self.key, move |state: &mut LedgerState| {
                if state.initialize(&address) {
                    Ok::<_, Error>(Step::Commit(true))
                } else {
                    Ok(Step::Skip(false))
                }
            })
            .await?;

        if created {
            info!(ledger = %self.key, "Ledger initialized");
        }
        Ok(created)
    }

    /// Add `posting.amount` to the balance
    pub async fn credit(&self, posting: Posting) -> Result<LedgerOutcome> {
        self.mutate("credit", move |state, stamp| state.credit(posting, stamp))
            .await
    }

    /// Subtract `posting.amount` from the balance
    pub async fn debit(&self, posting: Posting) -> Result<LedgerOutcome> {
        self.mutate("debit", move |state, stamp| state.debit(posting, stamp))
            .await
    }

    /// Set the balance to `adjustment.target_balance`
    pub async fn adjust_to(&self, adjustment: Adjustment) -> Result<LedgerOutcome> {
        self.mutate("adjust_to", move |state, stamp| {
            state.adjust_to(adjustment, stamp)
        })
        .await
    }

    /// Current balance
    pub async fn balance(&self) -> Result<Decimal> {
        Ok(self.host.read(&self.key, LedgerState::balance).await?)
    }

    /// Whether the balance covers `amount`
    pub async fn has_sufficient_balance(&self, amount: Decimal) -> Result<bool> {
        Ok(self
            .host
            .read(&self.key, move |state| state.has_sufficient_balance(amount))
            .await?)
    }

    /// Retained journal, most recent first
    pub async fn transactions(&self, limit: Option<usize>) -> Result<Vec<LedgerTransaction>> {
        Ok(self
            .host
            .read(&self.key, move |state| state.transactions(limit))
            .await?)
    }

    /// Balance and journal overview
    pub async fn summary(&self) -> Result<LedgerSummary> {
        Ok(self.host.read(&self.key, LedgerState::summary).await?)
    }

    /// Full copy of the current state
    pub async fn snapshot(&self) -> Result<LedgerState> {
        Ok(self.host.read(&self.key, LedgerState::clone).await?)
    }

    async fn mutate<F>(&self, operation: &'static str, apply: F) -> Result<LedgerOutcome>
    where
        F: FnOnce(&mut LedgerState, TransactionStamp) -> LedgerOutcome + Send + 'static,
    {
        let key = self.key.clone();
        let outcome = self
            .host
            .invoke(&self.key, move |state: &mut LedgerState| {
                if !state.is_initialized {
                    return Err(Error::NotInitialized(key.to_string()));
                }

                let outcome = apply(state, TransactionStamp::now());
                if outcome.success {
                    Ok(Step::Commit(outcome))
                } else {
                    Ok(Step::Skip(outcome))
                }
            })
            .await?;

        if let Some(reason) = &outcome.error {
            debug!(
                ledger = %self.key,
                operation,
                amount = %outcome.amount,
                balance = %outcome.balance_before,
                reason = %reason,
                "Ledger operation rejected"
            );
        }
        Ok(outcome)
    }
}
