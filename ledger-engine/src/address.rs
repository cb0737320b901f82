//! Ledger addressing
//!
//! A ledger belongs to an owner: a gift card, a cash drawer, a customer credit
//! account or an inventory item at a site. Its entity key is
//! `org:ledger:{owner_type}:{owner_id}`, with owner ids escaped by
//! [`EntityKey`] so composite ids stay unambiguous.

use crate::{Error, Result};
use entity_host::EntityKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity type tag of every ledger key
pub const LEDGER_ENTITY_TYPE: &str = "ledger";

/// Well-known owner types
pub mod owner_types {
    /// Stored-value gift card (money)
    pub const GIFT_CARD: &str = "gift-card";
    /// Register cash drawer (money)
    pub const CASH_DRAWER: &str = "cash-drawer";
    /// House account / store credit (money)
    pub const CUSTOMER_CREDIT: &str = "customer-credit";
    /// Stock on hand of an ingredient at a site (quantity)
    pub const INVENTORY: &str = "inventory";
}

/// Owner of a ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerAddress {
    /// Tenant
    pub organization_id: String,

    /// Owner type, see [`owner_types`]
    pub owner_type: String,

    /// Owner identifier within the type
    pub owner_id: String,
}

impl LedgerAddress {
    /// Create new address
    pub fn new(
        organization_id: impl Into<String>,
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Gift card ledger
    pub fn gift_card(organization_id: impl Into<String>, card_id: impl Into<String>) -> Self {
        Self::new(organization_id, owner_types::GIFT_CARD, card_id)
    }

    /// Cash drawer ledger
    pub fn cash_drawer(organization_id: impl Into<String>, drawer_id: impl Into<String>) -> Self {
        Self::new(organization_id, owner_types::CASH_DRAWER, drawer_id)
    }

    /// Customer credit ledger
    pub fn customer_credit(
        organization_id: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> Self {
        Self::new(organization_id, owner_types::CUSTOMER_CREDIT, customer_id)
    }

    /// Inventory quantity ledger; the owner id is `{site_id}:{ingredient_id}`
    pub fn inventory(
        organization_id: impl Into<String>,
        site_id: &str,
        ingredient_id: &str,
    ) -> Self {
        Self::new(
            organization_id,
            owner_types::INVENTORY,
            format!("{}:{}", site_id, ingredient_id),
        )
    }

    /// Entity key of this ledger
    pub fn key(&self) -> Result<EntityKey> {
        if self.owner_type.is_empty() {
            return Err(Error::InvalidAddress("owner type is empty".to_string()));
        }
        if self.owner_id.is_empty() {
            return Err(Error::InvalidAddress("owner id is empty".to_string()));
        }

        Ok(EntityKey::resolve(
            self.organization_id.as_str(),
            LEDGER_ENTITY_TYPE,
            [self.owner_type.as_str(), self.owner_id.as_str()],
        )?)
    }

    /// Recover the address from a ledger key
    pub fn from_key(key: &EntityKey) -> Result<Self> {
        if key.entity_type() != LEDGER_ENTITY_TYPE {
            return Err(Error::InvalidAddress(format!(
                "{} is not a ledger key",
                key
            )));
        }
        match key.parts() {
            [owner_type, owner_id] => Ok(Self::new(
                key.organization_id(),
                owner_type.as_str(),
                owner_id.as_str(),
            )),
            _ => Err(Error::InvalidAddress(format!(
                "{} does not have exactly two id parts",
                key
            ))),
        }
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.organization_id, self.owner_type, self.owner_id
        )
    }
}
