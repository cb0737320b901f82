//! Entity addressing
//!
//! Every call in the system is routed by an [`EntityKey`] built from
//! `(organization id, entity type, id parts...)`. The canonical string form
//! joins components with `:` and escapes the delimiter inside components, so
//! composite ids such as `"{site}:{ingredient}"` can never collide with a key
//! whose parts were split differently.
//!
//! ```text
//! resolve("org-1", "ledger", ["inventory", "site-9:flour"])
//!     => org-1:ledger:inventory:site-9%3Aflour
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Component delimiter in the canonical form
const DELIMITER: char = ':';

/// Identity of one logical entity instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    organization_id: String,
    entity_type: String,
    parts: Vec<String>,
}

impl EntityKey {
    /// Resolve the key for `(organization_id, entity_type, parts...)`.
    ///
    /// Organization id and entity type must be non-empty and at least one id
    /// part is required. Parts may contain any character, including the
    /// delimiter.
    pub fn resolve<I, P>(
        organization_id: impl Into<String>,
        entity_type: impl Into<String>,
        parts: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let organization_id = organization_id.into();
        let entity_type = entity_type.into();
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();

        if organization_id.is_empty() {
            return Err(Error::InvalidKey("organization id is empty".to_string()));
        }
        if entity_type.is_empty() {
            return Err(Error::InvalidKey("entity type is empty".to_string()));
        }
        if parts.is_empty() {
            return Err(Error::InvalidKey(format!(
                "{} key for organization {} has no id parts",
                entity_type, organization_id
            )));
        }

        Ok(Self {
            organization_id,
            entity_type,
            parts,
        })
    }

    /// Parse a canonical key string produced by [`EntityKey::canonical`].
    pub fn parse(canonical: &str) -> Result<Self> {
        let components = canonical
            .split(DELIMITER)
            .map(unescape)
            .collect::<Result<Vec<_>>>()?;

        let mut components = components.into_iter();
        let organization_id = components
            .next()
            .ok_or_else(|| Error::InvalidKey("empty key".to_string()))?;
        let entity_type = components
            .next()
            .ok_or_else(|| Error::InvalidKey(format!("missing entity type in {:?}", canonical)))?;

        Self::resolve(organization_id, entity_type, components)
    }

    /// Organization (tenant) that owns the entity
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    /// Entity type tag, e.g. `ledger` or `kitchen-ticket`
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Identifier parts, unescaped
    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// Canonical, injective string form of the key
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(
            self.organization_id.len()
                + self.entity_type.len()
                + self.parts.iter().map(|p| p.len() + 1).sum::<usize>()
                + 1,
        );
        escape_into(&self.organization_id, &mut out);
        out.push(DELIMITER);
        escape_into(&self.entity_type, &mut out);
        for part in &self.parts {
            out.push(DELIMITER);
            escape_into(part, &mut out);
        }
        out
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn escape_into(component: &str, out: &mut String) {
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            other => out.push(other),
        }
    }
}

fn unescape(component: &str) -> Result<String> {
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => out.push('%'),
            "3A" => out.push(DELIMITER),
            _ => {
                return Err(Error::InvalidKey(format!(
                    "invalid escape %{} in {:?}",
                    code, component
                )))
            }
        }
    }

    Ok(out)
}
