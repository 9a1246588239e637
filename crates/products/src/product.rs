use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use bulkimport_core::{DomainError, DomainResult, ProductId};

/// Uniqueness key for a SKU: trimmed and lower-cased.
///
/// `ABC-1` and ` abc-1 ` refer to the same product.
pub fn normalize_sku(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Parse a textual price.
///
/// Empty input and the literal `null` mean "no price". Negative or
/// non-numeric input is rejected.
pub fn parse_price(raw: &str) -> DomainResult<Option<Decimal>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return Ok(None);
    }

    let price = Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|_| DomainError::validation(format!("price must be a number, got '{raw}'")))?;
    check_price(Some(price))
}

/// Exclusive upper bound of a `NUMERIC(12, 2)` price.
const PRICE_LIMIT: i64 = 10_000_000_000;

/// A price is non-negative, below 10^10, with at most two decimal places.
fn check_price(price: Option<Decimal>) -> DomainResult<Option<Decimal>> {
    let Some(p) = price else {
        return Ok(None);
    };
    if p.is_sign_negative() && !p.is_zero() {
        return Err(DomainError::validation("price cannot be negative"));
    }
    if p >= Decimal::from(PRICE_LIMIT) {
        return Err(DomainError::validation("price must be below 10000000000"));
    }
    if p.normalize().scale() > 2 {
        return Err(DomainError::validation("price cannot have more than 2 decimal places"));
    }
    Ok(Some(p))
}

fn required_sku(raw: &str) -> DomainResult<String> {
    let sku = raw.trim();
    if sku.is_empty() {
        return Err(DomainError::validation("SKU is required"));
    }
    Ok(sku.to_string())
}

fn required_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    Ok(name.to_string())
}

fn optional_text(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// A product record as stored by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    /// SKU as entered (trimmed).
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Materialize a validated draft as a new record.
    pub fn from_draft(draft: ProductDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: ProductId::new(),
            sku: draft.sku,
            name: draft.name,
            description: draft.description,
            price: draft.price,
            is_active: draft.is_active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn sku_key(&self) -> String {
        normalize_sku(&self.sku)
    }

    /// Overwrite every mutable field with the draft (upsert path).
    pub fn overwrite(&mut self, draft: ProductDraft, now: DateTime<Utc>) {
        self.sku = draft.sku;
        self.name = draft.name;
        self.description = draft.description;
        self.price = draft.price;
        self.is_active = draft.is_active;
        self.updated_at = now;
    }

    /// Apply only the fields present in the patch.
    pub fn apply_patch(&mut self, patch: ProductPatch, now: DateTime<Utc>) {
        if let Some(sku) = patch.sku {
            self.sku = sku;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
    }

    /// List ordering: newest first, ties broken by id (also newest first).
    pub fn newest_first(a: &Product, b: &Product) -> Ordering {
        b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
    }
}

/// Validated input for creating (or upserting) a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDraft {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub is_active: bool,
}

impl ProductDraft {
    pub fn new(
        sku: &str,
        name: &str,
        description: Option<String>,
        price: Option<Decimal>,
        is_active: bool,
    ) -> DomainResult<Self> {
        Ok(Self {
            sku: required_sku(sku)?,
            name: required_name(name)?,
            description: optional_text(description),
            price: check_price(price)?,
            is_active,
        })
    }

    pub fn sku_key(&self) -> String {
        normalize_sku(&self.sku)
    }
}

/// Partial update. `None` leaves a field untouched; for the nullable fields
/// `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductPatch {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub price: Option<Option<Decimal>>,
    pub is_active: Option<bool>,
}

impl ProductPatch {
    /// Validate and normalize the present fields.
    pub fn validated(self) -> DomainResult<Self> {
        let sku = match self.sku {
            Some(raw) => Some(required_sku(&raw).map_err(|_| DomainError::validation("SKU cannot be empty"))?),
            None => None,
        };
        let name = match self.name {
            Some(raw) => Some(required_name(&raw).map_err(|_| DomainError::validation("name cannot be empty"))?),
            None => None,
        };
        let price = match self.price {
            Some(p) => Some(check_price(p)?),
            None => None,
        };

        Ok(Self {
            sku,
            name,
            description: self.description.map(optional_text),
            price,
            is_active: self.is_active,
        })
    }

    pub fn sku_key(&self) -> Option<String> {
        self.sku.as_deref().map(normalize_sku)
    }
}
