use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use bulkimport_core::{DomainError, DomainResult};
use bulkimport_infra::jobs::ImportJob;
use bulkimport_products::{parse_price, Page, PageRequest, Product, ProductDraft, ProductFilter, ProductPatch};
use bulkimport_webhooks::{Webhook, WebhookDraft, WebhookPatch};

// -------------------------
// Request DTOs
// -------------------------

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Prices arrive as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PriceInput {
    Number(serde_json::Number),
    Text(String),
}

impl PriceInput {
    fn parse(self) -> DomainResult<Option<Decimal>> {
        match self {
            PriceInput::Number(n) => parse_price(&n.to_string()),
            PriceInput::Text(s) => parse_price(&s),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<PriceInput>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl CreateProductRequest {
    pub fn into_draft(self) -> DomainResult<ProductDraft> {
        let price = self.price.map(PriceInput::parse).transpose()?.flatten();
        ProductDraft::new(
            self.sku.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default(),
            self.description,
            price,
            self.is_active.unwrap_or(true),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductRequest {
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub price: Option<Option<PriceInput>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UpdateProductRequest {
    pub fn into_patch(self) -> DomainResult<ProductPatch> {
        let price = match self.price {
            Some(Some(input)) => Some(input.parse()?),
            Some(None) => Some(None),
            None => None,
        };
        ProductPatch {
            sku: self.sku,
            name: self.name,
            description: self.description,
            price,
            is_active: self.is_active,
        }
        .validated()
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

impl CreateWebhookRequest {
    pub fn into_draft(self) -> DomainResult<WebhookDraft> {
        WebhookDraft::new(
            self.name.as_deref().unwrap_or_default(),
            self.url.as_deref().unwrap_or_default(),
            self.event_type.as_deref().unwrap_or_default(),
            self.is_enabled.unwrap_or(true),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub is_enabled: Option<bool>,
}

impl UpdateWebhookRequest {
    pub fn into_patch(self) -> DomainResult<WebhookPatch> {
        WebhookPatch::new(
            self.name.as_deref(),
            self.url.as_deref(),
            self.event_type.as_deref(),
            self.is_enabled,
        )
    }
}

/// Query string of `GET /products/`. Everything arrives as text so that
/// blank values can mean "no filter".
#[derive(Debug, Default, Deserialize)]
pub struct ProductListQuery {
    pub page: Option<String>,
    pub per_page: Option<String>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<String>,
}

impl ProductListQuery {
    pub fn filter(&self) -> ProductFilter {
        ProductFilter::from_query(
            self.sku.as_deref(),
            self.name.as_deref(),
            self.description.as_deref(),
            self.is_active.as_deref(),
        )
    }

    pub fn page_request(&self) -> DomainResult<PageRequest> {
        Ok(PageRequest::new(
            page_number(self.page.as_deref(), "page")?,
            page_number(self.per_page.as_deref(), "per_page")?,
        ))
    }
}

fn page_number(raw: Option<&str>, field: &str) -> DomainResult<Option<u32>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<u32>()
            .map(Some)
            .map_err(|_| DomainError::validation(format!("{field} must be a positive integer"))),
    }
}

// -------------------------
// Response mapping
// -------------------------

pub fn product_to_json(p: &Product) -> Value {
    json!({
        "id": p.id.to_string(),
        "sku": p.sku,
        "name": p.name,
        "description": p.description,
        "price": p.price.and_then(|d| d.to_f64()),
        "is_active": p.is_active,
        "created_at": p.created_at.to_rfc3339(),
        "updated_at": p.updated_at.to_rfc3339(),
    })
}

pub fn product_page_to_json(page: &Page<Product>) -> Value {
    json!({
        "items": page.items.iter().map(product_to_json).collect::<Vec<_>>(),
        "total": page.total,
        "page": page.page,
        "pages": page.pages,
    })
}

pub fn job_to_json(job: &ImportJob) -> Value {
    json!({
        "job_id": job.id.to_string(),
        "filename": job.filename,
        "status": job.status.as_str(),
        "total_rows": job.total_rows,
        "processed_rows": job.processed_rows,
        "error_message": job.error_message,
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
    })
}

pub fn webhook_to_json(hook: &Webhook) -> Value {
    json!({
        "id": hook.id.to_string(),
        "name": hook.name,
        "url": hook.url,
        "event_type": hook.event_type.as_str(),
        "is_enabled": hook.is_enabled,
        "last_response_code": hook.last_response_code,
        "last_response_ms": hook.last_response_ms,
        "created_at": hook.created_at.to_rfc3339(),
        "updated_at": hook.updated_at.to_rfc3339(),
    })
}
