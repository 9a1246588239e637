//! List filters and pagination.

use serde::{Deserialize, Serialize};

use crate::product::{normalize_sku, Product};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Product list filter. Every predicate is optional; present ones are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    /// Case-insensitive substring of the SKU.
    pub sku: Option<String>,
    /// Case-insensitive substring of the name.
    pub name: Option<String>,
    /// Case-insensitive substring of the description.
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl ProductFilter {
    /// Build a filter from raw query values. Empty strings mean "no filter";
    /// `is_active` only filters on `true`/`false`.
    pub fn from_query(
        sku: Option<&str>,
        name: Option<&str>,
        description: Option<&str>,
        is_active: Option<&str>,
    ) -> Self {
        fn needle(v: Option<&str>) -> Option<String> {
            v.filter(|s| !s.is_empty()).map(str::to_lowercase)
        }

        Self {
            sku: sku.filter(|s| !s.is_empty()).map(normalize_sku),
            name: needle(name),
            description: needle(description),
            is_active: is_active.and_then(parse_bool_filter),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sku.is_none() && self.name.is_none() && self.description.is_none() && self.is_active.is_none()
    }

    /// Needles are expected lower-cased (as produced by [`ProductFilter::from_query`]).
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(sku) = &self.sku {
            if !product.sku_key().contains(sku.as_str()) {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !product.name.to_lowercase().contains(name.as_str()) {
                return false;
            }
        }
        if let Some(description) = &self.description {
            match &product.description {
                Some(d) if d.to_lowercase().contains(description.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(active) = self.is_active {
            if product.is_active != active {
                return false;
            }
        }
        true
    }
}

fn parse_bool_filter(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

/// One page of results plus the total filtered count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, request: PageRequest) -> Self {
        let pages = total.div_ceil(u64::from(request.per_page));
        Self {
            items,
            total,
            page: request.page,
            pages: u32::try_from(pages).unwrap_or(u32::MAX),
        }
    }

    /// Slice an already filtered and ordered collection.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(usize::try_from(request.offset()).unwrap_or(usize::MAX))
            .take(request.per_page as usize)
            .collect();
        Self::new(items, total, request)
    }
}
