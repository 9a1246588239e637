//! Product Repository: CRUD plus filtered, paginated listing.
//!
//! SKU uniqueness is enforced on the normalized form (trimmed, lowercased).
//! Imports and operator edits go through the same repository, so writes for a
//! given SKU are serialized; the last writer wins.

mod in_memory;

use async_trait::async_trait;

use bulkimport_core::ProductId;
use bulkimport_products::{Page, PageRequest, Product, ProductDraft, ProductFilter, ProductPatch};

pub use in_memory::InMemoryProductRepository;

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("product not found")]
    NotFound,
    /// Another product already owns the SKU.
    #[error("Product with SKU '{0}' already exists")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Newest first; `total` counts every match regardless of the page.
    async fn list(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>, RepositoryError>;

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError>;

    async fn create(&self, draft: ProductDraft) -> Result<Product, RepositoryError>;

    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<Product, RepositoryError>;

    async fn delete(&self, id: ProductId) -> Result<(), RepositoryError>;

    /// Remove every product. Returns how many were removed.
    async fn bulk_delete(&self) -> Result<u64, RepositoryError>;

    /// Insert when the SKU is new, otherwise overwrite the existing record.
    async fn upsert_by_sku(&self, draft: ProductDraft) -> Result<UpsertOutcome, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}
