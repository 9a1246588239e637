use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use bulkimport_core::ProductId;
use bulkimport_products::{Page, PageRequest, Product, ProductDraft, ProductFilter, ProductPatch};

use super::{ProductRepository, RepositoryError, UpsertOutcome};

#[derive(Debug, Default)]
struct Catalog {
    products: HashMap<ProductId, Product>,
    by_sku: HashMap<String, ProductId>,
}

/// In-memory product repository for tests/dev.
///
/// A single lock guards the records and the SKU index together, so the index
/// can never disagree with the records.
#[derive(Debug, Default)]
pub struct InMemoryProductRepository {
    inner: RwLock<Catalog>,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Catalog>, RepositoryError> {
        self.inner
            .read()
            .map_err(|_| RepositoryError::Storage("catalog lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Catalog>, RepositoryError> {
        self.inner
            .write()
            .map_err(|_| RepositoryError::Storage("catalog lock poisoned".to_string()))
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>, RepositoryError> {
        let catalog = self.read()?;
        let mut matching: Vec<Product> = catalog
            .products
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(Product::newest_first);
        Ok(Page::from_sorted(matching, page))
    }

    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn create(&self, draft: ProductDraft) -> Result<Product, RepositoryError> {
        let mut catalog = self.write()?;
        let key = draft.sku_key();
        if catalog.by_sku.contains_key(&key) {
            return Err(RepositoryError::Conflict(draft.sku));
        }

        let product = Product::from_draft(draft, Utc::now());
        catalog.by_sku.insert(key, product.id);
        catalog.products.insert(product.id, product.clone());
        Ok(product)
    }

    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<Product, RepositoryError> {
        let mut catalog = self.write()?;
        let Some(current) = catalog.products.get(&id) else {
            return Err(RepositoryError::NotFound);
        };
        let old_key = current.sku_key();

        let new_key = patch.sku_key();
        if let Some(key) = &new_key {
            if catalog.by_sku.get(key).is_some_and(|owner| *owner != id) {
                return Err(RepositoryError::Conflict(patch.sku.clone().unwrap_or_default()));
            }
        }

        let Some(product) = catalog.products.get_mut(&id) else {
            return Err(RepositoryError::NotFound);
        };
        product.apply_patch(patch, Utc::now());
        let updated = product.clone();

        if let Some(key) = new_key {
            if key != old_key {
                catalog.by_sku.remove(&old_key);
                catalog.by_sku.insert(key, id);
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: ProductId) -> Result<(), RepositoryError> {
        let mut catalog = self.write()?;
        let product = catalog.products.remove(&id).ok_or(RepositoryError::NotFound)?;
        catalog.by_sku.remove(&product.sku_key());
        Ok(())
    }

    async fn bulk_delete(&self) -> Result<u64, RepositoryError> {
        let mut catalog = self.write()?;
        let removed = catalog.products.len() as u64;
        catalog.products.clear();
        catalog.by_sku.clear();
        Ok(removed)
    }

    async fn upsert_by_sku(&self, draft: ProductDraft) -> Result<UpsertOutcome, RepositoryError> {
        let mut catalog = self.write()?;
        let key = draft.sku_key();
        let now = Utc::now();

        if let Some(id) = catalog.by_sku.get(&key).copied() {
            if let Some(existing) = catalog.products.get_mut(&id) {
                existing.overwrite(draft, now);
                return Ok(UpsertOutcome::Updated);
            }
        }

        let product = Product::from_draft(draft, now);
        catalog.by_sku.insert(key, product.id);
        catalog.products.insert(product.id, product);
        Ok(UpsertOutcome::Inserted)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.read()?.products.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(sku: &str, name: &str, active: bool) -> ProductDraft {
        ProductDraft::new(sku, name, None, None, active).unwrap()
    }

    #[tokio::test]
    async fn duplicate_sku_conflicts_without_a_second_row() {
        let repo = InMemoryProductRepository::new();
        repo.create(draft("ABC-1", "first", true)).await.unwrap();

        let err = repo.create(draft(" abc-1 ", "second", true)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_updates_in_place_and_inserts_new_skus() {
        let repo = InMemoryProductRepository::new();
        let existing = repo.create(draft("B", "old name", true)).await.unwrap();

        assert_eq!(repo.upsert_by_sku(draft("b", "new name", false)).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(repo.upsert_by_sku(draft("A", "fresh", true)).await.unwrap(), UpsertOutcome::Inserted);

        let updated = repo.get(existing.id).await.unwrap().unwrap();
        assert_eq!(updated.name, "new name");
        assert!(!updated.is_active);
        assert_eq!(updated.created_at, existing.created_at);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_rejects_sku_owned_by_another_product() {
        let repo = InMemoryProductRepository::new();
        repo.create(draft("A", "a", true)).await.unwrap();
        let b = repo.create(draft("B", "b", true)).await.unwrap();

        let patch = ProductPatch {
            sku: Some("a".to_string()),
            ..Default::default()
        };
        assert!(matches!(repo.update(b.id, patch).await, Err(RepositoryError::Conflict(_))));

        let rename = ProductPatch {
            sku: Some("C".to_string()),
            ..Default::default()
        };
        repo.update(b.id, rename).await.unwrap();
        assert_eq!(repo.upsert_by_sku(draft("c", "via import", true)).await.unwrap(), UpsertOutcome::Updated);
        assert_eq!(repo.upsert_by_sku(draft("b", "reused", true)).await.unwrap(), UpsertOutcome::Inserted);
    }

    #[tokio::test]
    async fn update_and_delete_unknown_ids() {
        let repo = InMemoryProductRepository::new();
        let id = ProductId::new();
        assert!(matches!(repo.update(id, ProductPatch::default()).await, Err(RepositoryError::NotFound)));
        assert!(matches!(repo.delete(id).await, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn bulk_delete_empties_the_catalog() {
        let repo = InMemoryProductRepository::new();
        for sku in ["A", "B", "C"] {
            repo.create(draft(sku, "n", true)).await.unwrap();
        }

        assert_eq!(repo.bulk_delete().await.unwrap(), 3);
        let page = repo.list(&ProductFilter::default(), PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());

        repo.create(draft("A", "again", true)).await.unwrap();
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let repo = InMemoryProductRepository::new();
        for i in 0..5 {
            repo.create(draft(&format!("SKU-{i}"), "widget", i % 2 == 0)).await.unwrap();
        }
        repo.create(draft("OTHER", "gadget", true)).await.unwrap();

        let filter = ProductFilter::from_query(Some("sku-"), None, None, Some("true"));
        let page = repo.list(&filter, PageRequest::new(Some(1), Some(2))).await.unwrap();

        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.items.len(), 2);
        assert!(page.items.iter().all(|p| p.is_active && p.sku.starts_with("SKU-")));
    }
}
