use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use bulkimport_core::ProductId;
use bulkimport_products::{Page, PageRequest, Product, ProductDraft, ProductFilter, ProductPatch};

use super::{from_db_count, map_sqlx_error, to_db_count, SqlFailure};
use crate::catalog::{ProductRepository, RepositoryError, UpsertOutcome};

const COLUMNS: &str = "id, sku, name, description, price, is_active, created_at, updated_at";

/// Filter predicates shared by the list and count queries. Parameters `$1..$4`
/// are NULL when the filter is absent; needles arrive lower-cased.
const FILTER: &str = r#"
    ($1::text IS NULL OR strpos(sku_normalized, $1) > 0)
    AND ($2::text IS NULL OR strpos(lower(name), $2) > 0)
    AND ($3::text IS NULL OR strpos(lower(coalesce(description, '')), $3) > 0)
    AND ($4::boolean IS NULL OR is_active = $4)
"#;

/// Postgres-backed product repository. SKU uniqueness is enforced by the
/// unique index on `sku_normalized`.
#[derive(Debug, Clone)]
pub struct PostgresProductRepository {
    pool: Arc<PgPool>,
}

impl PostgresProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn storage(operation: &str) -> impl Fn(sqlx::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::Storage(map_sqlx_error(operation, e).into_message())
}

fn conflict_or_storage<'a>(operation: &'a str, sku: &'a str) -> impl Fn(sqlx::Error) -> RepositoryError + 'a {
    move |e| match map_sqlx_error(operation, e) {
        SqlFailure::UniqueViolation(_) => RepositoryError::Conflict(sku.to_string()),
        SqlFailure::Other(msg) => RepositoryError::Storage(msg),
    }
}

fn row_to_product(row: &PgRow) -> Result<Product, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Storage(format!("failed to decode products row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let price: Option<Decimal> = row.try_get("price").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(Product {
        id: ProductId::from_uuid(id),
        sku: row.try_get("sku").map_err(decode)?,
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        price,
        is_active: row.try_get("is_active").map_err(decode)?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    #[instrument(skip(self), err)]
    async fn list(&self, filter: &ProductFilter, page: PageRequest) -> Result<Page<Product>, RepositoryError> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {FILTER}"))
            .bind(filter.sku.as_deref())
            .bind(filter.name.as_deref())
            .bind(filter.description.as_deref())
            .bind(filter.is_active)
            .fetch_one(&*self.pool)
            .await
            .map_err(storage("count_products"))?;

        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM products WHERE {FILTER} ORDER BY created_at DESC, id DESC LIMIT $5 OFFSET $6"
        ))
        .bind(filter.sku.as_deref())
        .bind(filter.name.as_deref())
        .bind(filter.description.as_deref())
        .bind(filter.is_active)
        .bind(to_db_count(page.limit()))
        .bind(to_db_count(page.offset()))
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_products"))?;

        let items = rows.iter().map(row_to_product).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, from_db_count(total), page))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn get(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM products WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage("get_product"))?;
        row.as_ref().map(row_to_product).transpose()
    }

    #[instrument(skip(self, draft), fields(sku = %draft.sku), err)]
    async fn create(&self, draft: ProductDraft) -> Result<Product, RepositoryError> {
        let product = Product::from_draft(draft, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO products (
                id, sku, sku_normalized, name, description, price, is_active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(product.sku_key())
        .bind(&product.name)
        .bind(product.description.as_deref())
        .bind(product.price)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(conflict_or_storage("create_product", &product.sku))?;
        Ok(product)
    }

    #[instrument(skip(self, patch), fields(product_id = %id), err)]
    async fn update(&self, id: ProductId, patch: ProductPatch) -> Result<Product, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin_transaction"))?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM products WHERE id = $1 FOR UPDATE"))
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("lock_product"))?
            .ok_or(RepositoryError::NotFound)?;
        let mut product = row_to_product(&row)?;
        product.apply_patch(patch, Utc::now());

        sqlx::query(
            r#"
            UPDATE products
            SET sku = $2,
                sku_normalized = $3,
                name = $4,
                description = $5,
                price = $6,
                is_active = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(product.sku_key())
        .bind(&product.name)
        .bind(product.description.as_deref())
        .bind(product.price)
        .bind(product.is_active)
        .bind(product.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(conflict_or_storage("update_product", &product.sku))?;

        tx.commit().await.map_err(storage("commit_transaction"))?;
        Ok(product)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete(&self, id: ProductId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(storage("delete_product"))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn bulk_delete(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM products")
            .execute(&*self.pool)
            .await
            .map_err(storage("bulk_delete_products"))?;
        Ok(result.rows_affected())
    }

    async fn upsert_by_sku(&self, draft: ProductDraft) -> Result<UpsertOutcome, RepositoryError> {
        let product = Product::from_draft(draft, Utc::now());
        // `xmax = 0` only for a freshly inserted tuple.
        let inserted: bool = sqlx::query_scalar(
            r#"
            INSERT INTO products (
                id, sku, sku_normalized, name, description, price, is_active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (sku_normalized) DO UPDATE SET
                sku = EXCLUDED.sku,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                is_active = EXCLUDED.is_active,
                updated_at = EXCLUDED.updated_at
            RETURNING (xmax = 0)
            "#,
        )
        .bind(*product.id.as_uuid())
        .bind(&product.sku)
        .bind(product.sku_key())
        .bind(&product.name)
        .bind(product.description.as_deref())
        .bind(product.price)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(storage("upsert_product"))?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&*self.pool)
            .await
            .map_err(storage("count_products"))?;
        Ok(from_db_count(total))
    }
}
