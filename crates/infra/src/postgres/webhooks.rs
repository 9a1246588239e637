use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use bulkimport_core::WebhookId;
use bulkimport_events::ImportEventType;
use bulkimport_webhooks::{Webhook, WebhookDraft, WebhookPatch};

use super::{from_db_count, map_sqlx_error, to_db_count};
use crate::webhooks::store::{WebhookStore, WebhookStoreError};

const COLUMNS: &str =
    "id, name, url, event_type, is_enabled, last_response_code, last_response_ms, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresWebhookStore {
    pool: Arc<PgPool>,
}

impl PostgresWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

fn storage(operation: &str) -> impl Fn(sqlx::Error) -> WebhookStoreError + '_ {
    move |e| WebhookStoreError::Storage(map_sqlx_error(operation, e).into_message())
}

fn row_to_webhook(row: &PgRow) -> Result<Webhook, WebhookStoreError> {
    let decode = |e: sqlx::Error| WebhookStoreError::Storage(format!("failed to decode webhooks row: {e}"));

    let id: Uuid = row.try_get("id").map_err(decode)?;
    let event_type: String = row.try_get("event_type").map_err(decode)?;
    let last_response_code: Option<i32> = row.try_get("last_response_code").map_err(decode)?;
    let last_response_ms: Option<i64> = row.try_get("last_response_ms").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(Webhook {
        id: WebhookId::from_uuid(id),
        name: row.try_get("name").map_err(decode)?,
        url: row.try_get("url").map_err(decode)?,
        event_type: event_type
            .parse::<ImportEventType>()
            .map_err(|e| WebhookStoreError::Storage(format!("bad event_type in webhooks row: {e}")))?,
        is_enabled: row.try_get("is_enabled").map_err(decode)?,
        last_response_code: last_response_code.and_then(|c| u16::try_from(c).ok()),
        last_response_ms: last_response_ms.map(from_db_count),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl WebhookStore for PostgresWebhookStore {
    #[instrument(skip(self), err)]
    async fn list(&self) -> Result<Vec<Webhook>, WebhookStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM webhooks ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_webhooks"))?;
        rows.iter().map(row_to_webhook).collect()
    }

    #[instrument(skip(self), fields(webhook_id = %id), err)]
    async fn get(&self, id: WebhookId) -> Result<Option<Webhook>, WebhookStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM webhooks WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(storage("get_webhook"))?;
        row.as_ref().map(row_to_webhook).transpose()
    }

    #[instrument(skip(self, draft), fields(event_type = %draft.event_type), err)]
    async fn create(&self, draft: WebhookDraft) -> Result<Webhook, WebhookStoreError> {
        let hook = Webhook::from_draft(draft, Utc::now());
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, name, url, event_type, is_enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(*hook.id.as_uuid())
        .bind(&hook.name)
        .bind(&hook.url)
        .bind(hook.event_type.as_str())
        .bind(hook.is_enabled)
        .bind(hook.created_at)
        .bind(hook.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(storage("create_webhook"))?;
        Ok(hook)
    }

    #[instrument(skip(self, patch), fields(webhook_id = %id), err)]
    async fn update(&self, id: WebhookId, patch: WebhookPatch) -> Result<Webhook, WebhookStoreError> {
        let mut tx = self.pool.begin().await.map_err(storage("begin_transaction"))?;

        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM webhooks WHERE id = $1 FOR UPDATE"))
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage("lock_webhook"))?
            .ok_or(WebhookStoreError::NotFound(id))?;
        let mut hook = row_to_webhook(&row)?;
        hook.apply_patch(patch, Utc::now());

        sqlx::query(
            r#"
            UPDATE webhooks
            SET name = $2, url = $3, event_type = $4, is_enabled = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(*hook.id.as_uuid())
        .bind(&hook.name)
        .bind(&hook.url)
        .bind(hook.event_type.as_str())
        .bind(hook.is_enabled)
        .bind(hook.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage("update_webhook"))?;

        tx.commit().await.map_err(storage("commit_transaction"))?;
        Ok(hook)
    }

    #[instrument(skip(self), fields(webhook_id = %id), err)]
    async fn delete(&self, id: WebhookId) -> Result<(), WebhookStoreError> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(storage("delete_webhook"))?;
        if result.rows_affected() == 0 {
            return Err(WebhookStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_enabled_for(&self, event_type: ImportEventType) -> Result<Vec<Webhook>, WebhookStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM webhooks WHERE is_enabled AND event_type = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(event_type.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(storage("list_enabled_webhooks"))?;
        rows.iter().map(row_to_webhook).collect()
    }

    async fn record_response(
        &self,
        id: WebhookId,
        status_code: Option<u16>,
        elapsed_ms: u64,
    ) -> Result<(), WebhookStoreError> {
        let result = sqlx::query(
            "UPDATE webhooks SET last_response_code = $2, last_response_ms = $3 WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .bind(status_code.map(i32::from))
        .bind(to_db_count(elapsed_ms))
        .execute(&*self.pool)
        .await
        .map_err(storage("record_webhook_response"))?;
        if result.rows_affected() == 0 {
            return Err(WebhookStoreError::NotFound(id));
        }
        Ok(())
    }
}
