//! Webhook storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use bulkimport_core::WebhookId;
use bulkimport_events::ImportEventType;
use bulkimport_webhooks::{Webhook, WebhookDraft, WebhookPatch};

#[derive(Debug, Clone, thiserror::Error)]
pub enum WebhookStoreError {
    #[error("webhook not found: {0}")]
    NotFound(WebhookId),
    #[error("storage error: {0}")]
    Storage(String),
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Newest first.
    async fn list(&self) -> Result<Vec<Webhook>, WebhookStoreError>;

    async fn get(&self, id: WebhookId) -> Result<Option<Webhook>, WebhookStoreError>;

    async fn create(&self, draft: WebhookDraft) -> Result<Webhook, WebhookStoreError>;

    async fn update(&self, id: WebhookId, patch: WebhookPatch) -> Result<Webhook, WebhookStoreError>;

    async fn delete(&self, id: WebhookId) -> Result<(), WebhookStoreError>;

    /// Enabled webhooks subscribed to `event_type`.
    async fn list_enabled_for(&self, event_type: ImportEventType) -> Result<Vec<Webhook>, WebhookStoreError>;

    /// Overwrite the outcome of the latest delivery attempt. `status_code` is
    /// `None` when no HTTP response was received.
    async fn record_response(
        &self,
        id: WebhookId,
        status_code: Option<u16>,
        elapsed_ms: u64,
    ) -> Result<(), WebhookStoreError>;
}

/// In-memory webhook store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWebhookStore {
    hooks: RwLock<HashMap<WebhookId, Webhook>>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> WebhookStoreError {
        WebhookStoreError::Storage("webhook store lock poisoned".to_string())
    }
}

fn newest_first(hooks: &mut [Webhook]) {
    hooks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn list(&self) -> Result<Vec<Webhook>, WebhookStoreError> {
        let hooks = self.hooks.read().map_err(|_| Self::poisoned())?;
        let mut all: Vec<Webhook> = hooks.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    async fn get(&self, id: WebhookId) -> Result<Option<Webhook>, WebhookStoreError> {
        let hooks = self.hooks.read().map_err(|_| Self::poisoned())?;
        Ok(hooks.get(&id).cloned())
    }

    async fn create(&self, draft: WebhookDraft) -> Result<Webhook, WebhookStoreError> {
        let hook = Webhook::from_draft(draft, Utc::now());
        let mut hooks = self.hooks.write().map_err(|_| Self::poisoned())?;
        hooks.insert(hook.id, hook.clone());
        Ok(hook)
    }

    async fn update(&self, id: WebhookId, patch: WebhookPatch) -> Result<Webhook, WebhookStoreError> {
        let mut hooks = self.hooks.write().map_err(|_| Self::poisoned())?;
        let hook = hooks.get_mut(&id).ok_or(WebhookStoreError::NotFound(id))?;
        hook.apply_patch(patch, Utc::now());
        Ok(hook.clone())
    }

    async fn delete(&self, id: WebhookId) -> Result<(), WebhookStoreError> {
        let mut hooks = self.hooks.write().map_err(|_| Self::poisoned())?;
        hooks.remove(&id).map(|_| ()).ok_or(WebhookStoreError::NotFound(id))
    }

    async fn list_enabled_for(&self, event_type: ImportEventType) -> Result<Vec<Webhook>, WebhookStoreError> {
        let hooks = self.hooks.read().map_err(|_| Self::poisoned())?;
        let mut matching: Vec<Webhook> = hooks
            .values()
            .filter(|h| h.subscribes_to(event_type))
            .cloned()
            .collect();
        newest_first(&mut matching);
        Ok(matching)
    }

    async fn record_response(
        &self,
        id: WebhookId,
        status_code: Option<u16>,
        elapsed_ms: u64,
    ) -> Result<(), WebhookStoreError> {
        let mut hooks = self.hooks.write().map_err(|_| Self::poisoned())?;
        let hook = hooks.get_mut(&id).ok_or(WebhookStoreError::NotFound(id))?;
        hook.record_response(status_code, elapsed_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(event: &str, enabled: bool) -> WebhookDraft {
        WebhookDraft::new("hook", "http://127.0.0.1:9/hook", event, enabled).unwrap()
    }

    #[tokio::test]
    async fn list_enabled_for_skips_disabled_and_other_events() {
        let store = InMemoryWebhookStore::new();
        let wanted = store.create(draft("product.import.completed", true)).await.unwrap();
        store.create(draft("product.import.completed", false)).await.unwrap();
        store.create(draft("product.import.failed", true)).await.unwrap();

        let hooks = store.list_enabled_for(ImportEventType::Completed).await.unwrap();
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].id, wanted.id);
        assert_eq!(store.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn record_response_overwrites_previous_outcome() {
        let store = InMemoryWebhookStore::new();
        let hook = store.create(draft("product.import.started", true)).await.unwrap();

        store.record_response(hook.id, Some(500), 40).await.unwrap();
        store.record_response(hook.id, None, 5000).await.unwrap();

        let hook = store.get(hook.id).await.unwrap().unwrap();
        assert_eq!(hook.last_response_code, None);
        assert_eq!(hook.last_response_ms, Some(5000));
    }

    #[tokio::test]
    async fn delete_unknown_is_not_found() {
        let store = InMemoryWebhookStore::new();
        assert!(matches!(
            store.delete(WebhookId::new()).await,
            Err(WebhookStoreError::NotFound(_))
        ));
    }
}
