use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use bulkimport_core::{DomainError, DomainResult, WebhookId};
use bulkimport_events::ImportEventType;

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_url(raw: &str) -> DomainResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DomainError::validation("url is required"));
    }

    let parsed = Url::parse(raw).map_err(|e| DomainError::validation(format!("url is invalid: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DomainError::validation(format!(
                "url must use http or https, got '{other}'"
            )));
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(DomainError::validation("url must include a host"));
    }
    Ok(raw.to_string())
}

fn required_name(raw: &str) -> DomainResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name is required"));
    }
    Ok(name.to_string())
}

/// A registered webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub name: String,
    pub url: String,
    pub event_type: ImportEventType,
    pub is_enabled: bool,
    /// HTTP status of the latest delivery attempt; `None` if it never
    /// produced a response.
    pub last_response_code: Option<u16>,
    /// Wall time of the latest delivery attempt.
    pub last_response_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn from_draft(draft: WebhookDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: WebhookId::new(),
            name: draft.name,
            url: draft.url,
            event_type: draft.event_type,
            is_enabled: draft.is_enabled,
            last_response_code: None,
            last_response_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply_patch(&mut self, patch: WebhookPatch, now: DateTime<Utc>) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(url) = patch.url {
            self.url = url;
        }
        if let Some(event_type) = patch.event_type {
            self.event_type = event_type;
        }
        if let Some(is_enabled) = patch.is_enabled {
            self.is_enabled = is_enabled;
        }
        self.updated_at = now;
    }

    /// Overwrite the outcome of the latest delivery attempt.
    pub fn record_response(&mut self, status_code: Option<u16>, elapsed_ms: u64) {
        self.last_response_code = status_code;
        self.last_response_ms = Some(elapsed_ms);
    }

    /// Whether an automatic dispatch of `event_type` should reach this hook.
    pub fn subscribes_to(&self, event_type: ImportEventType) -> bool {
        self.is_enabled && self.event_type == event_type
    }
}

/// Validated input for registering a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookDraft {
    pub name: String,
    pub url: String,
    pub event_type: ImportEventType,
    pub is_enabled: bool,
}

impl WebhookDraft {
    pub fn new(name: &str, url: &str, event_type: &str, is_enabled: bool) -> DomainResult<Self> {
        Ok(Self {
            name: required_name(name)?,
            url: validate_url(url)?,
            event_type: event_type.parse()?,
            is_enabled,
        })
    }
}

/// Partial update of a webhook; only present fields are validated and applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub event_type: Option<ImportEventType>,
    pub is_enabled: Option<bool>,
}

impl WebhookPatch {
    pub fn new(
        name: Option<&str>,
        url: Option<&str>,
        event_type: Option<&str>,
        is_enabled: Option<bool>,
    ) -> DomainResult<Self> {
        Ok(Self {
            name: name.map(required_name).transpose()?,
            url: url.map(validate_url).transpose()?,
            event_type: event_type.map(str::parse).transpose()?,
            is_enabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert!(validate_url("http://localhost:8080/hook").is_ok());
        assert!(validate_url(" https://example.com ").is_ok());
    }

    #[test]
    fn rejects_other_schemes_and_relative_urls() {
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("/relative/path").is_err());
        assert!(validate_url("").is_err());
        assert!(validate_url("mailto:ops@example.com").is_err());
    }

    #[test]
    fn draft_validates_event_type() {
        let err = WebhookDraft::new("n", "https://x.test", "product.created", true).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let ok = WebhookDraft::new("n", "https://x.test", "product.import.failed", false).unwrap();
        assert_eq!(ok.event_type, ImportEventType::Failed);
        assert!(!ok.is_enabled);
    }

    #[test]
    fn disabled_hook_is_not_subscribed() {
        let mut hook = Webhook::from_draft(
            WebhookDraft::new("n", "https://x.test", "product.import.completed", true).unwrap(),
            Utc::now(),
        );
        assert!(hook.subscribes_to(ImportEventType::Completed));
        assert!(!hook.subscribes_to(ImportEventType::Started));

        hook.apply_patch(
            WebhookPatch::new(None, None, None, Some(false)).unwrap(),
            Utc::now(),
        );
        assert!(!hook.subscribes_to(ImportEventType::Completed));
    }

    #[test]
    fn patch_leaves_delivery_stats_alone() {
        let mut hook = Webhook::from_draft(
            WebhookDraft::new("n", "https://x.test", "product.import.started", true).unwrap(),
            Utc::now(),
        );
        hook.record_response(Some(200), 12);
        hook.apply_patch(WebhookPatch::new(Some("renamed"), None, None, None).unwrap(), Utc::now());

        assert_eq!(hook.name, "renamed");
        assert_eq!(hook.last_response_code, Some(200));
        assert_eq!(hook.last_response_ms, Some(12));
    }
}
