//! Operator-configured HTTP callbacks subscribed to import lifecycle events.

pub mod webhook;

pub use webhook::{validate_url, Webhook, WebhookDraft, WebhookPatch};
