//! Webhook storage and delivery.

pub mod dispatcher;
pub mod retry;
pub mod store;

pub use dispatcher::{DeliveryError, DeliveryReport, DispatcherConfig, TestDeliveryError, WebhookDispatcher};
pub use retry::RetryPolicy;
pub use store::{InMemoryWebhookStore, WebhookStore, WebhookStoreError};
