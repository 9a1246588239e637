//! `bulkimport-core`: identifiers and the error taxonomy shared by every crate.
//!
//! Nothing here touches IO; infrastructure errors live in `bulkimport-infra`.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, ProductId, WebhookId};
