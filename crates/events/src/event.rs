use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulkimport_core::{DomainError, JobId};

/// Lifecycle signal raised by the import pipeline. Webhooks subscribe to
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportEventType {
    #[serde(rename = "product.import.started")]
    Started,
    #[serde(rename = "product.import.completed")]
    Completed,
    #[serde(rename = "product.import.failed")]
    Failed,
}

impl ImportEventType {
    pub const ALL: [ImportEventType; 3] = [Self::Started, Self::Completed, Self::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportEventType::Started => "product.import.started",
            ImportEventType::Completed => "product.import.completed",
            ImportEventType::Failed => "product.import.failed",
        }
    }
}

impl core::fmt::Display for ImportEventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportEventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "event_type must be one of: {}",
                    Self::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

/// A lifecycle event for one import job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportEvent {
    pub event_type: ImportEventType,
    pub job_id: JobId,
    pub filename: String,
    pub total_rows: Option<u64>,
    pub processed_rows: u64,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ImportEvent {
    pub fn started(job_id: JobId, filename: impl Into<String>) -> Self {
        Self {
            event_type: ImportEventType::Started,
            job_id,
            filename: filename.into(),
            total_rows: None,
            processed_rows: 0,
            error: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn completed(
        job_id: JobId,
        filename: impl Into<String>,
        total_rows: Option<u64>,
        processed_rows: u64,
    ) -> Self {
        Self {
            event_type: ImportEventType::Completed,
            total_rows,
            processed_rows,
            ..Self::started(job_id, filename)
        }
    }

    pub fn failed(
        job_id: JobId,
        filename: impl Into<String>,
        processed_rows: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            event_type: ImportEventType::Failed,
            processed_rows,
            error: Some(error.into()),
            ..Self::started(job_id, filename)
        }
    }

    /// JSON body delivered to webhook endpoints.
    pub fn payload(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "event": self.event_type.as_str(),
            "job_id": self.job_id.to_string(),
            "filename": self.filename,
            "occurred_at": self.occurred_at.to_rfc3339(),
        });

        match self.event_type {
            ImportEventType::Started => {}
            ImportEventType::Completed => {
                body["total_rows"] = serde_json::json!(self.total_rows);
                body["processed_rows"] = serde_json::json!(self.processed_rows);
            }
            ImportEventType::Failed => {
                body["processed_rows"] = serde_json::json!(self.processed_rows);
                body["error"] = serde_json::json!(self.error);
            }
        }
        body
    }
}
