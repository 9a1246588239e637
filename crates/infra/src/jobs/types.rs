//! Import job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bulkimport_core::{DomainError, DomainResult, JobId};

/// Import job status. Transitions only move forward:
/// `queued -> processing -> completed | failed` (or `queued -> failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a worker slot
    Queued,
    /// Rows are being read and upserted
    Processing,
    /// Every row was read
    Completed,
    /// Stopped on a fatal error
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::invariant(format!("unknown job status '{other}'"))),
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CSV import run.
///
/// Every mutator validates before touching any field, so a rejected
/// transition leaves the job exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: JobId,
    /// Name of the uploaded file as given by the client.
    pub filename: String,
    /// Where the upload was stored on disk.
    pub file_path: String,
    pub status: JobStatus,
    /// Data rows in the file (header excluded); unknown until counted.
    pub total_rows: Option<u64>,
    pub processed_rows: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(id: JobId, filename: impl Into<String>, file_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            file_path: file_path.into(),
            status: JobStatus::Queued,
            total_rows: None,
            processed_rows: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// queued -> processing
    pub fn start(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Queued {
            return Err(self.rejected("start"));
        }
        self.status = JobStatus::Processing;
        self.processed_rows = 0;
        self.touch();
        Ok(())
    }

    /// Record the row count. Allowed once, while processing.
    pub fn set_total_rows(&mut self, total: u64) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(self.rejected("set total rows on"));
        }
        if self.total_rows.is_some() {
            return Err(DomainError::invariant("total_rows is already set"));
        }
        if self.processed_rows > total {
            return Err(DomainError::invariant(format!(
                "total_rows {total} is below processed_rows {}",
                self.processed_rows
            )));
        }
        self.total_rows = Some(total);
        self.touch();
        Ok(())
    }

    /// Move `processed_rows` forward to `processed`.
    pub fn advance_to(&mut self, processed: u64) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(self.rejected("advance"));
        }
        if processed < self.processed_rows {
            return Err(DomainError::invariant(format!(
                "processed_rows cannot go back from {} to {processed}",
                self.processed_rows
            )));
        }
        if let Some(total) = self.total_rows {
            if processed > total {
                return Err(DomainError::invariant(format!(
                    "processed_rows {processed} exceeds total_rows {total}"
                )));
            }
        }
        self.processed_rows = processed;
        self.touch();
        Ok(())
    }

    /// processing -> completed
    pub fn complete(&mut self) -> DomainResult<()> {
        if self.status != JobStatus::Processing {
            return Err(self.rejected("complete"));
        }
        self.status = JobStatus::Completed;
        self.touch();
        Ok(())
    }

    /// queued | processing -> failed. `processed_rows` keeps its last value.
    pub fn fail(&mut self, message: impl Into<String>) -> DomainResult<()> {
        if self.status.is_terminal() {
            return Err(self.rejected("fail"));
        }
        self.status = JobStatus::Failed;
        self.error_message = Some(message.into());
        self.touch();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn rejected(&self, action: &str) -> DomainError {
        DomainError::invariant(format!("cannot {action} a {} job", self.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn job() -> ImportJob {
        ImportJob::new(JobId::new(), "products.csv", "/tmp/products.csv")
    }

    #[test]
    fn happy_path_lifecycle() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Queued);

        job.start().unwrap();
        job.set_total_rows(3).unwrap();
        job.advance_to(1).unwrap();
        job.advance_to(3).unwrap();
        job.complete().unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 3);
        assert!(job.error_message.is_none());
    }

    #[test]
    fn terminal_jobs_are_immutable() {
        let mut job = job();
        job.start().unwrap();
        job.fail("boom").unwrap();
        let frozen = job.clone();

        assert!(job.complete().is_err());
        assert!(job.fail("again").is_err());
        assert!(job.advance_to(1).is_err());
        assert!(job.start().is_err());
        assert_eq!(job, frozen);
    }

    #[test]
    fn queued_job_can_fail_but_not_complete() {
        let mut job = job();
        assert!(job.complete().is_err());
        job.fail("Uploaded file not found").unwrap();
        assert_eq!(job.error_message.as_deref(), Some("Uploaded file not found"));
    }

    #[test]
    fn counters_stay_within_bounds() {
        let mut job = job();
        job.start().unwrap();
        job.advance_to(2).unwrap();

        assert!(job.set_total_rows(1).is_err());
        job.set_total_rows(4).unwrap();
        assert!(job.set_total_rows(5).is_err());
        assert!(job.advance_to(1).is_err());
        assert!(job.advance_to(5).is_err());
        assert_eq!(job.processed_rows, 2);
    }

    #[test]
    fn status_serializes_lowercase() {
        let value = serde_json::to_value(JobStatus::Processing).unwrap();
        assert_eq!(value, serde_json::json!("processing"));
        assert_eq!(JobStatus::parse("failed").unwrap(), JobStatus::Failed);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn processed_rows_never_decrease_or_overflow_total(
            total in 0u64..50,
            steps in proptest::collection::vec(0u64..60, 0..40),
        ) {
            let mut job = job();
            job.start().unwrap();
            job.set_total_rows(total).unwrap();

            let mut last = 0;
            for step in steps {
                let _ = job.advance_to(step);
                prop_assert!(job.processed_rows >= last);
                prop_assert!(job.processed_rows <= total);
                last = job.processed_rows;
            }
        }
    }
}
