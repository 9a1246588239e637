//! Background CSV import worker.
//!
//! `enqueue` persists the job and returns at once; the import itself runs on
//! the tokio runtime, bounded by a semaphore. Every stored state change is
//! also sent on a broadcast channel for realtime subscribers.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};

use bulkimport_core::JobId;
use bulkimport_events::{EventBus, ImportEvent};
use bulkimport_products::ProductDraft;

use super::store::{JobStore, JobStoreError};
use super::types::ImportJob;
use crate::catalog::{ProductRepository, UpsertOutcome};
use crate::import::csv::{count_rows, fatal_csv_error, strict_reader, ColumnMap, ImportError};

const PROGRESS_EVERY_ROWS: u64 = 100;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);
/// Decoded rows buffered between the CSV reader and the upsert loop.
const ROW_BUFFER: usize = 256;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct ImportWorkerConfig {
    /// Maximum imports running at once; further jobs wait in `queued`.
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
}

impl Default for ImportWorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            name: "import-worker".to_string(),
        }
    }
}

impl ImportWorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Runs CSV imports in the background.
pub struct ImportWorker<B> {
    jobs: Arc<dyn JobStore>,
    products: Arc<dyn ProductRepository>,
    bus: Arc<B>,
    updates: broadcast::Sender<ImportJob>,
    permits: Arc<Semaphore>,
    config: ImportWorkerConfig,
}

impl<B> Clone for ImportWorker<B> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            products: self.products.clone(),
            bus: self.bus.clone(),
            updates: self.updates.clone(),
            permits: self.permits.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B> ImportWorker<B>
where
    B: EventBus<ImportEvent> + 'static,
{
    pub fn new(
        jobs: Arc<dyn JobStore>,
        products: Arc<dyn ProductRepository>,
        bus: Arc<B>,
        updates: broadcast::Sender<ImportJob>,
        config: ImportWorkerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            jobs,
            products,
            bus,
            updates,
            permits,
            config,
        }
    }

    /// Persist `job` as queued and schedule its import. Returns without
    /// waiting for any row to be processed.
    #[instrument(skip(self, job), fields(job_id = %job.id, filename = %job.filename), err)]
    pub async fn enqueue(&self, job: ImportJob) -> Result<ImportJob, JobStoreError> {
        let job = self.jobs.insert(job).await?;
        self.notify(&job);

        let worker = self.clone();
        let id = job.id;
        tokio::spawn(async move {
            worker.run(id).await;
        });
        Ok(job)
    }

    /// Process one job to its terminal state. Exactly one of `complete` or
    /// `fail` is applied.
    pub async fn run(&self, id: JobId) {
        let Ok(_permit) = self.permits.clone().acquire_owned().await else {
            warn!(worker = %self.config.name, job_id = %id, "worker shut down before job started");
            return;
        };

        let job = match self.jobs.start(id).await {
            Ok(job) => job,
            Err(e) => {
                error!(worker = %self.config.name, job_id = %id, error = %e, "could not start import job");
                return;
            }
        };
        info!(worker = %self.config.name, job_id = %id, filename = %job.filename, "import started");
        self.notify(&job);
        self.publish(ImportEvent::started(id, job.filename.clone()));

        match self.import(&job).await {
            Ok(summary) => match self.jobs.complete(id).await {
                Ok(done) => {
                    info!(
                        worker = %self.config.name,
                        job_id = %id,
                        processed_rows = done.processed_rows,
                        inserted = summary.inserted,
                        updated = summary.updated,
                        skipped = summary.skipped,
                        "import completed"
                    );
                    self.notify(&done);
                    self.publish(ImportEvent::completed(
                        id,
                        done.filename.clone(),
                        done.total_rows,
                        done.processed_rows,
                    ));
                }
                Err(e) => self.fail(id, &job.filename, &format!("could not complete job: {e}")).await,
            },
            Err(message) => self.fail(id, &job.filename, &message).await,
        }
    }

    async fn fail(&self, id: JobId, filename: &str, message: &str) {
        match self.jobs.fail(id, message).await {
            Ok(failed) => {
                warn!(
                    worker = %self.config.name,
                    job_id = %id,
                    processed_rows = failed.processed_rows,
                    error = %message,
                    "import failed"
                );
                self.notify(&failed);
                self.publish(ImportEvent::failed(id, filename, failed.processed_rows, message));
            }
            Err(e) => {
                error!(worker = %self.config.name, job_id = %id, error = %e, "could not mark job failed");
            }
        }
    }

    /// Count, then stream and upsert. `Err` carries the job's failure message.
    ///
    /// Both passes read the file from disk on the blocking pool; decoded rows
    /// reach this task through a bounded channel, so memory use does not grow
    /// with the upload size.
    async fn import(&self, job: &ImportJob) -> Result<ImportSummary, String> {
        let path = PathBuf::from(&job.file_path);

        let count_path = path.clone();
        let total = tokio::task::spawn_blocking(move || {
            let file = open_upload(&count_path)?;
            count_rows(file).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("Could not count rows: {e}"))??;
        let job = self.jobs.set_total_rows(job.id, total).await.map_err(store_failure)?;
        self.notify(&job);

        let (tx, mut rx) = mpsc::channel(ROW_BUFFER);
        let decoder = tokio::task::spawn_blocking(move || decode_rows(&path, &tx));

        let mut summary = ImportSummary::default();
        let mut progress = Progress::new();
        while let Some((line, row)) = rx.recv().await {
            match row {
                Ok(draft) => match self.products.upsert_by_sku(draft).await {
                    Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
                    Ok(UpsertOutcome::Updated) => summary.updated += 1,
                    Err(e) => {
                        return Err(self
                            .abort(job.id, &mut progress, format!("Could not save product at line {line}: {e}"))
                            .await);
                    }
                },
                Err(ImportError::Fatal(message)) => return Err(self.abort(job.id, &mut progress, message).await),
                Err(row_error) => {
                    debug!(job_id = %job.id, error = %row_error, "skipping invalid row");
                    summary.skipped += 1;
                }
            }

            progress.record();
            if progress.due() {
                self.flush_progress(job.id, &mut progress).await?;
            }
        }
        self.flush_progress(job.id, &mut progress).await?;

        decoder.await.map_err(|e| format!("CSV reader task failed: {e}"))?;
        Ok(summary)
    }

    /// Persist and broadcast progress not yet seen by the job store.
    async fn flush_progress(&self, id: JobId, progress: &mut Progress) -> Result<(), String> {
        let Some(processed) = progress.pending() else {
            return Ok(());
        };
        let job = self.jobs.advance(id, processed).await.map_err(store_failure)?;
        progress.mark_reported();
        self.notify(&job);
        Ok(())
    }

    /// Keep rows already processed visible before the job fails.
    async fn abort(&self, id: JobId, progress: &mut Progress, message: String) -> String {
        if let Err(e) = self.flush_progress(id, progress).await {
            warn!(worker = %self.config.name, job_id = %id, error = %e, "could not record final progress");
        }
        message
    }

    fn notify(&self, job: &ImportJob) {
        // No receivers is fine: nobody is watching.
        let _ = self.updates.send(job.clone());
    }

    fn publish(&self, event: ImportEvent) {
        if let Err(e) = self.bus.publish(event) {
            warn!(worker = %self.config.name, error = ?e, "failed to publish import event");
        }
    }
}

fn store_failure(e: JobStoreError) -> String {
    format!("Could not update job progress: {e}")
}

/// A decoded data row and its line number in the file.
type DecodedRow = (u64, Result<ProductDraft, ImportError>);

fn open_upload(path: &Path) -> Result<File, String> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => "Uploaded file not found".to_string(),
        _ => format!("Could not read uploaded file: {e}"),
    })
}

/// Strict pass, run on the blocking pool. Stops at the first fatal error or
/// once the receiver is gone.
fn decode_rows(path: &Path, tx: &mpsc::Sender<DecodedRow>) {
    let file = match open_upload(path) {
        Ok(file) => file,
        Err(message) => {
            let _ = tx.blocking_send((1, Err(ImportError::Fatal(message))));
            return;
        }
    };

    let mut reader = strict_reader(file);
    let columns = match reader
        .headers()
        .map_err(fatal_csv_error)
        .and_then(ColumnMap::from_headers)
    {
        Ok(columns) => columns,
        Err(e) => {
            let _ = tx.blocking_send((1, Err(e)));
            return;
        }
    };

    for (index, record) in reader.records().enumerate() {
        let fallback_line = index as u64 + 2;
        let row = match record {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(fallback_line);
                (line, columns.decode(&record, line))
            }
            Err(e) => (fallback_line, Err(fatal_csv_error(e))),
        };
        let fatal = matches!(row.1, Err(ImportError::Fatal(_)));
        if tx.blocking_send(row).is_err() || fatal {
            return;
        }
    }
}

/// Rows processed so far and how much of that the job store has seen.
/// Progress is written every `PROGRESS_EVERY_ROWS` rows or
/// `PROGRESS_INTERVAL`, whichever comes first.
struct Progress {
    processed: u64,
    reported: u64,
    last_report: Instant,
}

impl Progress {
    fn new() -> Self {
        Self {
            processed: 0,
            reported: 0,
            last_report: Instant::now(),
        }
    }

    fn record(&mut self) {
        self.processed += 1;
    }

    fn due(&self) -> bool {
        self.processed - self.reported >= PROGRESS_EVERY_ROWS || self.last_report.elapsed() >= PROGRESS_INTERVAL
    }

    fn pending(&self) -> Option<u64> {
        (self.processed > self.reported).then_some(self.processed)
    }

    fn mark_reported(&mut self) {
        self.reported = self.processed;
        self.last_report = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryProductRepository;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::JobStatus;
    use bulkimport_events::InMemoryEventBus;
    use bulkimport_products::ProductDraft;
    use std::path::PathBuf;
    use std::time::Duration;

    struct Harness {
        jobs: Arc<InMemoryJobStore>,
        products: Arc<InMemoryProductRepository>,
        bus: Arc<InMemoryEventBus<ImportEvent>>,
        worker: ImportWorker<InMemoryEventBus<ImportEvent>>,
        updates: broadcast::Receiver<ImportJob>,
    }

    fn harness() -> Harness {
        harness_with(ImportWorkerConfig::default().with_name("test-worker"))
    }

    fn harness_with(config: ImportWorkerConfig) -> Harness {
        let jobs = InMemoryJobStore::arc();
        let products = InMemoryProductRepository::arc();
        let bus = Arc::new(InMemoryEventBus::new());
        let (tx, rx) = broadcast::channel(256);
        let worker = ImportWorker::new(
            jobs.clone(),
            products.clone(),
            bus.clone(),
            tx,
            config,
        );
        Harness {
            jobs,
            products,
            bus,
            worker,
            updates: rx,
        }
    }

    fn write_csv(contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}_import.csv", JobId::new()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn run_to_end(h: &Harness, path: &str) -> ImportJob {
        let job = h
            .jobs
            .insert(ImportJob::new(JobId::new(), "products.csv", path))
            .await
            .unwrap();
        h.worker.run(job.id).await;
        h.jobs.get(job.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn three_row_example_upserts_and_skips() {
        let h = harness();
        let existing = h
            .products
            .create(ProductDraft::new("B", "old", None, None, true).unwrap())
            .await
            .unwrap();
        let path = write_csv(b"sku,name,price,is_active\nA,Alpha,10.00,yes\nB,Beta,2.5,no\nC,,1,yes\n");

        let job = run_to_end(&h, path.to_str().unwrap()).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_rows, Some(3));
        assert_eq!(job.processed_rows, 3);
        assert_eq!(h.products.count().await.unwrap(), 2);

        let b = h.products.get(existing.id).await.unwrap().unwrap();
        assert_eq!(b.name, "Beta");
        assert!(!b.is_active);
    }

    #[tokio::test]
    async fn missing_file_fails_the_job() {
        let h = harness();
        let job = run_to_end(&h, "/definitely/not/here.csv").await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Uploaded file not found"));
    }

    #[tokio::test]
    async fn ragged_row_is_fatal_and_freezes_progress() {
        let h = harness();
        let path = write_csv(b"sku,name\nA,a\nB,b\nC,c,extra\nD,d\n");

        let job = run_to_end(&h, path.to_str().unwrap()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.total_rows, Some(4));
        assert_eq!(job.processed_rows, 2);
        assert!(job.error_message.unwrap().contains("expected 2 fields, found 3"));
        assert_eq!(h.products.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_sku_column_is_fatal() {
        let h = harness();
        let path = write_csv(b"code,name\nA,a\n");

        let job = run_to_end(&h, path.to_str().unwrap()).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.processed_rows, 0);
        assert_eq!(job.error_message.as_deref(), Some("CSV is missing required column 'sku'"));
    }

    #[tokio::test]
    async fn lifecycle_events_are_published_in_order() {
        let h = harness();
        let sub = h.bus.subscribe();
        let path = write_csv(b"sku,name\nA,a\n");

        let job = run_to_end(&h, path.to_str().unwrap()).await;

        let started = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        let completed = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(started.event_type, bulkimport_events::ImportEventType::Started);
        assert_eq!(completed.event_type, bulkimport_events::ImportEventType::Completed);
        assert_eq!(completed.job_id, job.id);
        assert_eq!(completed.processed_rows, 1);
    }

    #[tokio::test]
    async fn progress_is_broadcast_monotonically() {
        let mut h = harness();
        let path = write_csv(b"sku,name\nA,a\nB,b\nC,c\n");

        run_to_end(&h, path.to_str().unwrap()).await;

        let mut last = 0;
        let mut statuses = Vec::new();
        while let Ok(update) = h.updates.try_recv() {
            assert!(update.processed_rows >= last);
            last = update.processed_rows;
            statuses.push(update.status);
        }
        assert_eq!(statuses.first(), Some(&JobStatus::Processing));
        assert_eq!(statuses.last(), Some(&JobStatus::Completed));
        assert_eq!(last, 3);
    }

    #[tokio::test]
    async fn oversized_price_skips_the_row_without_failing_the_job() {
        let h = harness();
        let path = write_csv(b"sku,name,price\nA,a,1.00\nB,b,12345678901.999\nC,c,3\n");

        let job = run_to_end(&h, path.to_str().unwrap()).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_rows, 3);
        assert_eq!(h.products.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn progress_is_written_in_batches() {
        let mut h = harness();
        let mut csv = String::from("sku,name\n");
        for i in 0..250 {
            csv.push_str(&format!("SKU-{i},Product {i}\n"));
        }
        let path = write_csv(csv.as_bytes());

        let job = run_to_end(&h, path.to_str().unwrap()).await;
        assert_eq!(job.processed_rows, 250);

        let mut progress_updates = 0;
        while let Ok(update) = h.updates.try_recv() {
            if update.status == JobStatus::Processing && update.processed_rows > 0 {
                progress_updates += 1;
            }
        }
        assert!(progress_updates >= 3, "{progress_updates}");
        assert!(progress_updates < 250, "{progress_updates}");
    }

    #[tokio::test]
    async fn jobs_beyond_the_concurrency_limit_stay_queued() {
        let h = harness_with(ImportWorkerConfig::default().with_max_concurrent(1));
        let held = h.worker.permits.clone().acquire_owned().await.unwrap();
        let path = write_csv(b"sku,name\nA,a\n");

        let job = h
            .worker
            .enqueue(ImportJob::new(JobId::new(), "products.csv", path.to_str().unwrap()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.jobs.get(job.id).await.unwrap().unwrap().status, JobStatus::Queued);

        drop(held);
        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = h.jobs.get(job.id).await.unwrap().unwrap().status;
            if status == JobStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn enqueue_returns_before_the_import_finishes() {
        let h = harness();
        let path = write_csv(b"sku,name\nA,a\n");

        let job = h
            .worker
            .enqueue(ImportJob::new(JobId::new(), "products.csv", path.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Queued);

        let mut finished = None;
        for _ in 0..100 {
            let current = h.jobs.get(job.id).await.unwrap().unwrap();
            if current.is_terminal() {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(finished.unwrap().status, JobStatus::Completed);
    }
}
