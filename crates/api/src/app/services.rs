use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use bulkimport_events::{ImportEvent, InMemoryEventBus};
use bulkimport_infra::catalog::{InMemoryProductRepository, ProductRepository};
use bulkimport_infra::jobs::{ImportJob, ImportWorker, ImportWorkerConfig, InMemoryJobStore, JobStore};
use bulkimport_infra::postgres::{self, PostgresJobStore, PostgresProductRepository, PostgresWebhookStore};
use bulkimport_infra::webhooks::{DispatcherConfig, InMemoryWebhookStore, RetryPolicy, WebhookDispatcher, WebhookStore};

use crate::app::dto;
use crate::config::AppConfig;

/// Bus carrying import lifecycle events from the worker to the dispatcher.
pub type LifecycleBus = InMemoryEventBus<ImportEvent>;

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppServices {
    pub jobs: Arc<dyn JobStore>,
    pub products: Arc<dyn ProductRepository>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub worker: ImportWorker<LifecycleBus>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub upload_folder: PathBuf,
    realtime_tx: broadcast::Sender<ImportJob>,
}

impl AppServices {
    /// Job snapshots, one per stored state change.
    pub fn realtime_tx(&self) -> &broadcast::Sender<ImportJob> {
        &self.realtime_tx
    }
}

struct Stores {
    jobs: Arc<dyn JobStore>,
    products: Arc<dyn ProductRepository>,
    webhooks: Arc<dyn WebhookStore>,
}

fn in_memory_stores() -> Stores {
    Stores {
        jobs: InMemoryJobStore::arc(),
        products: InMemoryProductRepository::arc(),
        webhooks: InMemoryWebhookStore::arc(),
    }
}

async fn persistent_stores(database_url: &str) -> anyhow::Result<Stores> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    postgres::apply_schema(&pool)
        .await
        .context("failed to apply database schema")?;

    Ok(Stores {
        jobs: Arc::new(PostgresJobStore::new(pool.clone())),
        products: Arc::new(PostgresProductRepository::new(pool.clone())),
        webhooks: Arc::new(PostgresWebhookStore::new(pool)),
    })
}

/// Wire stores, worker and dispatcher. Must run inside a tokio runtime: the
/// dispatcher's bus listener is spawned here.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let stores = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(url)) => {
            tracing::info!("using Postgres stores");
            persistent_stores(url).await?
        }
        (true, None) => anyhow::bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"),
        (false, _) => {
            tracing::info!("using in-memory stores");
            in_memory_stores()
        }
    };

    tokio::fs::create_dir_all(&config.upload_folder)
        .await
        .with_context(|| format!("failed to create upload folder {}", config.upload_folder.display()))?;

    // Realtime channel (SSE): lossy broadcast, filtered per job in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<ImportJob>(256);

    let bus: Arc<LifecycleBus> = Arc::new(InMemoryEventBus::new());

    let client = reqwest::Client::builder()
        .user_agent(concat!("bulkimport/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;
    let dispatcher = Arc::new(WebhookDispatcher::new(
        client,
        stores.webhooks.clone(),
        DispatcherConfig {
            timeout: config.webhook_timeout,
            test_timeout: config.webhook_test_timeout,
            retry: RetryPolicy::new(config.webhook_max_attempts, config.webhook_retry_delay),
        },
    ));
    // Subscribes before the worker can publish anything.
    dispatcher.clone().spawn_listener(&*bus);

    let worker = ImportWorker::new(
        stores.jobs.clone(),
        stores.products.clone(),
        bus,
        realtime_tx.clone(),
        ImportWorkerConfig::default().with_max_concurrent(config.max_concurrent_imports),
    );

    Ok(AppServices {
        jobs: stores.jobs,
        products: stores.products,
        webhooks: stores.webhooks,
        worker,
        dispatcher,
        upload_folder: config.upload_folder.clone(),
        realtime_tx,
    })
}

fn job_event(job: &ImportJob) -> SseEvent {
    SseEvent::default().event("job").data(dto::job_to_json(job).to_string())
}

/// `candidate` may replace `current` without moving the job backwards.
fn supersedes(candidate: &ImportJob, current: &ImportJob) -> bool {
    candidate.id == current.id
        && candidate.updated_at >= current.updated_at
        && candidate.processed_rows >= current.processed_rows
}

/// SSE stream for one job: `snapshot` first, then every later state, ending
/// after a terminal status. `updates` must be subscribed before `snapshot`
/// was read so nothing in between is missed.
pub fn job_sse_stream(
    services: Arc<AppServices>,
    mut updates: broadcast::Receiver<ImportJob>,
    snapshot: ImportJob,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<SseEvent, Infallible>>(16);

    tokio::spawn(async move {
        let mut current = snapshot;
        if tx.send(Ok(job_event(&current))).await.is_err() {
            return;
        }

        while !current.is_terminal() {
            let next = match updates.recv().await {
                Ok(job) => job,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(job_id = %current.id, skipped, "job stream lagged; re-reading job");
                    match services.jobs.get(current.id).await {
                        Ok(Some(job)) => job,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(job_id = %current.id, error = %e, "could not re-read job");
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if !supersedes(&next, &current) {
                continue;
            }
            current = next;
            if tx.send(Ok(job_event(&current))).await.is_err() {
                return;
            }
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
