//! Webhook delivery.
//!
//! Deliveries never feed back into the import pipeline: every outcome is
//! recorded on the webhook and logged, and nothing is returned to the job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use bulkimport_core::WebhookId;
use bulkimport_events::{EventBus, ImportEvent};
use bulkimport_webhooks::Webhook;

use super::retry::RetryPolicy;
use super::store::{WebhookStore, WebhookStoreError};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Per-attempt timeout for lifecycle deliveries
    pub timeout: Duration,
    /// Timeout for the operator-triggered test delivery
    pub test_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            test_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// An attempt that got an HTTP response, whatever its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub status_code: u16,
    pub elapsed_ms: u64,
}

impl DeliveryReport {
    fn is_retriable(&self) -> bool {
        self.status_code >= 500
    }
}

/// An attempt that got no HTTP response (connection failure, timeout).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DeliveryError {
    pub message: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TestDeliveryError {
    #[error(transparent)]
    Store(#[from] WebhookStoreError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    client: Client,
    store: Arc<dyn WebhookStore>,
    config: DispatcherConfig,
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl WebhookDispatcher {
    pub fn new(client: Client, store: Arc<dyn WebhookStore>, config: DispatcherConfig) -> Self {
        Self { client, store, config }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Deliver `event` to every enabled webhook subscribed to its type.
    /// Deliveries run concurrently; returns the number of webhooks targeted.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, job_id = %event.job_id))]
    pub async fn dispatch(&self, event: ImportEvent) -> usize {
        let hooks = match self.store.list_enabled_for(event.event_type).await {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(error = %e, "failed to load webhooks for dispatch");
                return 0;
            }
        };
        if hooks.is_empty() {
            debug!("no webhooks subscribed");
            return 0;
        }

        let payload = Arc::new(event.payload());
        let targeted = hooks.len();
        let mut deliveries = JoinSet::new();
        for hook in hooks {
            let this = self.clone();
            let payload = payload.clone();
            deliveries.spawn(async move { this.deliver_with_retry(&hook, &payload).await });
        }
        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "webhook delivery task aborted");
            }
        }
        targeted
    }

    /// Single immediate delivery to `id`, regardless of event type or
    /// `is_enabled`. The default body is `{"event": <event_type>, "test": true}`.
    #[instrument(skip(self, payload), fields(webhook_id = %id))]
    pub async fn test(&self, id: WebhookId, payload: Option<Value>) -> Result<DeliveryReport, TestDeliveryError> {
        let hook = self
            .store
            .get(id)
            .await?
            .ok_or(WebhookStoreError::NotFound(id))?;

        let body = payload.unwrap_or_else(|| {
            serde_json::json!({ "event": hook.event_type.as_str(), "test": true })
        });

        let outcome = self.attempt(&hook.url, &body, self.config.test_timeout).await;
        self.record(&hook, &outcome).await;
        Ok(outcome?)
    }

    /// Run dispatch for every event published on `bus`, until the bus goes
    /// away. Must be called from within a tokio runtime.
    pub fn spawn_listener<B>(self: Arc<Self>, bus: &B) -> JoinHandle<()>
    where
        B: EventBus<ImportEvent>,
    {
        let sub = bus.subscribe();
        let runtime = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || {
            info!("webhook dispatcher listening");
            while let Ok(event) = sub.recv() {
                let dispatcher = self.clone();
                runtime.spawn(async move {
                    dispatcher.dispatch(event).await;
                });
            }
            info!("webhook dispatcher stopped");
        })
    }

    async fn deliver_with_retry(&self, hook: &Webhook, payload: &Value) {
        let policy = &self.config.retry;
        let mut attempt = 1;
        loop {
            let outcome = self.attempt(&hook.url, payload, self.config.timeout).await;
            self.record(hook, &outcome).await;

            let retriable = match &outcome {
                Ok(report) => report.is_retriable(),
                Err(_) => true,
            };
            if !retriable || !policy.should_retry(attempt) {
                match outcome {
                    Ok(report) if !report.is_retriable() => {
                        debug!(webhook_id = %hook.id, status_code = report.status_code, attempt, "webhook delivered");
                    }
                    Ok(report) => {
                        warn!(webhook_id = %hook.id, status_code = report.status_code, attempt, "webhook delivery gave up");
                    }
                    Err(e) => {
                        warn!(webhook_id = %hook.id, error = %e, attempt, "webhook delivery gave up");
                    }
                }
                return;
            }

            let delay = policy.delay_for_attempt(attempt);
            debug!(webhook_id = %hook.id, attempt, delay_ms = delay.as_millis() as u64, "retrying webhook delivery");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, url: &str, body: &Value, timeout: Duration) -> Result<DeliveryReport, DeliveryError> {
        let start = Instant::now();
        let result = self.client.post(url).json(body).timeout(timeout).send().await;
        let elapsed_ms = elapsed_ms(start);

        match result {
            Ok(response) => Ok(DeliveryReport {
                status_code: response.status().as_u16(),
                elapsed_ms,
            }),
            Err(e) if e.is_timeout() => Err(DeliveryError {
                message: format!("request timed out after {} ms", timeout.as_millis()),
                elapsed_ms,
            }),
            Err(e) => Err(DeliveryError {
                message: e.to_string(),
                elapsed_ms,
            }),
        }
    }

    async fn record(&self, hook: &Webhook, outcome: &Result<DeliveryReport, DeliveryError>) {
        let (status_code, elapsed_ms) = match outcome {
            Ok(report) => (Some(report.status_code), report.elapsed_ms),
            Err(e) => (None, e.elapsed_ms),
        };
        if let Err(e) = self.store.record_response(hook.id, status_code, elapsed_ms).await {
            // The webhook may have been deleted while the delivery was in flight.
            debug!(webhook_id = %hook.id, error = %e, "could not record webhook response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::store::InMemoryWebhookStore;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use bulkimport_core::JobId;
    use bulkimport_webhooks::WebhookDraft;
    use std::sync::Mutex;

    type Received = Arc<Mutex<Vec<(u16, Value)>>>;

    async fn respond(State(received): State<Received>, Path(code): Path<u16>, Json(body): Json<Value>) -> StatusCode {
        received.lock().unwrap().push((code, body));
        StatusCode::from_u16(code).unwrap()
    }

    async fn receiver() -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new().route("/status/:code", post(respond)).with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), received)
    }

    /// Accepts connections and never answers them.
    async fn hanging_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                open.push(socket);
            }
        });
        format!("http://{addr}/hook")
    }

    fn dispatcher(store: Arc<InMemoryWebhookStore>) -> WebhookDispatcher {
        let config = DispatcherConfig {
            timeout: Duration::from_secs(2),
            test_timeout: Duration::from_secs(2),
            retry: RetryPolicy::new(3, Duration::from_millis(10)),
        };
        WebhookDispatcher::new(Client::new(), store, config)
    }

    async fn hook(store: &InMemoryWebhookStore, url: &str, event: &str, enabled: bool) -> Webhook {
        store
            .create(WebhookDraft::new("hook", url, event, enabled).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn dispatch_reaches_only_enabled_matching_hooks() {
        let (base, received) = receiver().await;
        let store = InMemoryWebhookStore::arc();
        let target = hook(&store, &format!("{base}/status/200"), "product.import.completed", true).await;
        let disabled = hook(&store, &format!("{base}/status/201"), "product.import.completed", false).await;
        hook(&store, &format!("{base}/status/202"), "product.import.failed", true).await;

        let event = ImportEvent::completed(JobId::new(), "p.csv", Some(3), 3);
        assert_eq!(dispatcher(store.clone()).dispatch(event).await, 1);

        let received = received.lock().unwrap().clone();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1["event"], "product.import.completed");
        assert_eq!(received[0].1["processed_rows"], 3);

        let target = store.get(target.id).await.unwrap().unwrap();
        assert_eq!(target.last_response_code, Some(200));
        assert!(target.last_response_ms.is_some());
        let disabled = store.get(disabled.id).await.unwrap().unwrap();
        assert_eq!(disabled.last_response_code, None);
        assert_eq!(disabled.last_response_ms, None);
    }

    #[tokio::test]
    async fn server_errors_are_retried_client_errors_are_not() {
        let (base, received) = receiver().await;
        let store = InMemoryWebhookStore::arc();
        let failing = hook(&store, &format!("{base}/status/503"), "product.import.started", true).await;
        let rejected = hook(&store, &format!("{base}/status/404"), "product.import.started", true).await;

        dispatcher(store.clone())
            .dispatch(ImportEvent::started(JobId::new(), "p.csv"))
            .await;

        let received = received.lock().unwrap().clone();
        assert_eq!(received.iter().filter(|(code, _)| *code == 503).count(), 3);
        assert_eq!(received.iter().filter(|(code, _)| *code == 404).count(), 1);
        assert_eq!(store.get(failing.id).await.unwrap().unwrap().last_response_code, Some(503));
        assert_eq!(store.get(rejected.id).await.unwrap().unwrap().last_response_code, Some(404));
    }

    #[tokio::test]
    async fn test_delivery_ignores_enabled_flag_and_uses_default_body() {
        let (base, received) = receiver().await;
        let store = InMemoryWebhookStore::arc();
        let disabled = hook(&store, &format!("{base}/status/200"), "product.import.failed", false).await;

        let report = dispatcher(store.clone()).test(disabled.id, None).await.unwrap();
        assert_eq!(report.status_code, 200);

        let received = received.lock().unwrap().clone();
        assert_eq!(received[0].1, serde_json::json!({"event": "product.import.failed", "test": true}));
        assert_eq!(store.get(disabled.id).await.unwrap().unwrap().last_response_code, Some(200));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_reported_and_recorded() {
        let store = InMemoryWebhookStore::arc();
        let dead = hook(&store, "http://127.0.0.1:1/hook", "product.import.started", true).await;

        let err = dispatcher(store.clone()).test(dead.id, Some(serde_json::json!({"ping": 1}))).await.unwrap_err();
        assert!(matches!(err, TestDeliveryError::Delivery(_)));

        let dead = store.get(dead.id).await.unwrap().unwrap();
        assert_eq!(dead.last_response_code, None);
        assert!(dead.last_response_ms.is_some());
    }

    #[tokio::test]
    async fn hanging_endpoint_times_out_without_delaying_other_hooks() {
        let (base, _received) = receiver().await;
        let store = InMemoryWebhookStore::arc();
        let slow = hook(&store, &hanging_endpoint().await, "product.import.completed", true).await;
        let fast = hook(&store, &format!("{base}/status/200"), "product.import.completed", true).await;

        let config = DispatcherConfig {
            timeout: Duration::from_millis(300),
            test_timeout: Duration::from_millis(300),
            retry: RetryPolicy::new(2, Duration::from_millis(10)),
        };
        let dispatcher = WebhookDispatcher::new(Client::new(), store.clone(), config);
        let started = Instant::now();
        let running = tokio::spawn(async move {
            dispatcher
                .dispatch(ImportEvent::completed(JobId::new(), "p.csv", Some(1), 1))
                .await
        });

        let mut fast_code = None;
        for _ in 0..25 {
            fast_code = store.get(fast.id).await.unwrap().unwrap().last_response_code;
            if fast_code.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fast_code, Some(200));
        assert!(started.elapsed() < Duration::from_millis(300));

        assert_eq!(running.await.unwrap(), 2);
        assert!(started.elapsed() < Duration::from_secs(2));
        let slow = store.get(slow.id).await.unwrap().unwrap();
        assert_eq!(slow.last_response_code, None);
        assert!(slow.last_response_ms.is_some_and(|ms| ms >= 290));
    }

    #[tokio::test]
    async fn test_unknown_webhook_is_not_found() {
        let store = InMemoryWebhookStore::arc();
        let err = dispatcher(store).test(WebhookId::new(), None).await.unwrap_err();
        assert!(matches!(err, TestDeliveryError::Store(WebhookStoreError::NotFound(_))));
    }
}
