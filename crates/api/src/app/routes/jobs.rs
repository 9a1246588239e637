use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use bulkimport_core::JobId;

use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/events", get(stream_job))
}

fn parse_id(id: &str) -> Result<JobId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("job"))
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.jobs.get(id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::job_store_error_to_response(e),
    }
}

/// GET /jobs/:id/events
///
/// Server-Sent Events: the current job, then one `job` event per change.
/// The stream ends once the job is completed or failed.
pub async fn stream_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let updates = services.realtime_tx().subscribe();
    match services.jobs.get(id).await {
        Ok(Some(job)) => services::job_sse_stream(services.clone(), updates, job).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::job_store_error_to_response(e),
    }
}
