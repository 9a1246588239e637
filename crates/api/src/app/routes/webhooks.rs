use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use bulkimport_core::WebhookId;

use crate::app::routes::collection;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    collection(Router::new(), "/webhooks", get(list_webhooks).post(create_webhook))
        .route(
            "/webhooks/:id",
            get(get_webhook).put(update_webhook).delete(delete_webhook),
        )
        .route("/webhooks/:id/test", post(test_webhook))
}

fn parse_id(id: &str) -> Result<WebhookId, axum::response::Response> {
    id.parse().map_err(|_| errors::invalid_id("webhook"))
}

pub async fn list_webhooks(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.webhooks.list().await {
        Ok(hooks) => {
            let items = hooks.iter().map(dto::webhook_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(items)).into_response()
        }
        Err(e) => errors::webhook_store_error_to_response(e),
    }
}

pub async fn create_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateWebhookRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let draft = match body.into_draft() {
        Ok(d) => d,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match services.webhooks.create(draft).await {
        Ok(hook) => (StatusCode::CREATED, Json(dto::webhook_to_json(&hook))).into_response(),
        Err(e) => errors::webhook_store_error_to_response(e),
    }
}

pub async fn get_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.webhooks.get(id).await {
        Ok(Some(hook)) => (StatusCode::OK, Json(dto::webhook_to_json(&hook))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "webhook not found"),
        Err(e) => errors::webhook_store_error_to_response(e),
    }
}

pub async fn update_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateWebhookRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection(rejection),
    };
    let patch = match body.into_patch() {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match services.webhooks.update(id, patch).await {
        Ok(hook) => (StatusCode::OK, Json(dto::webhook_to_json(&hook))).into_response(),
        Err(e) => errors::webhook_store_error_to_response(e),
    }
}

pub async fn delete_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.webhooks.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::webhook_store_error_to_response(e),
    }
}

/// POST /webhooks/:id/test
///
/// Sends one request right away, even to a disabled webhook. A JSON body, if
/// given, replaces the default test payload.
pub async fn test_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    payload: Option<Json<Value>>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.dispatcher.test(id, payload.map(|Json(v)| v)).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::test_delivery_error_to_response(e),
    }
}
