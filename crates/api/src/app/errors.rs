use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use bulkimport_core::DomainError;
use bulkimport_infra::catalog::RepositoryError;
use bulkimport_infra::jobs::JobStoreError;
use bulkimport_infra::webhooks::{TestDeliveryError, WebhookStoreError};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": message.into(),
            "code": code,
        })),
    )
        .into_response()
}

fn storage_error(message: String) -> Response {
    tracing::error!(error = %message, "storage failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", message)
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

pub fn repository_error_to_response(err: RepositoryError) -> Response {
    match err {
        RepositoryError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "product not found"),
        e @ RepositoryError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        RepositoryError::Storage(msg) => storage_error(msg),
    }
}

pub fn job_store_error_to_response(err: JobStoreError) -> Response {
    match err {
        JobStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        e @ JobStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        JobStoreError::Transition(e) => domain_error_to_response(e),
        JobStoreError::Storage(msg) => storage_error(msg),
    }
}

pub fn webhook_store_error_to_response(err: WebhookStoreError) -> Response {
    match err {
        WebhookStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "webhook not found"),
        WebhookStoreError::Storage(msg) => storage_error(msg),
    }
}

/// A failed test delivery is reported as 502 with the time spent waiting.
pub fn test_delivery_error_to_response(err: TestDeliveryError) -> Response {
    match err {
        TestDeliveryError::Store(e) => webhook_store_error_to_response(e),
        TestDeliveryError::Delivery(e) => (
            StatusCode::BAD_GATEWAY,
            axum::Json(json!({
                "error": e.message,
                "code": "delivery_failed",
                "elapsed_ms": e.elapsed_ms,
            })),
        )
            .into_response(),
    }
}

pub fn json_rejection(rejection: JsonRejection) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_json", rejection.body_text())
}

pub fn invalid_id(kind: &str) -> Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {kind} id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkimport_core::JobId;

    #[test]
    fn statuses_follow_the_error_kind() {
        assert_eq!(
            domain_error_to_response(DomainError::validation("SKU is required")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            repository_error_to_response(RepositoryError::Conflict("A-1".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            job_store_error_to_response(JobStoreError::NotFound(JobId::new())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            repository_error_to_response(RepositoryError::Storage("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
