use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        Extension, Multipart,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tokio::io::AsyncWriteExt;

use bulkimport_core::JobId;
use bulkimport_infra::jobs::ImportJob;

use crate::app::routes::collection;
use crate::app::services::AppServices;
use crate::app::errors;

pub fn router() -> Router {
    collection(Router::new(), "/uploads", post(upload_csv))
}

/// Keep the final path component and replace anything outside
/// `[A-Za-z0-9._-]`, so the name is safe to join onto the upload folder.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned.to_string()
    }
}

fn is_csv(filename: &str) -> bool {
    FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

fn bad_upload(message: &'static str) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// POST /uploads/
///
/// Multipart form with a `file` field. The file is written to the upload
/// folder and an import job is queued; the response carries only its id.
pub async fn upload_csv(
    Extension(services): Extension<Arc<AppServices>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> axum::response::Response {
    let Ok(mut multipart) = multipart else {
        return bad_upload("No file provided");
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return bad_upload("No file provided"),
            Err(e) => return errors::json_error(e.status(), "invalid_upload", e.body_text()),
        };
        if field.name() == Some("file") {
            return accept_file(&services, field).await;
        }
    }
}

async fn accept_file(services: &AppServices, mut field: Field<'_>) -> axum::response::Response {
    let filename = match field.file_name() {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return bad_upload("No selected file"),
    };
    if !is_csv(&filename) {
        return bad_upload("Only CSV files are supported");
    }

    let job_id = JobId::new();
    let path = services
        .upload_folder
        .join(format!("{job_id}_{}", sanitize_filename(&filename)));

    let mut file = match tokio::fs::File::create(&path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "could not create upload file");
            return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "Could not save uploaded file");
        }
    };

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = file.write_all(&chunk).await {
                    tracing::error!(path = %path.display(), error = %e, "could not write upload file");
                    discard(&path).await;
                    return errors::json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        "Could not save uploaded file",
                    );
                }
            }
            Ok(None) => break,
            Err(e) => {
                discard(&path).await;
                return errors::json_error(e.status(), "invalid_upload", e.body_text());
            }
        }
    }
    if let Err(e) = file.flush().await {
        tracing::error!(path = %path.display(), error = %e, "could not flush upload file");
        discard(&path).await;
        return errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", "Could not save uploaded file");
    }
    drop(file);

    let job = ImportJob::new(job_id, filename, path.to_string_lossy());
    match services.worker.enqueue(job).await {
        Ok(job) => {
            tracing::info!(job_id = %job.id, filename = %job.filename, "upload accepted");
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "job_id": job.id.to_string() }))).into_response()
        }
        Err(e) => {
            discard(&path).await;
            errors::job_store_error_to_response(e)
        }
    }
}

async fn discard(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "could not remove partial upload");
    }
}
