use axum::{
    body::Bytes,
    extract::{Multipart, Path},
    http::StatusCode,
    response::Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    middleware::auth::AuthenticatedSession,
    models::{SourceFile, StartRequest},
    utils::file,
};

/// Accepts a multipart upload (field `file`) and makes it the selected job.
pub async fn select_file(
    session: AuthenticatedSession,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let mut source: Option<SourceFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidFile(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let media_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| file::guess_media_type(&file_name));
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::InvalidFile(format!("Could not read upload: {}", e)))?;

        source = Some(SourceFile::new(file_name, media_type, data));
    }

    let source = source.ok_or_else(|| AppError::InvalidFile("Missing 'file' field".to_string()))?;
    let job = session.orchestrator.select_file(source)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "File selected",
            "data": job
        })),
    ))
}

/// Starts the selected job. The JSON body is optional: `{"scale": 2|4|8}`.
pub async fn start_processing(
    session: AuthenticatedSession,
    Path(job_id): Path<Uuid>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let request: StartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid start request: {}", e)))?
    };
    let job = session.orchestrator.start_processing(job_id, request.scale).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Processing started",
            "data": {
                "job_id": job.id,
                "status": job.status,
                "progress": job.progress,
                "scale": job.scale
            }
        })),
    ))
}

pub async fn progress(
    session: AuthenticatedSession,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let job = session.orchestrator.job(job_id)?;

    Ok(Json(json!({
        "data": {
            "job_id": job.id,
            "status": job.status,
            "progress": job.progress,
            "failure": job.failure
        }
    })))
}

pub async fn cancel(
    session: AuthenticatedSession,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let job = session.orchestrator.cancel(job_id).await?;

    Ok(Json(json!({
        "message": "Job cancelled",
        "data": job.progress_view()
    })))
}

pub async fn result(
    session: AuthenticatedSession,
    Path(job_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let result = session.orchestrator.result(job_id)?;

    Ok(Json(json!({
        "data": result
    })))
}
