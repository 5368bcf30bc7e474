use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::submission::SubmissionResponse;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_submission))
        .route("/:submission_id", get(get_submission).delete(delete_submission))
        .route("/:submission_id/status", get(get_submission_status))
}

#[derive(Debug, Default)]
struct UploadFields {
    exam_id: Option<String>,
    student_id: Option<String>,
    student_name: Option<String>,
    files: Vec<(String, Vec<u8>)>,
}

async fn collect_upload(mut multipart: Multipart) -> Result<UploadFields, ApiError> {
    let mut fields = UploadFields::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Malformed multipart body: {err}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "exam_id" => fields.exam_id = Some(read_text(field).await?),
            "student_id" => fields.student_id = Some(read_text(field).await?),
            "student_name" => fields.student_name = Some(read_text(field).await?),
            "files" | "file" => {
                let filename = field.file_name().unwrap_or("page").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(format!("Failed to read upload: {err}")))?;
                fields.files.push((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }

    Ok(fields)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|err| ApiError::BadRequest(format!("Malformed multipart field: {err}")))
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing required field: {name}")))
}

/// Accept scanned exam pages for grading. The submission lands in
/// `uploaded` status; a background worker picks it up from there.
async fn upload_submission(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmissionResponse>), ApiError> {
    let fields = collect_upload(multipart).await?;
    let exam_id = required(fields.exam_id, "exam_id")?;
    let student_id = required(fields.student_id, "student_id")?;
    let student_name = required(fields.student_name, "student_name")?;

    if fields.files.is_empty() {
        return Err(ApiError::BadRequest("At least one image file is required".to_string()));
    }
    let max_images = state.settings().storage().max_images_per_submission as usize;
    if fields.files.len() > max_images {
        return Err(ApiError::BadRequest(format!(
            "Too many images: {} (limit {max_images})",
            fields.files.len()
        )));
    }

    let exam = repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    let submission_id = Uuid::new_v4().to_string();
    let mut file_paths = Vec::with_capacity(fields.files.len());
    for (index, (filename, bytes)) in fields.files.iter().enumerate() {
        match state.storage().save_submission_image(&submission_id, index, filename, bytes).await {
            Ok(path) => file_paths.push(path),
            Err(err) => {
                state.storage().delete_files(&file_paths).await;
                return Err(err.into());
            }
        }
    }

    let submission = match repositories::submissions::create(
        state.db(),
        repositories::submissions::NewSubmission {
            id: &submission_id,
            exam_id: &exam.id,
            student_id: &student_id,
            student_name: &student_name,
            teacher_id: &exam.teacher_id,
            file_paths: &file_paths,
        },
        primitive_now_utc(),
    )
    .await
    {
        Ok(submission) => submission,
        Err(err) => {
            state.storage().delete_files(&file_paths).await;
            return Err(ApiError::internal(err, "Failed to record submission"));
        }
    };

    metrics::counter!("submissions_uploaded_total").increment(1);
    Ok((StatusCode::CREATED, Json(submission.into())))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let submission = repositories::submissions::find_by_id(state.db(), &submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load submission"))?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;
    Ok(Json(submission.into()))
}

#[derive(Debug, Serialize)]
struct SubmissionStatusResponse {
    id: String,
    status: crate::db::types::SubmissionStatus,
    processing_stage: Option<crate::db::types::ProcessingStage>,
    error: Option<String>,
}

async fn get_submission_status(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<Json<SubmissionStatusResponse>, ApiError> {
    let submission = repositories::submissions::find_by_id(state.db(), &submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load submission"))?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;

    Ok(Json(SubmissionStatusResponse {
        id: submission.id,
        status: submission.status,
        processing_stage: submission.processing_stage,
        error: submission.error,
    }))
}

async fn delete_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let submission = repositories::submissions::find_by_id(state.db(), &submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load submission"))?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;

    repositories::submissions::delete(state.db(), &submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to delete submission"))?;
    state.storage().delete_files(&submission.file_paths.0).await;

    Ok(StatusCode::NO_CONTENT)
}
