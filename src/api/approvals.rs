use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::approval::ApprovalRequest;
use crate::schemas::report::ParentReport;
use crate::schemas::submission::{SubmissionListItem, SubmissionResponse};
use crate::services::approval::ApprovalService;

#[derive(Debug, Deserialize)]
pub(crate) struct TeacherQuery {
    #[serde(alias = "teacherId")]
    teacher_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StudentQuery {
    #[serde(alias = "studentId")]
    student_id: String,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/pending", get(list_pending))
        .route("/:submission_id/approve", post(approve_submission))
        .route("/reports", get(list_parent_reports))
        .route("/reports/:submission_id", get(get_parent_report))
}

async fn list_pending(
    State(state): State<AppState>,
    Query(query): Query<TeacherQuery>,
) -> Result<Json<Vec<SubmissionListItem>>, ApiError> {
    let submissions = ApprovalService::pending_for_teacher(state.db(), &query.teacher_id).await?;
    Ok(Json(submissions.into_iter().map(Into::into).collect()))
}

/// Approve a reviewed submission, optionally correcting individual
/// scores first. Only the owning teacher may approve, and only from
/// `pending_review`.
async fn approve_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    Json(payload): Json<ApprovalRequest>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let submission = ApprovalService::approve(
        state.db(),
        &submission_id,
        &payload.teacher_id,
        &payload.overrides,
    )
    .await?;

    Ok(Json(submission.into()))
}

async fn get_parent_report(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<ParentReport>, ApiError> {
    let submission =
        ApprovalService::approved_report(state.db(), &submission_id, &query.student_id).await?;
    Ok(Json(submission.into()))
}

async fn list_parent_reports(
    State(state): State<AppState>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<Vec<ParentReport>>, ApiError> {
    let submissions =
        ApprovalService::approved_reports_for_student(state.db(), &query.student_id).await?;
    Ok(Json(submissions.into_iter().map(Into::into).collect()))
}
