use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::exam::{AnswerKeyUpdate, ExamCreate, ExamResponse};
use crate::schemas::submission::SubmissionListItem;

#[derive(Debug, Deserialize)]
pub(crate) struct TeacherQuery {
    #[serde(alias = "teacherId")]
    teacher_id: String,
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_exams).post(create_exam))
        .route("/:exam_id", get(get_exam).delete(delete_exam))
        .route("/:exam_id/answer-key", axum::routing::put(update_answer_key))
        .route("/:exam_id/submissions", get(list_exam_submissions))
}

async fn create_exam(
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(axum::http::StatusCode, Json<ExamResponse>), ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let exam = repositories::exams::create(
        state.db(),
        repositories::exams::NewExam {
            id: &Uuid::new_v4().to_string(),
            title: &payload.title,
            subject: &payload.subject,
            grade_level: &payload.grade_level,
            teacher_id: &payload.teacher_id,
            answer_key: &payload.answer_key,
            instructions: payload.instructions.as_deref(),
        },
        primitive_now_utc(),
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to create exam"))?;

    metrics::counter!("exams_created_total").increment(1);
    Ok((axum::http::StatusCode::CREATED, Json(exam.into())))
}

async fn list_exams(
    State(state): State<AppState>,
    Query(query): Query<TeacherQuery>,
) -> Result<Json<Vec<ExamResponse>>, ApiError> {
    let exams = repositories::exams::list_by_teacher(state.db(), &query.teacher_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list exams"))?;
    Ok(Json(exams.into_iter().map(Into::into).collect()))
}

async fn get_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
    Ok(Json(exam.into()))
}

async fn update_answer_key(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    Json(payload): Json<AnswerKeyUpdate>,
) -> Result<Json<ExamResponse>, ApiError> {
    payload.validate().map_err(ApiError::validation)?;

    let exam = repositories::exams::update_answer_key(
        state.db(),
        &exam_id,
        &payload.teacher_id,
        &payload.answer_key,
        primitive_now_utc(),
    )
    .await
    .map_err(|err| ApiError::internal(err, "Failed to update answer key"))?
    .ok_or_else(|| ApiError::NotFound("Exam not found for this teacher".to_string()))?;

    Ok(Json(exam.into()))
}

async fn delete_exam(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
    Query(query): Query<TeacherQuery>,
) -> Result<axum::http::StatusCode, ApiError> {
    let deleted = repositories::exams::delete(state.db(), &exam_id, &query.teacher_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to delete exam"))?;
    if !deleted {
        return Err(ApiError::NotFound("Exam not found for this teacher".to_string()));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

async fn list_exam_submissions(
    State(state): State<AppState>,
    Path(exam_id): Path<String>,
) -> Result<Json<Vec<SubmissionListItem>>, ApiError> {
    if repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam"))?
        .is_none()
    {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    let submissions = repositories::submissions::list_by_exam(state.db(), &exam_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to list submissions"))?;
    Ok(Json(submissions.into_iter().map(Into::into).collect()))
}
