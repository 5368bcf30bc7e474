use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use time::PrimitiveDateTime;

use crate::db::models::Submission;
use crate::db::types::{ProcessingStage, SubmissionStatus};
use crate::pipeline::types::{GradeResult, ScoreSummary};

pub(crate) struct NewSubmission<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) student_name: &'a str,
    pub(crate) teacher_id: &'a str,
    pub(crate) file_paths: &'a [String],
}

pub(crate) async fn create(
    pool: &PgPool,
    submission: NewSubmission<'_>,
    now: PrimitiveDateTime,
) -> Result<Submission, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (id, exam_id, student_id, student_name, teacher_id, file_paths, status, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
         RETURNING *",
    )
    .bind(submission.id)
    .bind(submission.exam_id)
    .bind(submission.student_id)
    .bind(submission.student_name)
    .bind(submission.teacher_id)
    .bind(Json(submission.file_paths))
    .bind(SubmissionStatus::Uploaded)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Atomically claim the oldest uploaded submission for this worker.
/// `FOR UPDATE SKIP LOCKED` lets concurrent workers claim distinct rows
/// without blocking each other.
pub(crate) async fn claim_next_for_processing(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "WITH candidate AS (
            SELECT id
            FROM submissions
            WHERE status = $1
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE submissions
        SET status = $2,
            processing_stage = $3,
            processing_started_at = $4,
            error = NULL,
            updated_at = $4
        FROM candidate
        WHERE submissions.id = candidate.id
        RETURNING submissions.*",
    )
    .bind(SubmissionStatus::Uploaded)
    .bind(SubmissionStatus::Processing)
    .bind(ProcessingStage::Preprocessing)
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn set_stage(
    pool: &PgPool,
    id: &str,
    stage: ProcessingStage,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions SET processing_stage = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(stage)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn store_results(
    pool: &PgPool,
    id: &str,
    results: &[GradeResult],
    summary: ScoreSummary,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET status = $1,
             processing_stage = NULL,
             results = $2,
             total_score = $3,
             max_score = $4,
             percentage = $5,
             error = NULL,
             processed_at = $6,
             updated_at = $6
         WHERE id = $7",
    )
    .bind(SubmissionStatus::PendingReview)
    .bind(Json(results))
    .bind(summary.total_score)
    .bind(summary.max_score)
    .bind(summary.percentage)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn mark_error(
    pool: &PgPool,
    id: &str,
    message: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET status = $1, error = $2, processed_at = $3, updated_at = $3
         WHERE id = $4",
    )
    .bind(SubmissionStatus::Error)
    .bind(message)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Return submissions stuck in `processing` past the cutoff to the queue.
/// Covers workers that died mid-run.
pub(crate) async fn recover_stale_processing(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE submissions
         SET status = $1,
             processing_stage = NULL,
             processing_started_at = NULL,
             updated_at = $2
         WHERE status = $3 AND processing_started_at < $4",
    )
    .bind(SubmissionStatus::Uploaded)
    .bind(now)
    .bind(SubmissionStatus::Processing)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE exam_id = $1 ORDER BY created_at DESC",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_pending_review_by_teacher(
    pool: &PgPool,
    teacher_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions
         WHERE teacher_id = $1 AND status = $2
         ORDER BY processed_at NULLS LAST, created_at",
    )
    .bind(teacher_id)
    .bind(SubmissionStatus::PendingReview)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_approved_by_student(
    pool: &PgPool,
    student_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions
         WHERE student_id = $1 AND status = $2
         ORDER BY approved_at DESC NULLS LAST",
    )
    .bind(student_id)
    .bind(SubmissionStatus::Approved)
    .fetch_all(pool)
    .await
}

pub(crate) async fn delete(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("DELETE FROM submissions WHERE id = $1").bind(id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Row-locked fetch used inside the approval transaction so two teachers
/// cannot approve the same submission concurrently.
pub(crate) async fn find_for_update(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn apply_approval(
    conn: &mut PgConnection,
    id: &str,
    results: &[GradeResult],
    summary: ScoreSummary,
    approved_by: &str,
    overrides_applied: bool,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET status = $1,
             results = $2,
             total_score = $3,
             max_score = $4,
             percentage = $5,
             teacher_overrides_applied = $6,
             approved_by = $7,
             approved_at = $8,
             updated_at = $8
         WHERE id = $9",
    )
    .bind(SubmissionStatus::Approved)
    .bind(Json(results))
    .bind(summary.total_score)
    .bind(summary.max_score)
    .bind(summary.percentage)
    .bind(overrides_applied)
    .bind(approved_by)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}
