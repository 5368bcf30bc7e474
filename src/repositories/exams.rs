use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Exam;
use crate::pipeline::types::AnswerKey;

pub(crate) struct NewExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) subject: &'a str,
    pub(crate) grade_level: &'a str,
    pub(crate) teacher_id: &'a str,
    pub(crate) answer_key: &'a AnswerKey,
    pub(crate) instructions: Option<&'a str>,
}

pub(crate) async fn create(
    pool: &PgPool,
    exam: NewExam<'_>,
    now: PrimitiveDateTime,
) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        "INSERT INTO exams (id, title, subject, grade_level, teacher_id, answer_key, instructions, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
         RETURNING *",
    )
    .bind(exam.id)
    .bind(exam.title)
    .bind(exam.subject)
    .bind(exam.grade_level)
    .bind(exam.teacher_id)
    .bind(Json(exam.answer_key))
    .bind(exam.instructions)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>("SELECT * FROM exams WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_by_teacher(
    pool: &PgPool,
    teacher_id: &str,
) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        "SELECT * FROM exams WHERE teacher_id = $1 ORDER BY created_at DESC",
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn update_answer_key(
    pool: &PgPool,
    id: &str,
    teacher_id: &str,
    answer_key: &AnswerKey,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(
        "UPDATE exams
         SET answer_key = $1, updated_at = $2
         WHERE id = $3 AND teacher_id = $4
         RETURNING *",
    )
    .bind(Json(answer_key))
    .bind(now)
    .bind(id)
    .bind(teacher_id)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn delete(
    pool: &PgPool,
    id: &str,
    teacher_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exams WHERE id = $1 AND teacher_id = $2")
        .bind(id)
        .bind(teacher_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
