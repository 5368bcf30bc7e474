use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{ProcessingStage, SubmissionStatus};
use crate::pipeline::types::{AnswerKey, GradeResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) subject: String,
    pub(crate) grade_level: String,
    pub(crate) teacher_id: String,
    pub(crate) answer_key: Json<AnswerKey>,
    pub(crate) instructions: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) teacher_id: String,
    pub(crate) file_paths: Json<Vec<String>>,
    pub(crate) status: SubmissionStatus,
    pub(crate) processing_stage: Option<ProcessingStage>,
    pub(crate) error: Option<String>,
    pub(crate) results: Option<Json<Vec<GradeResult>>>,
    pub(crate) total_score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percentage: Option<f64>,
    pub(crate) teacher_overrides_applied: bool,
    pub(crate) approved_by: Option<String>,
    pub(crate) approved_at: Option<PrimitiveDateTime>,
    pub(crate) processing_started_at: Option<PrimitiveDateTime>,
    pub(crate) processed_at: Option<PrimitiveDateTime>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}
