use serde::Serialize;

use crate::core::time::format_primitive;
use crate::db::models::Submission;
use crate::db::types::{ProcessingStage, SubmissionStatus};
use crate::pipeline::types::GradeResult;

/// Full submission view for teachers, results included.
#[derive(Debug, Serialize)]
pub(crate) struct SubmissionResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) teacher_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) processing_stage: Option<ProcessingStage>,
    pub(crate) error: Option<String>,
    pub(crate) page_count: usize,
    pub(crate) results: Option<Vec<GradeResult>>,
    pub(crate) total_score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percentage: Option<f64>,
    pub(crate) teacher_overrides_applied: bool,
    pub(crate) approved_by: Option<String>,
    pub(crate) approved_at: Option<String>,
    pub(crate) processed_at: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        Self {
            id: submission.id,
            exam_id: submission.exam_id,
            student_id: submission.student_id,
            student_name: submission.student_name,
            teacher_id: submission.teacher_id,
            status: submission.status,
            processing_stage: submission.processing_stage,
            error: submission.error,
            page_count: submission.file_paths.0.len(),
            results: submission.results.map(|json| json.0),
            total_score: submission.total_score,
            max_score: submission.max_score,
            percentage: submission.percentage,
            teacher_overrides_applied: submission.teacher_overrides_applied,
            approved_by: submission.approved_by,
            approved_at: submission.approved_at.map(format_primitive),
            processed_at: submission.processed_at.map(format_primitive),
            created_at: format_primitive(submission.created_at),
            updated_at: format_primitive(submission.updated_at),
        }
    }
}

/// Compact view for listings: no per-question results.
#[derive(Debug, Serialize)]
pub(crate) struct SubmissionListItem {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) processing_stage: Option<ProcessingStage>,
    pub(crate) error: Option<String>,
    pub(crate) total_score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percentage: Option<f64>,
    pub(crate) created_at: String,
}

impl From<Submission> for SubmissionListItem {
    fn from(submission: Submission) -> Self {
        Self {
            id: submission.id,
            exam_id: submission.exam_id,
            student_id: submission.student_id,
            student_name: submission.student_name,
            status: submission.status,
            processing_stage: submission.processing_stage,
            error: submission.error,
            total_score: submission.total_score,
            max_score: submission.max_score,
            percentage: submission.percentage,
            created_at: format_primitive(submission.created_at),
        }
    }
}
