use serde::Serialize;

use crate::core::time::format_primitive;
use crate::db::models::Submission;
use crate::pipeline::types::{FactCheckStatus, ItemStatus};

/// Parent-facing report for one approved submission. Internal errors and
/// raw pipeline details are never surfaced here.
#[derive(Debug, Serialize)]
pub(crate) struct ParentReport {
    pub(crate) submission_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_name: String,
    pub(crate) total_score: Option<f64>,
    pub(crate) max_score: Option<f64>,
    pub(crate) percentage: Option<f64>,
    pub(crate) approved_at: Option<String>,
    pub(crate) questions: Vec<ReportQuestion>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReportQuestion {
    pub(crate) question_number: u32,
    pub(crate) student_answer: String,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) feedback: String,
    pub(crate) reviewed_by_teacher: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) learning_insights: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) suggestions: Vec<String>,
}

impl From<Submission> for ParentReport {
    fn from(submission: Submission) -> Self {
        let questions = submission
            .results
            .map(|json| json.0)
            .unwrap_or_default()
            .into_iter()
            .filter(|result| result.status == ItemStatus::Success)
            .map(|result| {
                let (insights, suggestions) = match result.fact_check {
                    Some(annotation) if annotation.status == FactCheckStatus::Success => {
                        (annotation.insights, annotation.suggestions)
                    }
                    _ => (Vec::new(), Vec::new()),
                };
                ReportQuestion {
                    question_number: result.question_number,
                    student_answer: result.student_answer,
                    score: result.score,
                    max_score: result.max_score,
                    feedback: result.feedback,
                    reviewed_by_teacher: result.teacher_override,
                    learning_insights: insights,
                    suggestions,
                }
            })
            .collect();

        Self {
            submission_id: submission.id,
            exam_id: submission.exam_id,
            student_name: submission.student_name,
            total_score: submission.total_score,
            max_score: submission.max_score,
            percentage: submission.percentage,
            approved_at: submission.approved_at.map(format_primitive),
            questions,
        }
    }
}
