use serde::Deserialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

use crate::core::time::primitive_now_utc;
use crate::db::models::Submission;
use crate::db::types::SubmissionStatus;
use crate::pipeline::types::{clamp, GradeResult, ItemStatus, ScoreSummary};
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum ApprovalError {
    #[error("submission not found")]
    NotFound,
    #[error("submission belongs to a different teacher")]
    PermissionDenied,
    #[error("submission is not awaiting review (status: {0:?})")]
    NotPendingReview(SubmissionStatus),
    #[error("submission has not been approved yet (status: {0:?})")]
    NotApproved(SubmissionStatus),
    #[error("submission has no grading results")]
    MissingResults,
    #[error("no result for question {0}")]
    UnknownQuestion(u32),
    #[error("override score {score} for question {question} exceeds maximum {max}")]
    ScoreExceedsMax { question: u32, score: f64, max: f64 },
    #[error("override score {score} for question {question} is not a valid score")]
    InvalidScore { question: u32, score: f64 },
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// One manual correction applied during review.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ScoreOverride {
    pub(crate) question_number: u32,
    pub(crate) score: f64,
    #[serde(default)]
    pub(crate) reason: Option<String>,
    #[serde(default)]
    pub(crate) feedback: Option<String>,
}

/// Review state machine: a submission in `pending_review` is approved by
/// its own teacher, optionally with per-question score overrides. Totals
/// are always recomputed from the full result list afterwards.
pub(crate) struct ApprovalService;

impl ApprovalService {
    pub(crate) async fn approve(
        pool: &PgPool,
        submission_id: &str,
        teacher_id: &str,
        overrides: &[ScoreOverride],
    ) -> Result<Submission, ApprovalError> {
        let mut tx = pool.begin().await?;

        let submission = repositories::submissions::find_for_update(&mut tx, submission_id)
            .await?
            .ok_or(ApprovalError::NotFound)?;
        ensure_reviewable(&submission, teacher_id)?;

        let mut results =
            submission.results.as_ref().map(|json| json.0.clone()).ok_or(ApprovalError::MissingResults)?;
        let overrides_applied = apply_overrides(&mut results, overrides)?;
        let summary = ScoreSummary::from_results(&results);

        let now = primitive_now_utc();
        repositories::submissions::apply_approval(
            &mut tx,
            submission_id,
            &results,
            summary,
            teacher_id,
            overrides_applied,
            now,
        )
        .await?;
        tx.commit().await?;

        metrics::counter!("submissions_approved_total").increment(1);
        if overrides_applied {
            metrics::counter!("submission_overrides_total").increment(overrides.len() as u64);
        }
        info!(
            submission_id,
            teacher_id,
            overrides = overrides.len(),
            total_score = summary.total_score,
            "Submission approved"
        );

        repositories::submissions::find_by_id(pool, submission_id)
            .await?
            .ok_or(ApprovalError::NotFound)
    }

    pub(crate) async fn pending_for_teacher(
        pool: &PgPool,
        teacher_id: &str,
    ) -> Result<Vec<Submission>, ApprovalError> {
        Ok(repositories::submissions::list_pending_review_by_teacher(pool, teacher_id).await?)
    }

    /// Parent-facing lookup: only approved submissions belonging to the
    /// requesting student's family are visible.
    pub(crate) async fn approved_report(
        pool: &PgPool,
        submission_id: &str,
        student_id: &str,
    ) -> Result<Submission, ApprovalError> {
        let submission = repositories::submissions::find_by_id(pool, submission_id)
            .await?
            .ok_or(ApprovalError::NotFound)?;

        if submission.student_id != student_id {
            return Err(ApprovalError::PermissionDenied);
        }
        if submission.status != SubmissionStatus::Approved {
            return Err(ApprovalError::NotApproved(submission.status));
        }
        Ok(submission)
    }

    pub(crate) async fn approved_reports_for_student(
        pool: &PgPool,
        student_id: &str,
    ) -> Result<Vec<Submission>, ApprovalError> {
        Ok(repositories::submissions::list_approved_by_student(pool, student_id).await?)
    }
}

pub(crate) fn ensure_reviewable(
    submission: &Submission,
    teacher_id: &str,
) -> Result<(), ApprovalError> {
    if submission.teacher_id != teacher_id {
        return Err(ApprovalError::PermissionDenied);
    }
    if submission.status != SubmissionStatus::PendingReview {
        return Err(ApprovalError::NotPendingReview(submission.status));
    }
    Ok(())
}

/// Apply the overrides in place. The whole batch is validated before
/// anything is written, so a rejected override leaves every result as it
/// was. An overridden question counts as graded even when the pipeline
/// had failed it. Returns whether anything changed.
pub(crate) fn apply_overrides(
    results: &mut [GradeResult],
    overrides: &[ScoreOverride],
) -> Result<bool, ApprovalError> {
    for score_override in overrides {
        let question = score_override.question_number;
        let result = results
            .iter()
            .find(|result| result.question_number == question)
            .ok_or(ApprovalError::UnknownQuestion(question))?;

        let score = score_override.score;
        if !score.is_finite() || score < 0.0 {
            return Err(ApprovalError::InvalidScore { question, score });
        }
        if score > result.max_score {
            return Err(ApprovalError::ScoreExceedsMax {
                question,
                score,
                max: result.max_score,
            });
        }
    }

    for score_override in overrides {
        let question = score_override.question_number;
        let Some(result) =
            results.iter_mut().find(|result| result.question_number == question)
        else {
            continue;
        };
        let score = score_override.score;

        result.score = score;
        result.partial_credit = if result.max_score > 0.0 {
            clamp(score / result.max_score, 0.0, 1.0)
        } else {
            0.0
        };
        result.status = ItemStatus::Success;
        result.error = None;
        result.teacher_override = true;
        result.override_reason = score_override.reason.clone();
        if let Some(feedback) = &score_override.feedback {
            result.feedback = feedback.clone();
        }
    }

    Ok(!overrides.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::pipeline::types::FactCheckAnnotation;
    use sqlx::types::Json;

    fn pending_submission() -> Submission {
        let now = primitive_now_utc();
        Submission {
            id: "sub-1".to_string(),
            exam_id: "exam-1".to_string(),
            student_id: "student-1".to_string(),
            student_name: "Sam".to_string(),
            teacher_id: "teacher-1".to_string(),
            file_paths: Json(vec!["page.png".to_string()]),
            status: SubmissionStatus::PendingReview,
            processing_stage: None,
            error: None,
            results: Some(Json(vec![result(1, 1.0, 1.0)])),
            total_score: Some(1.0),
            max_score: Some(1.0),
            percentage: Some(100.0),
            teacher_overrides_applied: false,
            approved_by: None,
            approved_at: None,
            processing_started_at: None,
            processed_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn non_owning_teacher_is_rejected_before_state_checks() {
        let submission = pending_submission();
        assert!(matches!(
            ensure_reviewable(&submission, "someone-else"),
            Err(ApprovalError::PermissionDenied)
        ));
        assert_eq!(submission.status, SubmissionStatus::PendingReview);
    }

    #[test]
    fn only_pending_review_submissions_are_reviewable() {
        let mut submission = pending_submission();
        assert!(ensure_reviewable(&submission, "teacher-1").is_ok());

        for status in [
            SubmissionStatus::Uploaded,
            SubmissionStatus::Processing,
            SubmissionStatus::Approved,
            SubmissionStatus::Error,
        ] {
            submission.status = status;
            assert!(matches!(
                ensure_reviewable(&submission, "teacher-1"),
                Err(ApprovalError::NotPendingReview(s)) if s == status
            ));
        }
    }

    fn result(question_number: u32, score: f64, max_score: f64) -> GradeResult {
        GradeResult {
            question_number,
            student_answer: "answer".to_string(),
            correct_answer: "expected".to_string(),
            score,
            max_score,
            feedback: "original feedback".to_string(),
            partial_credit: if max_score > 0.0 { score / max_score } else { 0.0 },
            confidence: 0.9,
            status: ItemStatus::Success,
            error: None,
            teacher_override: false,
            override_reason: None,
            fact_check: Some(FactCheckAnnotation::skipped("not needed")),
        }
    }

    #[test]
    fn override_rescores_and_recomputes_totals() {
        let mut results = vec![result(1, 1.0, 1.0), result(2, 1.0, 1.0), result(3, 1.0, 2.0)];
        let before = ScoreSummary::from_results(&results);
        assert_eq!(before.percentage, 75.0);

        let overrides = vec![ScoreOverride {
            question_number: 3,
            score: 2.0,
            reason: Some("work shown on scratch paper".to_string()),
            feedback: None,
        }];
        let applied = apply_overrides(&mut results, &overrides).expect("applied");
        assert!(applied);

        let after = ScoreSummary::from_results(&results);
        assert_eq!(after.total_score, 4.0);
        assert_eq!(after.max_score, 4.0);
        assert_eq!(after.percentage, 100.0);

        let overridden = &results[2];
        assert!(overridden.teacher_override);
        assert_eq!(overridden.override_reason.as_deref(), Some("work shown on scratch paper"));
        assert_eq!(overridden.partial_credit, 1.0);
        assert_eq!(overridden.feedback, "original feedback");
    }

    #[test]
    fn override_rescues_a_failed_question() {
        let mut results = vec![GradeResult::failed(1, 2.0, "scoring request failed".to_string())];
        let overrides = vec![ScoreOverride {
            question_number: 1,
            score: 1.5,
            reason: None,
            feedback: Some("graded by hand".to_string()),
        }];
        apply_overrides(&mut results, &overrides).expect("applied");

        assert_eq!(results[0].status, ItemStatus::Success);
        assert!(results[0].error.is_none());
        assert_eq!(results[0].feedback, "graded by hand");

        let summary = ScoreSummary::from_results(&results);
        assert_eq!(summary.total_score, 1.5);
        assert_eq!(summary.questions_graded, 1);
    }

    #[test]
    fn override_above_max_is_rejected() {
        let mut results = vec![result(1, 1.0, 2.0)];
        let overrides =
            vec![ScoreOverride { question_number: 1, score: 3.0, reason: None, feedback: None }];
        let err = apply_overrides(&mut results, &overrides).expect_err("rejected");
        assert!(matches!(
            err,
            ApprovalError::ScoreExceedsMax { question: 1, score, max }
                if score == 3.0 && max == 2.0
        ));
        // Untouched on failure.
        assert_eq!(results[0].score, 1.0);
        assert!(!results[0].teacher_override);
    }

    #[test]
    fn override_for_unknown_question_is_rejected() {
        let mut results = vec![result(1, 1.0, 1.0)];
        let overrides =
            vec![ScoreOverride { question_number: 9, score: 1.0, reason: None, feedback: None }];
        assert!(matches!(
            apply_overrides(&mut results, &overrides),
            Err(ApprovalError::UnknownQuestion(9))
        ));
    }

    #[test]
    fn negative_and_non_finite_scores_are_rejected() {
        let mut results = vec![result(1, 1.0, 1.0)];
        for bad in [-0.5, f64::NAN, f64::INFINITY] {
            let overrides = vec![ScoreOverride {
                question_number: 1,
                score: bad,
                reason: None,
                feedback: None,
            }];
            assert!(matches!(
                apply_overrides(&mut results, &overrides),
                Err(ApprovalError::InvalidScore { .. })
            ));
        }
    }

    #[test]
    fn no_overrides_means_nothing_applied() {
        let mut results = vec![result(1, 1.0, 1.0)];
        assert!(!apply_overrides(&mut results, &[]).expect("ok"));
    }
}
