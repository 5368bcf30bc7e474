use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::Submission;
use crate::db::types::ProcessingStage;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::ScoreSummary;
use crate::pipeline::GradingPipeline;
use crate::repositories;

pub(crate) async fn claim_next_submission(pool: &PgPool) -> Result<Option<Submission>> {
    repositories::submissions::claim_next_for_processing(pool, primitive_now_utc())
        .await
        .context("Failed to claim submission")
}

fn stage_after(status: PipelineStatus) -> Option<ProcessingStage> {
    match status {
        PipelineStatus::PreprocessingComplete => Some(ProcessingStage::Segmentation),
        PipelineStatus::SegmentationComplete => Some(ProcessingStage::Grading),
        PipelineStatus::GradingComplete => Some(ProcessingStage::FactCheck),
        _ => None,
    }
}

/// Run a claimed submission through the grading pipeline and persist the
/// outcome: `pending_review` with results on success, `error` with the
/// first failure otherwise.
pub(crate) async fn process_submission(
    state: &AppState,
    pipeline: &GradingPipeline,
    submission: Submission,
) -> Result<()> {
    let exam = match repositories::exams::find_by_id(state.db(), &submission.exam_id)
        .await
        .context("Failed to load exam for submission")?
    {
        Some(exam) => exam,
        None => {
            repositories::submissions::mark_error(
                state.db(),
                &submission.id,
                "exam no longer exists",
                primitive_now_utc(),
            )
            .await
            .context("Failed to mark submission errored")?;
            return Ok(());
        }
    };

    let grading_state = GradingState::new(
        submission.id.clone(),
        exam.id.clone(),
        submission.file_paths.0.clone(),
        exam.answer_key.0.clone(),
    );

    // Stage transitions are persisted out of band so a crashed worker
    // leaves behind the stage it died in.
    let (stage_tx, mut stage_rx) = mpsc::unbounded_channel::<ProcessingStage>();
    let persister = tokio::spawn({
        let pool = state.db().clone();
        let submission_id = submission.id.clone();
        async move {
            while let Some(stage) = stage_rx.recv().await {
                if let Err(err) = repositories::submissions::set_stage(
                    &pool,
                    &submission_id,
                    stage,
                    primitive_now_utc(),
                )
                .await
                {
                    warn!(submission_id, error = %err, "Failed to persist processing stage");
                }
            }
        }
    });

    let final_state = pipeline
        .run_with_progress(grading_state, |status| {
            if let Some(stage) = stage_after(status) {
                let _ = stage_tx.send(stage);
            }
        })
        .await;
    drop(stage_tx);
    let _ = persister.await;

    match final_state.status {
        PipelineStatus::Error => {
            let message = final_state.error.as_deref().unwrap_or("grading pipeline failed");
            repositories::submissions::mark_error(
                state.db(),
                &submission.id,
                message,
                primitive_now_utc(),
            )
            .await
            .context("Failed to mark submission errored")?;
            metrics::counter!("grading_jobs_total", "status" => "failed").increment(1);
        }
        _ => {
            let summary = final_state
                .summary
                .unwrap_or_else(|| ScoreSummary::from_results(&final_state.grades));
            repositories::submissions::store_results(
                state.db(),
                &submission.id,
                &final_state.grades,
                summary,
                primitive_now_utc(),
            )
            .await
            .context("Failed to store grading results")?;
            metrics::counter!("grading_jobs_total", "status" => "success").increment(1);
            info!(
                submission_id = %submission.id,
                total_score = summary.total_score,
                max_score = summary.max_score,
                "Submission graded and awaiting review"
            );
        }
    }

    Ok(())
}

/// Last-resort recovery when the worker itself errors outside the
/// pipeline (DB hiccups and the like).
pub(crate) async fn recover_on_unexpected_error(
    state: &AppState,
    submission_id: &str,
    error: &str,
) -> Result<()> {
    repositories::submissions::mark_error(state.db(), submission_id, error, primitive_now_utc())
        .await
        .context("Failed to record worker error")?;
    Ok(())
}

/// Return submissions stuck in `processing` beyond the configured
/// timeout to the upload queue.
pub(crate) async fn recover_stale_submissions(state: &AppState) -> Result<u64> {
    let timeout = state.settings().pipeline().stale_processing_timeout_secs;
    let now = primitive_now_utc();
    let cutoff = now - time::Duration::seconds(timeout as i64);

    let recovered = repositories::submissions::recover_stale_processing(state.db(), cutoff, now)
        .await
        .context("Failed to recover stale submissions")?;
    if recovered > 0 {
        metrics::counter!("submissions_requeued_total").increment(recovered);
        warn!(recovered, "Requeued submissions stuck in processing");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_mapping_follows_pipeline_order() {
        assert_eq!(
            stage_after(PipelineStatus::PreprocessingComplete),
            Some(ProcessingStage::Segmentation)
        );
        assert_eq!(
            stage_after(PipelineStatus::SegmentationComplete),
            Some(ProcessingStage::Grading)
        );
        assert_eq!(
            stage_after(PipelineStatus::GradingComplete),
            Some(ProcessingStage::FactCheck)
        );
        assert_eq!(stage_after(PipelineStatus::FactCheckComplete), None);
        assert_eq!(stage_after(PipelineStatus::Error), None);
    }
}
