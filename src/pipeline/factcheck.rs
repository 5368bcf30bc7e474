use tokio::task::JoinSet;
use tracing::warn;

use crate::pipeline::orchestrator::GradingPipeline;
use crate::pipeline::parse::parse_fact_check_text;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::{FactCheckAnnotation, ItemStatus, ScoreSummary};
use crate::providers::FactCheckRequest;

impl GradingPipeline {
    /// Annotate graded answers with fact-check commentary. Runs in
    /// bounded batches with a pause between batches to respect provider
    /// rate limits. Ungraded questions and empty transcriptions are
    /// skipped, already-annotated questions are left untouched, and a
    /// failed check never fails the stage.
    pub(crate) async fn fact_check(&self, state: &mut GradingState) {
        if !state.require_status(PipelineStatus::GradingComplete, "grading") {
            return;
        }

        let mut pending: Vec<usize> = Vec::new();
        for (index, grade) in state.grades.iter_mut().enumerate() {
            if grade.fact_check.is_some() {
                continue;
            }
            if grade.status != ItemStatus::Success {
                grade.fact_check = Some(FactCheckAnnotation::skipped("question was not graded"));
            } else if grade.student_answer.trim().is_empty() {
                grade.fact_check = Some(FactCheckAnnotation::skipped("no transcribed answer"));
            } else {
                pending.push(index);
            }
        }

        for (batch_index, batch) in pending.chunks(self.options.fact_check_batch_size).enumerate() {
            if batch_index > 0 && !self.options.fact_check_batch_delay.is_zero() {
                tokio::time::sleep(self.options.fact_check_batch_delay).await;
            }

            let mut join_set = JoinSet::new();
            for &index in batch {
                let checker = self.providers.fact_checker.clone();
                let request = FactCheckRequest {
                    question_number: state.grades[index].question_number,
                    student_answer: state.grades[index].student_answer.clone(),
                    expected_answer: state.grades[index].correct_answer.clone(),
                };
                join_set.spawn(async move { (index, checker.fact_check(&request).await) });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, Ok(text))) => {
                        state.grades[index].fact_check = Some(parse_fact_check_text(&text));
                    }
                    Ok((index, Err(err))) => {
                        warn!(
                            submission_id = %state.submission_id,
                            question = state.grades[index].question_number,
                            error = %err,
                            "Fact-check request failed"
                        );
                        state.grades[index].fact_check =
                            Some(FactCheckAnnotation::failed(err.to_string()));
                    }
                    Err(err) => {
                        warn!(submission_id = %state.submission_id, error = %err, "Fact-check task aborted");
                    }
                }
            }

            for &index in batch {
                if state.grades[index].fact_check.is_none() {
                    state.grades[index].fact_check = Some(FactCheckAnnotation::failed(
                        "fact-check task aborted".to_string(),
                    ));
                }
            }
        }

        metrics::counter!("pipeline_fact_checks_total").increment(pending.len() as u64);
        state.summary = Some(ScoreSummary::from_results(&state.grades));
        state.status = PipelineStatus::FactCheckComplete;
    }
}
