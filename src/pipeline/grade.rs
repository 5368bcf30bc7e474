use tracing::warn;

use crate::pipeline::orchestrator::GradingPipeline;
use crate::pipeline::parse::parse_scoring_response;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::{AnswerKeyEntry, GradeResult, ItemStatus, ScoreSummary};
use crate::providers::ScoreRequest;

impl GradingPipeline {
    /// Grade every segmented region against the answer key. Regions are
    /// scored one at a time in question order so repeated runs with a
    /// seeded provider produce identical results. A region without a key
    /// entry is graded as a one-point short answer; per-question failures
    /// are recorded and never abort the stage.
    pub(crate) async fn grade(&self, state: &mut GradingState) {
        if !state.require_status(PipelineStatus::SegmentationComplete, "answer segmentation") {
            return;
        }

        let mut grades = Vec::with_capacity(state.answer_boxes.len());

        for region in &state.answer_boxes {
            let entry = state
                .answer_key
                .get(&region.question_number)
                .cloned()
                .unwrap_or_else(AnswerKeyEntry::missing);

            let request = ScoreRequest {
                region_path: region.region_path.clone(),
                question_number: region.question_number,
                question_text: entry.question_text.clone(),
                expected_answer: entry.expected_answer.clone(),
                max_score: entry.max_score,
                question_type: entry.question_type,
            };

            let grade = match self.providers.scorer.score(&request).await {
                Ok(raw) => match parse_scoring_response(&raw, &entry) {
                    Ok(scored) => GradeResult {
                        question_number: region.question_number,
                        student_answer: scored.student_answer,
                        correct_answer: entry.expected_answer.clone(),
                        score: scored.score,
                        max_score: entry.max_score,
                        feedback: scored.feedback,
                        partial_credit: scored.partial_credit,
                        confidence: scored.confidence,
                        status: ItemStatus::Success,
                        error: None,
                        teacher_override: false,
                        override_reason: None,
                        fact_check: None,
                    },
                    Err(err) => {
                        warn!(
                            submission_id = %state.submission_id,
                            question = region.question_number,
                            error = %err,
                            "Scoring response could not be parsed"
                        );
                        GradeResult::failed(
                            region.question_number,
                            entry.max_score,
                            format!("unparsable scoring response: {err}"),
                        )
                    }
                },
                Err(err) => {
                    warn!(
                        submission_id = %state.submission_id,
                        question = region.question_number,
                        error = %err,
                        "Scoring request failed"
                    );
                    GradeResult::failed(
                        region.question_number,
                        entry.max_score,
                        format!("scoring request failed: {err}"),
                    )
                }
            };
            grades.push(grade);
        }

        let summary = ScoreSummary::from_results(&grades);
        metrics::counter!("pipeline_questions_graded_total")
            .increment(summary.questions_graded as u64);

        state.summary = Some(summary);
        state.grades = grades;
        state.status = PipelineStatus::GradingComplete;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::pipeline::state::{GradingState, PipelineStatus};
    use crate::pipeline::testing::{
        answer_key_entry, pipeline_with_scorer, segmented_state, ScriptedScorer,
    };
    use crate::pipeline::types::ItemStatus;

    #[tokio::test]
    async fn grades_every_region_against_the_key() {
        let mut key = BTreeMap::new();
        key.insert(1, answer_key_entry("Paris", 1.0));
        key.insert(2, answer_key_entry("4", 1.0));
        key.insert(3, answer_key_entry("photosynthesis", 2.0));

        let scorer = ScriptedScorer::with_scores(&[(1, 1.0), (2, 1.0), (3, 1.0)]);
        let pipeline = pipeline_with_scorer(scorer);
        let mut state = segmented_state(3, key);
        pipeline.grade(&mut state).await;

        assert_eq!(state.status, PipelineStatus::GradingComplete);
        assert_eq!(state.grades.len(), 3);
        let summary = state.summary.expect("summary");
        assert_eq!(summary.total_score, 3.0);
        assert_eq!(summary.max_score, 4.0);
        assert_eq!(summary.percentage, 75.0);
        assert_eq!(state.grades[2].correct_answer, "photosynthesis");
    }

    #[tokio::test]
    async fn region_without_key_entry_defaults_to_one_point() {
        let scorer = ScriptedScorer::with_scores(&[(1, 1.0)]);
        let pipeline = pipeline_with_scorer(scorer);
        let mut state = segmented_state(1, BTreeMap::new());
        pipeline.grade(&mut state).await;

        assert_eq!(state.grades[0].max_score, 1.0);
        assert_eq!(state.grades[0].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn provider_failure_becomes_a_per_question_error() {
        let mut key = BTreeMap::new();
        key.insert(1, answer_key_entry("Paris", 1.0));
        key.insert(2, answer_key_entry("4", 2.0));

        let scorer = ScriptedScorer::with_scores(&[(1, 1.0)]).failing_for(&[2]);
        let pipeline = pipeline_with_scorer(scorer);
        let mut state = segmented_state(2, key);
        pipeline.grade(&mut state).await;

        assert_eq!(state.status, PipelineStatus::GradingComplete);
        assert_eq!(state.grades[0].status, ItemStatus::Success);
        assert_eq!(state.grades[1].status, ItemStatus::Error);
        assert_eq!(state.grades[1].score, 0.0);

        let summary = state.summary.expect("summary");
        assert_eq!(summary.questions_graded, 1);
        assert_eq!(summary.total_questions, 2);
        assert_eq!(summary.max_score, 1.0);
    }

    #[tokio::test]
    async fn skipping_segmentation_is_an_error() {
        let pipeline = pipeline_with_scorer(ScriptedScorer::with_scores(&[]));
        let mut state =
            GradingState::new("sub-1", "exam-1", vec!["a.png".to_string()], BTreeMap::new());
        state.status = PipelineStatus::PreprocessingComplete;
        pipeline.grade(&mut state).await;

        assert_eq!(state.status, PipelineStatus::Error);
        assert_eq!(state.error.as_deref(), Some("answer segmentation failed or was not run"));
    }
}
