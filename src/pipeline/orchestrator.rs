use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::core::config::Settings;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::providers::PipelineProviders;

/// Tunables copied out of [`Settings`] so the pipeline carries no
/// reference to the wider configuration.
#[derive(Debug, Clone)]
pub(crate) struct PipelineOptions {
    pub(crate) confidence_threshold: f64,
    pub(crate) grid_min_area: f64,
    pub(crate) grid_max_area: f64,
    pub(crate) preprocess_batch_size: usize,
    pub(crate) fact_check_batch_size: usize,
    pub(crate) fact_check_batch_delay: Duration,
}

impl PipelineOptions {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            confidence_threshold: settings.vision().confidence_threshold,
            grid_min_area: settings.vision().grid_min_area,
            grid_max_area: settings.vision().grid_max_area,
            preprocess_batch_size: settings.pipeline().preprocess_batch_size,
            fact_check_batch_size: settings.fact_check().batch_size.max(1),
            fact_check_batch_delay: Duration::from_millis(settings.fact_check().batch_delay_ms),
        }
    }
}

/// The four-stage grading pipeline. Stateless between runs: each call to
/// [`GradingPipeline::run`] owns its [`GradingState`] exclusively.
pub(crate) struct GradingPipeline {
    pub(super) providers: PipelineProviders,
    pub(super) options: PipelineOptions,
}

impl GradingPipeline {
    pub(crate) fn new(providers: PipelineProviders, options: PipelineOptions) -> Self {
        Self { providers, options }
    }

    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let providers = crate::providers::build(settings)?;
        Ok(Self::new(providers, PipelineOptions::from_settings(settings)))
    }

    /// Run the stages in their fixed order, stopping at the first stage
    /// that marks the state failed so the original error survives.
    pub(crate) async fn run(&self, state: GradingState) -> GradingState {
        self.run_with_progress(state, |_| {}).await
    }

    /// Like [`GradingPipeline::run`], invoking `progress` after each
    /// completed stage so callers can persist how far the run has come.
    pub(crate) async fn run_with_progress<F>(
        &self,
        mut state: GradingState,
        mut progress: F,
    ) -> GradingState
    where
        F: FnMut(PipelineStatus),
    {
        let started = Instant::now();
        info!(
            submission_id = %state.submission_id,
            exam_id = %state.exam_id,
            images = state.image_paths.len(),
            "Starting grading pipeline"
        );

        self.preprocess(&mut state).await;
        if state.status != PipelineStatus::Error {
            progress(state.status);
            self.segment(&mut state).await;
        }
        if state.status != PipelineStatus::Error {
            progress(state.status);
            self.grade(&mut state).await;
        }
        if state.status != PipelineStatus::Error {
            progress(state.status);
            self.fact_check(&mut state).await;
        }

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("pipeline_run_duration_seconds").record(duration);
        match state.status {
            PipelineStatus::Error => {
                metrics::counter!("pipeline_runs_total", "status" => "failed").increment(1);
                error!(
                    submission_id = %state.submission_id,
                    error = state.error.as_deref().unwrap_or("unknown"),
                    "Grading pipeline failed"
                );
            }
            _ => {
                metrics::counter!("pipeline_runs_total", "status" => "success").increment(1);
                info!(
                    submission_id = %state.submission_id,
                    status = state.status.as_str(),
                    questions = state.grades.len(),
                    "Grading pipeline finished"
                );
            }
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::pipeline::state::{GradingState, PipelineStatus};
    use crate::pipeline::testing::{
        answer_key_entry, options, CountingFactChecker, FlakyEnhancer, ScriptedDetector,
        ScriptedScorer,
    };
    use crate::pipeline::types::{BoundingBox, DetectionMethod, FactCheckStatus, ItemStatus};
    use crate::providers::PipelineProviders;

    use super::GradingPipeline;

    fn three_question_key() -> BTreeMap<u32, crate::pipeline::types::AnswerKeyEntry> {
        let mut key = BTreeMap::new();
        key.insert(1, answer_key_entry("Paris", 1.0));
        key.insert(2, answer_key_entry("4", 1.0));
        key.insert(3, answer_key_entry("photosynthesis", 2.0));
        key
    }

    fn detector_with_three_rows() -> ScriptedDetector {
        ScriptedDetector::with_model_regions(vec![
            (BoundingBox { x1: 50, y1: 100, x2: 900, y2: 200 }, 0.9),
            (BoundingBox { x1: 50, y1: 300, x2: 900, y2: 400 }, 0.85),
            (BoundingBox { x1: 50, y1: 500, x2: 900, y2: 600 }, 0.8),
        ])
    }

    fn full_pipeline(
        enhancer: FlakyEnhancer,
        detector: ScriptedDetector,
        scorer: ScriptedScorer,
        checker: CountingFactChecker,
    ) -> GradingPipeline {
        GradingPipeline::new(
            PipelineProviders {
                enhancer: Arc::new(enhancer),
                detector: Arc::new(detector),
                scorer: Arc::new(scorer),
                fact_checker: Arc::new(checker),
            },
            options(),
        )
    }

    #[tokio::test]
    async fn full_run_grades_and_annotates_a_submission() {
        let checker = CountingFactChecker::new();
        let pipeline = full_pipeline(
            FlakyEnhancer::reliable(),
            detector_with_three_rows(),
            ScriptedScorer::with_scores(&[(1, 1.0), (2, 1.0), (3, 1.0)]),
            checker.clone(),
        );

        let state = GradingState::new(
            "sub-1",
            "exam-1",
            vec!["page.png".to_string()],
            three_question_key(),
        );
        let state = pipeline.run(state).await;

        assert_eq!(state.status, PipelineStatus::FactCheckComplete);
        assert_eq!(state.grades.len(), 3);
        assert!(state.grades.iter().all(|grade| grade.status == ItemStatus::Success));
        assert!(state
            .grades
            .iter()
            .all(|grade| grade.fact_check.as_ref().map(|annotation| annotation.status)
                == Some(FactCheckStatus::Success)));
        assert_eq!(checker.calls(), 3);

        let summary = state.summary.expect("summary");
        assert_eq!(summary.total_score, 3.0);
        assert_eq!(summary.max_score, 4.0);
        assert_eq!(summary.percentage, 75.0);
    }

    #[tokio::test]
    async fn failed_preprocessing_short_circuits_the_rest() {
        let checker = CountingFactChecker::new();
        let pipeline = full_pipeline(
            FlakyEnhancer::failing_for(&["page.png"]),
            detector_with_three_rows(),
            ScriptedScorer::with_scores(&[(1, 1.0)]),
            checker.clone(),
        );

        let state = GradingState::new(
            "sub-1",
            "exam-1",
            vec!["page.png".to_string()],
            three_question_key(),
        );
        let state = pipeline.run(state).await;

        assert_eq!(state.status, PipelineStatus::Error);
        assert_eq!(state.error.as_deref(), Some("image preprocessing failed for all images"));
        assert!(state.answer_boxes.is_empty());
        assert!(state.grades.is_empty());
        assert_eq!(checker.calls(), 0);
    }

    #[tokio::test]
    async fn grid_fallback_carries_through_to_grading() {
        let detector = ScriptedDetector::with_grid_regions(vec![
            BoundingBox { x1: 50, y1: 300, x2: 450, y2: 400 },
            BoundingBox { x1: 50, y1: 100, x2: 450, y2: 200 },
        ]);
        let pipeline = full_pipeline(
            FlakyEnhancer::reliable(),
            detector,
            ScriptedScorer::with_scores(&[(1, 1.0), (2, 1.0)]),
            CountingFactChecker::new(),
        );

        let state = GradingState::new(
            "sub-1",
            "exam-1",
            vec!["page.png".to_string()],
            three_question_key(),
        );
        let state = pipeline.run(state).await;

        assert_eq!(state.status, PipelineStatus::FactCheckComplete);
        assert_eq!(state.answer_boxes.len(), 2);
        assert!(state
            .answer_boxes
            .iter()
            .all(|region| region.detection_method == DetectionMethod::GridFallback));
        assert_eq!(state.answer_boxes[0].bounds.y1, 100);
        assert_eq!(state.grades.len(), 2);
    }

    #[tokio::test]
    async fn fact_check_batches_respect_the_configured_delay() {
        let checker = CountingFactChecker::new();
        let mut opts = options();
        opts.fact_check_batch_size = 2;
        opts.fact_check_batch_delay = Duration::from_millis(20);

        let pipeline = GradingPipeline::new(
            PipelineProviders {
                enhancer: Arc::new(FlakyEnhancer::reliable()),
                detector: Arc::new(detector_with_three_rows()),
                scorer: Arc::new(ScriptedScorer::with_scores(&[(1, 1.0), (2, 1.0), (3, 2.0)])),
                fact_checker: Arc::new(checker.clone()),
            },
            opts,
        );

        let state = GradingState::new(
            "sub-1",
            "exam-1",
            vec!["page.png".to_string()],
            three_question_key(),
        );
        let started = std::time::Instant::now();
        let state = pipeline.run(state).await;

        assert_eq!(state.status, PipelineStatus::FactCheckComplete);
        assert_eq!(checker.calls(), 3);
        // Two batches of sizes 2 and 1: exactly one inter-batch pause.
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
