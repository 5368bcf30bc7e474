//! Scripted providers shared by the stage tests. Each one fulfils a
//! capability trait with fully predictable behavior so pipeline tests
//! need neither a network nor a database.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::pipeline::orchestrator::{GradingPipeline, PipelineOptions};
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::{
    AnswerKey, AnswerKeyEntry, AnswerRegion, BoundingBox, DetectionMethod, GradeResult,
    ItemStatus, QuestionType, ScoreSummary,
};
use crate::providers::{
    DetectedRegion, EnhancedImage, FactCheckProvider, FactCheckRequest, GridRegion, ImageEnhancer,
    PipelineProviders, ProviderError, RegionDetector, ScoreRequest, ScoringProvider,
};

fn stub_failure() -> ProviderError {
    ProviderError::Api { status: 500, body: "scripted failure".to_string() }
}

/// Enhancer that succeeds with fixed dimensions except for the listed
/// original paths.
pub(crate) struct FlakyEnhancer {
    fail_paths: HashSet<String>,
}

impl FlakyEnhancer {
    pub(crate) fn reliable() -> Self {
        Self { fail_paths: HashSet::new() }
    }

    pub(crate) fn failing_for(paths: &[&str]) -> Self {
        Self { fail_paths: paths.iter().map(|path| path.to_string()).collect() }
    }
}

#[async_trait]
impl ImageEnhancer for FlakyEnhancer {
    async fn enhance(&self, image_path: &str) -> Result<EnhancedImage, ProviderError> {
        if self.fail_paths.contains(image_path) {
            return Err(stub_failure());
        }
        Ok(EnhancedImage {
            original_path: image_path.to_string(),
            processed_path: format!("{image_path}.processed"),
            width: 1000,
            height: 1400,
        })
    }
}

/// Detector replaying fixed model and grid detections for every page.
pub(crate) struct ScriptedDetector {
    model: Vec<(BoundingBox, f64)>,
    grid: Vec<BoundingBox>,
    fail: bool,
}

impl ScriptedDetector {
    pub(crate) fn empty() -> Self {
        Self { model: Vec::new(), grid: Vec::new(), fail: false }
    }

    pub(crate) fn failing() -> Self {
        Self { model: Vec::new(), grid: Vec::new(), fail: true }
    }

    pub(crate) fn with_model_regions(model: Vec<(BoundingBox, f64)>) -> Self {
        Self { model, grid: Vec::new(), fail: false }
    }

    pub(crate) fn with_grid_regions(grid: Vec<BoundingBox>) -> Self {
        Self { model: Vec::new(), grid, fail: false }
    }
}

#[async_trait]
impl RegionDetector for ScriptedDetector {
    async fn detect(&self, _image: &EnhancedImage) -> Result<Vec<DetectedRegion>, ProviderError> {
        if self.fail {
            return Err(stub_failure());
        }
        Ok(self
            .model
            .iter()
            .enumerate()
            .map(|(index, (bounds, confidence))| DetectedRegion {
                bounds: *bounds,
                confidence: *confidence,
                region_path: format!("region_{index}.png"),
            })
            .collect())
    }

    async fn detect_grid(&self, _image: &EnhancedImage) -> Result<Vec<GridRegion>, ProviderError> {
        if self.fail {
            return Err(stub_failure());
        }
        Ok(self
            .grid
            .iter()
            .enumerate()
            .map(|(index, bounds)| GridRegion {
                bounds: *bounds,
                region_path: format!("grid_region_{index}.png"),
            })
            .collect())
    }
}

/// Scorer returning a fixed score per question number, echoing the
/// expected answer as the transcription.
pub(crate) struct ScriptedScorer {
    scores: HashMap<u32, f64>,
    fail_questions: HashSet<u32>,
}

impl ScriptedScorer {
    pub(crate) fn with_scores(scores: &[(u32, f64)]) -> Self {
        Self { scores: scores.iter().copied().collect(), fail_questions: HashSet::new() }
    }

    pub(crate) fn failing_for(mut self, questions: &[u32]) -> Self {
        self.fail_questions = questions.iter().copied().collect();
        self
    }
}

#[async_trait]
impl ScoringProvider for ScriptedScorer {
    async fn score(&self, request: &ScoreRequest) -> Result<String, ProviderError> {
        if self.fail_questions.contains(&request.question_number) {
            return Err(stub_failure());
        }
        let score =
            self.scores.get(&request.question_number).copied().unwrap_or(request.max_score);
        Ok(json!({
            "student_answer": request.expected_answer,
            "score": score,
            "feedback": "Scripted feedback",
            "partial_credit": if request.max_score > 0.0 { score / request.max_score } else { 0.0 },
            "confidence": 0.9,
        })
        .to_string())
    }
}

/// Fact checker that counts invocations and replies with parser-friendly
/// canned text.
#[derive(Clone)]
pub(crate) struct CountingFactChecker {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingFactChecker {
    pub(crate) fn new() -> Self {
        Self { calls: Arc::new(AtomicUsize::new(0)), fail: false }
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FactCheckProvider for CountingFactChecker {
    async fn fact_check(&self, request: &FactCheckRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(stub_failure());
        }
        Ok(format!(
            "The answer \"{}\" is factually correct.\n\
             Alternative: \"{}\" is also acceptable.\n\
             Suggestion: explain the reasoning next time.",
            request.student_answer, request.expected_answer,
        ))
    }
}

pub(crate) fn options() -> PipelineOptions {
    PipelineOptions {
        confidence_threshold: 0.5,
        grid_min_area: 1000.0,
        grid_max_area: 50000.0,
        preprocess_batch_size: 4,
        fact_check_batch_size: 5,
        fact_check_batch_delay: Duration::ZERO,
    }
}

pub(crate) fn pipeline_with(
    enhancer: FlakyEnhancer,
    detector: ScriptedDetector,
) -> GradingPipeline {
    GradingPipeline::new(
        PipelineProviders {
            enhancer: Arc::new(enhancer),
            detector: Arc::new(detector),
            scorer: Arc::new(ScriptedScorer::with_scores(&[])),
            fact_checker: Arc::new(CountingFactChecker::new()),
        },
        options(),
    )
}

pub(crate) fn pipeline_with_scorer(scorer: ScriptedScorer) -> GradingPipeline {
    GradingPipeline::new(
        PipelineProviders {
            enhancer: Arc::new(FlakyEnhancer::reliable()),
            detector: Arc::new(ScriptedDetector::empty()),
            scorer: Arc::new(scorer),
            fact_checker: Arc::new(CountingFactChecker::new()),
        },
        options(),
    )
}

pub(crate) fn pipeline_with_fact_checker(checker: CountingFactChecker) -> GradingPipeline {
    GradingPipeline::new(
        PipelineProviders {
            enhancer: Arc::new(FlakyEnhancer::reliable()),
            detector: Arc::new(ScriptedDetector::empty()),
            scorer: Arc::new(ScriptedScorer::with_scores(&[])),
            fact_checker: Arc::new(checker),
        },
        options(),
    )
}

pub(crate) fn answer_key_entry(expected: &str, max_score: f64) -> AnswerKeyEntry {
    AnswerKeyEntry {
        question_text: format!("Question expecting \"{expected}\""),
        expected_answer: expected.to_string(),
        max_score,
        question_type: QuestionType::ShortAnswer,
    }
}

/// State positioned right after segmentation: `count` stacked regions
/// numbered from one.
pub(crate) fn segmented_state(count: u32, answer_key: AnswerKey) -> GradingState {
    let mut state =
        GradingState::new("sub-1", "exam-1", vec!["page.png".to_string()], answer_key);
    state.answer_boxes = (1..=count)
        .map(|number| AnswerRegion {
            question_number: number,
            bounds: BoundingBox {
                x1: 50,
                y1: number * 100,
                x2: 900,
                y2: number * 100 + 80,
            },
            confidence: 0.9,
            region_path: format!("region_{number}.png"),
            detection_method: DetectionMethod::Model,
        })
        .collect();
    state.status = PipelineStatus::SegmentationComplete;
    state
}

/// State positioned right after grading: one result per entry, with the
/// given transcription and success flag.
pub(crate) fn graded_state(answers: Vec<(&str, bool)>) -> GradingState {
    let mut state =
        GradingState::new("sub-1", "exam-1", vec!["page.png".to_string()], BTreeMap::new());
    state.grades = answers
        .into_iter()
        .enumerate()
        .map(|(index, (answer, success))| {
            let number = index as u32 + 1;
            if success {
                GradeResult {
                    question_number: number,
                    student_answer: answer.to_string(),
                    correct_answer: "expected".to_string(),
                    score: 1.0,
                    max_score: 1.0,
                    feedback: "Scripted feedback".to_string(),
                    partial_credit: 1.0,
                    confidence: 0.9,
                    status: ItemStatus::Success,
                    error: None,
                    teacher_override: false,
                    override_reason: None,
                    fact_check: None,
                }
            } else {
                GradeResult::failed(number, 1.0, "scoring request failed".to_string())
            }
        })
        .collect();
    state.summary = Some(ScoreSummary::from_results(&state.grades));
    state.status = PipelineStatus::GradingComplete;
    state
}
