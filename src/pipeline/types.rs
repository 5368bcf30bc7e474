use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Teacher-authored key: question number to expected answer and scoring
/// metadata. A `BTreeMap` keeps serialized keys in question order.
pub(crate) type AnswerKey = BTreeMap<u32, AnswerKeyEntry>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnswerKeyEntry {
    pub(crate) question_text: String,
    pub(crate) expected_answer: String,
    pub(crate) max_score: f64,
    pub(crate) question_type: QuestionType,
}

impl AnswerKeyEntry {
    /// Default entry for regions without a matching key: worth one point,
    /// graded as a short answer.
    pub(crate) fn missing() -> Self {
        Self {
            question_text: String::new(),
            expected_answer: String::new(),
            max_score: 1.0,
            question_type: QuestionType::ShortAnswer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QuestionType {
    MultipleChoice,
    ShortAnswer,
    FillBlank,
    Essay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ItemStatus {
    Success,
    Error,
}

/// Per-image outcome of the preprocessing stage. One image failing to
/// enhance never aborts the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProcessedImage {
    pub(crate) original_path: String,
    pub(crate) processed_path: Option<String>,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
    pub(crate) status: ItemStatus,
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct BoundingBox {
    pub(crate) x1: u32,
    pub(crate) y1: u32,
    pub(crate) x2: u32,
    pub(crate) y2: u32,
}

impl BoundingBox {
    /// Clamp to image bounds; `None` when the clamped box is degenerate.
    pub(crate) fn clamped(self, width: u32, height: u32) -> Option<Self> {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        let x2 = self.x2.min(width);
        let y2 = self.y2.min(height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Self { x1, y1, x2, y2 })
    }

    pub(crate) fn area(&self) -> f64 {
        f64::from(self.x2.saturating_sub(self.x1)) * f64::from(self.y2.saturating_sub(self.y1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum DetectionMethod {
    Model,
    GridFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AnswerRegion {
    pub(crate) question_number: u32,
    pub(crate) bounds: BoundingBox,
    pub(crate) confidence: f64,
    pub(crate) region_path: String,
    pub(crate) detection_method: DetectionMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GradeResult {
    pub(crate) question_number: u32,
    pub(crate) student_answer: String,
    pub(crate) correct_answer: String,
    pub(crate) score: f64,
    pub(crate) max_score: f64,
    pub(crate) feedback: String,
    pub(crate) partial_credit: f64,
    pub(crate) confidence: f64,
    pub(crate) status: ItemStatus,
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) teacher_override: bool,
    #[serde(default)]
    pub(crate) override_reason: Option<String>,
    #[serde(default)]
    pub(crate) fact_check: Option<FactCheckAnnotation>,
}

impl GradeResult {
    pub(crate) fn failed(question_number: u32, max_score: f64, error: String) -> Self {
        Self {
            question_number,
            student_answer: String::new(),
            correct_answer: String::new(),
            score: 0.0,
            max_score,
            feedback: String::new(),
            partial_credit: 0.0,
            confidence: 0.0,
            status: ItemStatus::Error,
            error: Some(error),
            teacher_override: false,
            override_reason: None,
            fact_check: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FactCheckStatus {
    Success,
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FactCheckAnnotation {
    pub(crate) status: FactCheckStatus,
    pub(crate) accuracy_assessment: Option<String>,
    pub(crate) alternative_answers: Vec<String>,
    pub(crate) insights: Vec<String>,
    pub(crate) suggestions: Vec<String>,
    pub(crate) confidence: f64,
    pub(crate) reason: Option<String>,
}

impl FactCheckAnnotation {
    pub(crate) fn skipped(reason: &str) -> Self {
        Self {
            status: FactCheckStatus::Skipped,
            accuracy_assessment: None,
            alternative_answers: Vec::new(),
            insights: Vec::new(),
            suggestions: Vec::new(),
            confidence: 0.0,
            reason: Some(reason.to_string()),
        }
    }

    pub(crate) fn failed(error: String) -> Self {
        Self {
            status: FactCheckStatus::Error,
            accuracy_assessment: None,
            alternative_answers: Vec::new(),
            insights: Vec::new(),
            suggestions: Vec::new(),
            confidence: 0.0,
            reason: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScoreSummary {
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) questions_graded: usize,
    pub(crate) total_questions: usize,
}

impl ScoreSummary {
    /// Aggregate over successfully graded questions only. Always computed
    /// from the full results list, never adjusted incrementally.
    pub(crate) fn from_results(results: &[GradeResult]) -> Self {
        let mut total_score = 0.0;
        let mut max_score = 0.0;
        let mut questions_graded = 0;

        for result in results {
            if result.status == ItemStatus::Success {
                total_score += result.score;
                max_score += result.max_score;
                questions_graded += 1;
            }
        }

        let percentage =
            if max_score > 0.0 { round2(total_score / max_score * 100.0) } else { 0.0 };

        Self {
            total_score,
            max_score,
            percentage,
            questions_graded,
            total_questions: results.len(),
        }
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}
