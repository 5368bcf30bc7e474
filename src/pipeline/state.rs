use serde::{Deserialize, Serialize};

use crate::pipeline::types::{AnswerKey, AnswerRegion, GradeResult, ProcessedImage, ScoreSummary};

/// Pipeline progress marker. The single source of truth for which stage
/// completed last and whether a fatal failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PipelineStatus {
    Pending,
    PreprocessingComplete,
    SegmentationComplete,
    GradingComplete,
    FactCheckComplete,
    Error,
}

impl PipelineStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::PreprocessingComplete => "preprocessing_complete",
            PipelineStatus::SegmentationComplete => "segmentation_complete",
            PipelineStatus::GradingComplete => "grading_complete",
            PipelineStatus::FactCheckComplete => "fact_check_complete",
            PipelineStatus::Error => "error",
        }
    }
}

/// Per-submission workflow state, owned exclusively by one pipeline run.
/// `submission_id`, `exam_id`, `image_paths` and `answer_key` are fixed at
/// construction; each stage writes only the fields it owns.
#[derive(Debug, Clone)]
pub(crate) struct GradingState {
    pub(crate) submission_id: String,
    pub(crate) exam_id: String,
    pub(crate) image_paths: Vec<String>,
    pub(crate) answer_key: AnswerKey,
    pub(crate) processed_images: Vec<ProcessedImage>,
    pub(crate) answer_boxes: Vec<AnswerRegion>,
    pub(crate) grades: Vec<GradeResult>,
    pub(crate) summary: Option<ScoreSummary>,
    pub(crate) status: PipelineStatus,
    pub(crate) error: Option<String>,
}

impl GradingState {
    pub(crate) fn new(
        submission_id: impl Into<String>,
        exam_id: impl Into<String>,
        image_paths: Vec<String>,
        answer_key: AnswerKey,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            exam_id: exam_id.into(),
            image_paths,
            answer_key,
            processed_images: Vec::new(),
            answer_boxes: Vec::new(),
            grades: Vec::new(),
            summary: None,
            status: PipelineStatus::Pending,
            error: None,
        }
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = PipelineStatus::Error;
        self.error = Some(message.into());
    }

    /// Fail-fast precondition check. Returns `false` (after marking the
    /// state failed) unless the predecessor stage reached `expected`.
    pub(crate) fn require_status(
        &mut self,
        expected: PipelineStatus,
        predecessor: &str,
    ) -> bool {
        if self.status != expected {
            self.fail(format!("{predecessor} failed or was not run"));
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn require_status_marks_error_on_mismatch() {
        let mut state =
            GradingState::new("sub-1", "exam-1", vec!["a.png".to_string()], BTreeMap::new());
        assert!(!state.require_status(PipelineStatus::PreprocessingComplete, "image preprocessing"));
        assert_eq!(state.status, PipelineStatus::Error);
        assert_eq!(state.error.as_deref(), Some("image preprocessing failed or was not run"));
    }

    #[test]
    fn require_status_passes_on_match() {
        let mut state =
            GradingState::new("sub-1", "exam-1", vec!["a.png".to_string()], BTreeMap::new());
        state.status = PipelineStatus::PreprocessingComplete;
        assert!(state.require_status(PipelineStatus::PreprocessingComplete, "image preprocessing"));
        assert!(state.error.is_none());
    }
}
