use tracing::{debug, warn};

use crate::pipeline::orchestrator::GradingPipeline;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::{AnswerRegion, DetectionMethod, ItemStatus, ProcessedImage};
use crate::providers::EnhancedImage;

const GRID_FALLBACK_CONFIDENCE: f64 = 0.8;

fn as_enhanced(image: &ProcessedImage) -> Option<EnhancedImage> {
    Some(EnhancedImage {
        original_path: image.original_path.clone(),
        processed_path: image.processed_path.clone()?,
        width: image.width?,
        height: image.height?,
    })
}

impl GradingPipeline {
    /// Locate answer regions on every successfully enhanced image.
    /// Model detections below the confidence threshold are dropped; when
    /// a page yields no usable model detection the structural grid
    /// fallback takes over for that page. Question numbers are assigned
    /// in reading order, top to bottom, continuing across pages.
    pub(crate) async fn segment(&self, state: &mut GradingState) {
        if !state.require_status(PipelineStatus::PreprocessingComplete, "image preprocessing") {
            return;
        }

        let mut regions: Vec<AnswerRegion> = Vec::new();
        let mut next_question = 1u32;
        let mut detector_answered = false;

        let enhanced: Vec<EnhancedImage> = state
            .processed_images
            .iter()
            .filter(|image| image.status == ItemStatus::Success)
            .filter_map(as_enhanced)
            .collect();

        for image in &enhanced {
            let model_regions = match self.providers.detector.detect(image).await {
                Ok(detected) => {
                    detector_answered = true;
                    let mut kept: Vec<AnswerRegion> = detected
                        .into_iter()
                        .filter(|region| region.confidence > self.options.confidence_threshold)
                        .filter_map(|region| {
                            region.bounds.clamped(image.width, image.height).map(|bounds| {
                                AnswerRegion {
                                    question_number: 0,
                                    bounds,
                                    confidence: region.confidence,
                                    region_path: region.region_path,
                                    detection_method: DetectionMethod::Model,
                                }
                            })
                        })
                        .collect();
                    kept.sort_by_key(|region| region.bounds.y1);
                    kept
                }
                Err(err) => {
                    warn!(
                        submission_id = %state.submission_id,
                        image = %image.processed_path,
                        error = %err,
                        "Model detection failed, trying grid fallback"
                    );
                    Vec::new()
                }
            };

            let page_regions = if model_regions.is_empty() {
                match self.grid_fallback(state, image).await {
                    Some(fallback) => {
                        detector_answered = true;
                        fallback
                    }
                    None => Vec::new(),
                }
            } else {
                model_regions
            };

            for mut region in page_regions {
                region.question_number = next_question;
                next_question += 1;
                regions.push(region);
            }
        }

        if !detector_answered {
            state.fail("answer detection failed on every page");
            return;
        }

        // An empty result is degenerate but valid: the sheet may simply
        // contain nothing detectable, and that is for the teacher to see.
        debug!(
            submission_id = %state.submission_id,
            regions = regions.len(),
            "Answer segmentation complete"
        );
        metrics::counter!("pipeline_regions_detected_total").increment(regions.len() as u64);
        state.answer_boxes = regions;
        state.status = PipelineStatus::SegmentationComplete;
    }

    /// Structural fallback for one page: keep grid cells inside the
    /// configured area band, order them top to bottom, and tag them with
    /// a fixed synthetic confidence. `None` means the detection call
    /// itself failed, as opposed to finding nothing.
    async fn grid_fallback(
        &self,
        state: &GradingState,
        image: &EnhancedImage,
    ) -> Option<Vec<AnswerRegion>> {
        let grid = match self.providers.detector.detect_grid(image).await {
            Ok(grid) => grid,
            Err(err) => {
                warn!(
                    submission_id = %state.submission_id,
                    image = %image.processed_path,
                    error = %err,
                    "Grid fallback detection failed"
                );
                return None;
            }
        };

        let mut kept: Vec<AnswerRegion> = grid
            .into_iter()
            .filter_map(|region| {
                let bounds = region.bounds.clamped(image.width, image.height)?;
                let area = bounds.area();
                if area < self.options.grid_min_area || area > self.options.grid_max_area {
                    return None;
                }
                Some(AnswerRegion {
                    question_number: 0,
                    bounds,
                    confidence: GRID_FALLBACK_CONFIDENCE,
                    region_path: region.region_path,
                    detection_method: DetectionMethod::GridFallback,
                })
            })
            .collect();
        kept.sort_by_key(|region| region.bounds.y1);
        Some(kept)
    }
}
