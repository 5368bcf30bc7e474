use tokio::task::JoinSet;
use tracing::warn;

use crate::pipeline::orchestrator::GradingPipeline;
use crate::pipeline::state::{GradingState, PipelineStatus};
use crate::pipeline::types::{ItemStatus, ProcessedImage};

impl GradingPipeline {
    /// Enhance every uploaded image. Images are processed in bounded
    /// batches; one failing image never aborts the rest, but the stage
    /// fails when no image survives.
    pub(crate) async fn preprocess(&self, state: &mut GradingState) {
        if !state.require_status(PipelineStatus::Pending, "pipeline setup") {
            return;
        }
        if state.image_paths.is_empty() {
            state.fail("no images to preprocess");
            return;
        }

        let batch_size = self.options.preprocess_batch_size.max(1);
        let mut outcomes: Vec<Option<ProcessedImage>> = vec![None; state.image_paths.len()];

        for batch_start in (0..state.image_paths.len()).step_by(batch_size) {
            let batch_end = (batch_start + batch_size).min(state.image_paths.len());
            let mut join_set = JoinSet::new();

            for index in batch_start..batch_end {
                let enhancer = self.providers.enhancer.clone();
                let path = state.image_paths[index].clone();
                join_set.spawn(async move { (index, enhancer.enhance(&path).await) });
            }

            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((index, Ok(image))) => {
                        outcomes[index] = Some(ProcessedImage {
                            original_path: image.original_path,
                            processed_path: Some(image.processed_path),
                            width: Some(image.width),
                            height: Some(image.height),
                            status: ItemStatus::Success,
                            error: None,
                        });
                    }
                    Ok((index, Err(err))) => {
                        warn!(
                            submission_id = %state.submission_id,
                            image = %state.image_paths[index],
                            error = %err,
                            "Image enhancement failed"
                        );
                        outcomes[index] = Some(ProcessedImage {
                            original_path: state.image_paths[index].clone(),
                            processed_path: None,
                            width: None,
                            height: None,
                            status: ItemStatus::Error,
                            error: Some(err.to_string()),
                        });
                    }
                    Err(err) => {
                        warn!(submission_id = %state.submission_id, error = %err, "Enhancement task aborted");
                    }
                }
            }
        }

        state.processed_images = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| ProcessedImage {
                    original_path: state.image_paths[index].clone(),
                    processed_path: None,
                    width: None,
                    height: None,
                    status: ItemStatus::Error,
                    error: Some("enhancement task aborted".to_string()),
                })
            })
            .collect();

        let succeeded = state
            .processed_images
            .iter()
            .filter(|image| image.status == ItemStatus::Success)
            .count();

        if succeeded == 0 {
            state.fail("image preprocessing failed for all images");
            return;
        }

        metrics::counter!("pipeline_images_preprocessed_total").increment(succeeded as u64);
        state.status = PipelineStatus::PreprocessingComplete;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::pipeline::state::{GradingState, PipelineStatus};
    use crate::pipeline::testing::{pipeline_with, FlakyEnhancer, ScriptedDetector};
    use crate::pipeline::types::ItemStatus;

    fn state(paths: &[&str]) -> GradingState {
        GradingState::new(
            "sub-1",
            "exam-1",
            paths.iter().map(|path| path.to_string()).collect(),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn one_failing_image_does_not_abort_the_rest() {
        let pipeline = pipeline_with(
            FlakyEnhancer::failing_for(&["b.png"]),
            ScriptedDetector::empty(),
        );
        let mut state = state(&["a.png", "b.png", "c.png"]);
        pipeline.preprocess(&mut state).await;

        assert_eq!(state.status, PipelineStatus::PreprocessingComplete);
        assert_eq!(state.processed_images.len(), 3);
        assert_eq!(state.processed_images[0].status, ItemStatus::Success);
        assert_eq!(state.processed_images[1].status, ItemStatus::Error);
        assert!(state.processed_images[1].error.is_some());
        assert_eq!(state.processed_images[2].status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn all_images_failing_fails_the_stage() {
        let pipeline = pipeline_with(
            FlakyEnhancer::failing_for(&["a.png", "b.png"]),
            ScriptedDetector::empty(),
        );
        let mut state = state(&["a.png", "b.png"]);
        pipeline.preprocess(&mut state).await;

        assert_eq!(state.status, PipelineStatus::Error);
        assert_eq!(state.error.as_deref(), Some("image preprocessing failed for all images"));
    }

    #[tokio::test]
    async fn empty_image_list_fails() {
        let pipeline = pipeline_with(FlakyEnhancer::reliable(), ScriptedDetector::empty());
        let mut state = state(&[]);
        pipeline.preprocess(&mut state).await;
        assert_eq!(state.status, PipelineStatus::Error);
    }

    #[tokio::test]
    async fn outcomes_keep_upload_order() {
        let pipeline = pipeline_with(FlakyEnhancer::reliable(), ScriptedDetector::empty());
        let mut state = state(&["z.png", "a.png", "m.png"]);
        pipeline.preprocess(&mut state).await;

        let originals: Vec<&str> =
            state.processed_images.iter().map(|image| image.original_path.as_str()).collect();
        assert_eq!(originals, vec!["z.png", "a.png", "m.png"]);
    }
}
