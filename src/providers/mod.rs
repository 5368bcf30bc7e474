pub(crate) mod factcheck;
pub(crate) mod scoring;
pub(crate) mod vision;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::{ProviderMode, Settings};
use crate::pipeline::types::{BoundingBox, QuestionType};

#[derive(Debug, Error)]
pub(crate) enum ProviderError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("response missing expected content")]
    MissingContent,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Enhanced-image artifact returned by the enhancement capability.
#[derive(Debug, Clone)]
pub(crate) struct EnhancedImage {
    pub(crate) original_path: String,
    pub(crate) processed_path: String,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[async_trait]
pub(crate) trait ImageEnhancer: Send + Sync {
    async fn enhance(&self, image_path: &str) -> Result<EnhancedImage, ProviderError>;
}

#[derive(Debug, Clone)]
pub(crate) struct DetectedRegion {
    pub(crate) bounds: BoundingBox,
    pub(crate) confidence: f64,
    pub(crate) region_path: String,
}

#[derive(Debug, Clone)]
pub(crate) struct GridRegion {
    pub(crate) bounds: BoundingBox,
    pub(crate) region_path: String,
}

#[async_trait]
pub(crate) trait RegionDetector: Send + Sync {
    /// Primary model-based detection. May legitimately return no regions.
    async fn detect(&self, image: &EnhancedImage) -> Result<Vec<DetectedRegion>, ProviderError>;

    /// Structural line/grid fallback, used only when `detect` yields
    /// nothing. Returned order is contour-discovery order, not reading
    /// order.
    async fn detect_grid(&self, image: &EnhancedImage) -> Result<Vec<GridRegion>, ProviderError>;
}

#[derive(Debug, Clone)]
pub(crate) struct ScoreRequest {
    pub(crate) region_path: String,
    pub(crate) question_number: u32,
    pub(crate) question_text: String,
    pub(crate) expected_answer: String,
    pub(crate) max_score: f64,
    pub(crate) question_type: QuestionType,
}

#[async_trait]
pub(crate) trait ScoringProvider: Send + Sync {
    /// Returns the raw model output: structured JSON when the model
    /// cooperates, free text otherwise. Parsing happens in the pipeline.
    async fn score(&self, request: &ScoreRequest) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub(crate) struct FactCheckRequest {
    pub(crate) question_number: u32,
    pub(crate) student_answer: String,
    pub(crate) expected_answer: String,
}

#[async_trait]
pub(crate) trait FactCheckProvider: Send + Sync {
    async fn fact_check(&self, request: &FactCheckRequest) -> Result<String, ProviderError>;
}

/// Capability handles injected into the pipeline at construction.
#[derive(Clone)]
pub(crate) struct PipelineProviders {
    pub(crate) enhancer: Arc<dyn ImageEnhancer>,
    pub(crate) detector: Arc<dyn RegionDetector>,
    pub(crate) scorer: Arc<dyn ScoringProvider>,
    pub(crate) fact_checker: Arc<dyn FactCheckProvider>,
}

pub(crate) fn build(settings: &Settings) -> anyhow::Result<PipelineProviders> {
    let (enhancer, detector): (Arc<dyn ImageEnhancer>, Arc<dyn RegionDetector>) =
        match settings.vision().provider {
            ProviderMode::Live => {
                let client = Arc::new(vision::VisionClient::from_settings(settings)?);
                (client.clone() as Arc<dyn ImageEnhancer>, client as Arc<dyn RegionDetector>)
            }
            ProviderMode::Stub => {
                let stub = Arc::new(vision::VisionStub::default());
                (stub.clone() as Arc<dyn ImageEnhancer>, stub as Arc<dyn RegionDetector>)
            }
        };

    let scorer: Arc<dyn ScoringProvider> = match settings.scoring().provider {
        ProviderMode::Live => Arc::new(scoring::LiveScoringProvider::from_settings(settings)?),
        ProviderMode::Stub => {
            Arc::new(scoring::StubScoringProvider::new(settings.scoring().stub_seed))
        }
    };

    let fact_checker: Arc<dyn FactCheckProvider> = match settings.fact_check().provider {
        ProviderMode::Live => Arc::new(factcheck::LiveFactCheckProvider::from_settings(settings)?),
        ProviderMode::Stub => Arc::new(factcheck::StubFactCheckProvider),
    };

    tracing::info!(
        vision = settings.vision().provider.as_str(),
        scoring = settings.scoring().provider.as_str(),
        fact_check = settings.fact_check().provider.as_str(),
        "Pipeline providers constructed"
    );

    Ok(PipelineProviders { enhancer, detector, scorer, fact_checker })
}
