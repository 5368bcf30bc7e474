use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::core::config::Settings;
use crate::pipeline::types::BoundingBox;
use crate::providers::{
    DetectedRegion, EnhancedImage, GridRegion, ImageEnhancer, ProviderError, RegionDetector,
};

/// HTTP client for the external vision service (enhancement + detection).
#[derive(Debug, Clone)]
pub(crate) struct VisionClient {
    client: Client,
    base_url: String,
    max_skew_degrees: f64,
}

#[derive(Debug, Deserialize)]
struct EnhanceResponse {
    processed_path: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct DetectResponseRegion {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
    #[serde(default)]
    confidence: f64,
    region_path: String,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    regions: Vec<DetectResponseRegion>,
}

impl VisionClient {
    pub(crate) fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.vision().request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: settings.vision().base_url.trim_end_matches('/').to_string(),
            max_skew_degrees: settings.vision().max_skew_degrees,
        })
    }

    async fn post_json(
        &self,
        endpoint: &str,
        payload: serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self.client.post(&url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ImageEnhancer for VisionClient {
    async fn enhance(&self, image_path: &str) -> Result<EnhancedImage, ProviderError> {
        let payload = json!({
            "image_path": image_path,
            "max_skew_degrees": self.max_skew_degrees,
        });
        let response = self.post_json("enhance", payload).await?;
        let body: EnhanceResponse = response.json().await?;

        Ok(EnhancedImage {
            original_path: image_path.to_string(),
            processed_path: body.processed_path,
            width: body.width,
            height: body.height,
        })
    }
}

#[async_trait]
impl RegionDetector for VisionClient {
    async fn detect(&self, image: &EnhancedImage) -> Result<Vec<DetectedRegion>, ProviderError> {
        let payload = json!({ "image_path": image.processed_path });
        let response = self.post_json("detect", payload).await?;
        let body: DetectResponse = response.json().await?;

        Ok(body
            .regions
            .into_iter()
            .map(|region| DetectedRegion {
                bounds: BoundingBox {
                    x1: region.x1,
                    y1: region.y1,
                    x2: region.x2,
                    y2: region.y2,
                },
                confidence: region.confidence,
                region_path: region.region_path,
            })
            .collect())
    }

    async fn detect_grid(&self, image: &EnhancedImage) -> Result<Vec<GridRegion>, ProviderError> {
        let payload = json!({ "image_path": image.processed_path });
        let response = self.post_json("detect-grid", payload).await?;
        let body: DetectResponse = response.json().await?;

        Ok(body
            .regions
            .into_iter()
            .map(|region| GridRegion {
                bounds: BoundingBox {
                    x1: region.x1,
                    y1: region.y1,
                    x2: region.x2,
                    y2: region.y2,
                },
                region_path: region.region_path,
            })
            .collect())
    }
}

/// Deterministic stand-in for the vision service: passthrough enhancement
/// with fixed dimensions and a synthetic four-row answer sheet.
#[derive(Debug, Clone)]
pub(crate) struct VisionStub {
    width: u32,
    height: u32,
    rows: u32,
}

impl Default for VisionStub {
    fn default() -> Self {
        Self { width: 1000, height: 1400, rows: 4 }
    }
}

impl VisionStub {
    fn row_bounds(&self, index: u32) -> BoundingBox {
        let row_height = self.height / (self.rows + 1);
        let y1 = row_height * (index + 1);
        BoundingBox { x1: 50, y1, x2: self.width - 50, y2: y1 + row_height / 2 }
    }
}

#[async_trait]
impl ImageEnhancer for VisionStub {
    async fn enhance(&self, image_path: &str) -> Result<EnhancedImage, ProviderError> {
        Ok(EnhancedImage {
            original_path: image_path.to_string(),
            processed_path: derive_processed_path(image_path),
            width: self.width,
            height: self.height,
        })
    }
}

#[async_trait]
impl RegionDetector for VisionStub {
    async fn detect(&self, image: &EnhancedImage) -> Result<Vec<DetectedRegion>, ProviderError> {
        Ok((0..self.rows)
            .map(|index| DetectedRegion {
                bounds: self.row_bounds(index),
                confidence: 0.92,
                region_path: derive_region_path(&image.processed_path, index as usize),
            })
            .collect())
    }

    async fn detect_grid(&self, image: &EnhancedImage) -> Result<Vec<GridRegion>, ProviderError> {
        Ok((0..self.rows)
            .map(|index| GridRegion {
                bounds: self.row_bounds(index),
                region_path: derive_region_path(&image.processed_path, index as usize),
            })
            .collect())
    }
}

pub(crate) fn derive_processed_path(image_path: &str) -> String {
    let path = Path::new(image_path);
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("image");
    match path.parent().and_then(|parent| parent.to_str()).filter(|parent| !parent.is_empty()) {
        Some(parent) => format!("{parent}/{stem}_processed.png"),
        None => format!("{stem}_processed.png"),
    }
}

pub(crate) fn derive_region_path(processed_path: &str, index: usize) -> String {
    let path = Path::new(processed_path);
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or("image");
    match path.parent().and_then(|parent| parent.to_str()).filter(|parent| !parent.is_empty()) {
        Some(parent) => format!("{parent}/{stem}_region_{index}.png"),
        None => format!("{stem}_region_{index}.png"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_keep_directory() {
        assert_eq!(derive_processed_path("data/uploads/ab12.png"), "data/uploads/ab12_processed.png");
        assert_eq!(
            derive_region_path("data/uploads/ab12_processed.png", 2),
            "data/uploads/ab12_processed_region_2.png"
        );
    }

    #[tokio::test]
    async fn stub_regions_are_within_bounds_and_ordered() {
        let stub = VisionStub::default();
        let image = stub.enhance("sheet.png").await.expect("enhance");
        let regions = stub.detect(&image).await.expect("detect");
        assert_eq!(regions.len(), 4);
        for window in regions.windows(2) {
            assert!(window[0].bounds.y1 < window[1].bounds.y1);
        }
        for region in &regions {
            assert!(region.bounds.y2 <= image.height);
            assert!(region.bounds.x2 <= image.width);
        }
    }
}
