use crate::landmarks::HolisticDetection;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Image decode failed: {0}")]
    ImageDecode(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

/// Seam between the HTTP surface and the inference backend. The handler only
/// sees this trait, which keeps the ONNX runtime out of route tests.
#[async_trait]
pub trait LandmarkModel: Send + Sync + 'static {
    async fn detect(&self, image_data: Vec<u8>) -> Result<HolisticDetection, ModelError>;
}
