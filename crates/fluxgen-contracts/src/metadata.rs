use serde::{Deserialize, Serialize};

use crate::form::{AspectRatio, GenerationParams, OutputFormat};

/// PNG text keyword the generation parameters are stored under.
pub const PARAMETERS_KEY: &str = "parameters";

/// Snapshot of a request as embedded in the saved image.
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub model: String,
    pub prompt: String,
    pub seed: u32,
    pub steps: u32,
    pub guidance: f64,
    pub aspect_ratio: AspectRatio,
    pub width: u32,
    pub height: u32,
    pub safety_tolerance: u32,
    pub interval: f64,
    pub raw: bool,
    pub output_format: OutputFormat,
    pub output_quality: u8,
    pub prompt_upsampling: bool,
}

impl GenerationMetadata {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl From<&GenerationParams> for GenerationMetadata {
    fn from(params: &GenerationParams) -> Self {
        Self {
            model: params.model.clone(),
            prompt: params.prompt.clone(),
            seed: params.seed,
            steps: params.steps,
            guidance: params.guidance,
            aspect_ratio: params.aspect_ratio,
            width: params.width,
            height: params.height,
            safety_tolerance: params.safety_tolerance,
            interval: params.interval,
            raw: params.raw,
            output_format: params.output_format,
            output_quality: params.output_quality,
            prompt_upsampling: params.prompt_upsampling,
        }
    }
}
