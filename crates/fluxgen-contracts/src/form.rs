use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::limits::{GUIDANCE, HEIGHT, INTERVAL, OUTPUT_QUALITY, SAFETY_TOLERANCE, STEPS, WIDTH};
use crate::models::DEFAULT_MODEL;
use crate::validation::{FormField, ValidationError};

/// Flattened form values as the caller collects them.
///
/// Integer widgets arrive as `i64` and float widgets as `f64`; nothing here
/// is range checked yet. See [`crate::validate_form`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationForm {
    pub prompt: String,
    pub model: String,
    pub seed: i64,
    pub randomize: bool,
    pub steps: i64,
    pub guidance: f64,
    pub aspect_ratio: String,
    pub width: i64,
    pub height: i64,
    pub safety_tolerance: i64,
    pub interval: f64,
    pub raw: bool,
    pub output_format: String,
    pub output_quality: i64,
    pub prompt_upsampling: bool,
    /// A `raw` value that was not a boolean. Reported by the validator
    /// after every range check.
    #[serde(skip)]
    pub invalid_raw: Option<Value>,
}

impl Default for GenerationForm {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            model: DEFAULT_MODEL.to_string(),
            seed: 0,
            randomize: true,
            steps: STEPS.default,
            guidance: GUIDANCE.default,
            aspect_ratio: AspectRatio::Square.as_str().to_string(),
            width: WIDTH.default,
            height: HEIGHT.default,
            safety_tolerance: SAFETY_TOLERANCE.default,
            interval: INTERVAL.default,
            raw: false,
            output_format: OutputFormat::Png.as_str().to_string(),
            output_quality: OUTPUT_QUALITY.default,
            prompt_upsampling: false,
            invalid_raw: None,
        }
    }
}

impl GenerationForm {
    /// Reads a form from loosely typed JSON. Missing keys take their
    /// defaults. A non-boolean `raw` is kept aside in `invalid_raw` so that
    /// [`crate::validate_form`] can report it in its turn.
    pub fn from_json(mut value: Value) -> Result<Self, ValidationError> {
        let invalid_raw = match value.as_object_mut() {
            Some(fields) if fields.get("raw").is_some_and(|raw| !raw.is_boolean()) => {
                fields.remove("raw")
            }
            _ => None,
        };
        let mut form: Self = serde_json::from_value(value).map_err(|err| {
            ValidationError::new(FormField::Form, format!("Invalid form: {err}"))
        })?;
        form.invalid_raw = invalid_raw;
        Ok(form)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide16x9,
    #[serde(rename = "2:3")]
    Tall2x3,
    #[serde(rename = "3:2")]
    Wide3x2,
    #[serde(rename = "4:5")]
    Tall4x5,
    #[serde(rename = "5:4")]
    Wide5x4,
    #[serde(rename = "9:16")]
    Tall9x16,
    #[serde(rename = "21:9")]
    Wide21x9,
    #[serde(rename = "9:21")]
    Tall9x21,
    #[serde(rename = "3:4")]
    Tall3x4,
    #[serde(rename = "4:3")]
    Wide4x3,
    #[serde(rename = "custom")]
    Custom,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 12] = [
        AspectRatio::Square,
        AspectRatio::Wide16x9,
        AspectRatio::Tall2x3,
        AspectRatio::Wide3x2,
        AspectRatio::Tall4x5,
        AspectRatio::Wide5x4,
        AspectRatio::Tall9x16,
        AspectRatio::Wide21x9,
        AspectRatio::Tall9x21,
        AspectRatio::Tall3x4,
        AspectRatio::Wide4x3,
        AspectRatio::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Wide16x9 => "16:9",
            AspectRatio::Tall2x3 => "2:3",
            AspectRatio::Wide3x2 => "3:2",
            AspectRatio::Tall4x5 => "4:5",
            AspectRatio::Wide5x4 => "5:4",
            AspectRatio::Tall9x16 => "9:16",
            AspectRatio::Wide21x9 => "21:9",
            AspectRatio::Tall9x21 => "9:21",
            AspectRatio::Tall3x4 => "3:4",
            AspectRatio::Wide4x3 => "4:3",
            AspectRatio::Custom => "custom",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == raw.trim())
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, AspectRatio::Custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpg,
    Webp,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut lowered = raw.trim().to_ascii_lowercase();
        if let Some(value) = lowered.strip_prefix("image/") {
            lowered = value.to_string();
        }
        match lowered.as_str() {
            "png" => Some(OutputFormat::Png),
            "jpg" | "jpeg" => Some(OutputFormat::Jpg),
            "webp" => Some(OutputFormat::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// JPEG output is re-encoded without the PNG text chunk; the other
    /// formats are written as the metadata-carrying PNG stream.
    pub fn embeds_png_metadata(&self) -> bool {
        !matches!(self, OutputFormat::Jpg)
    }
}

/// A validated form converted to the types the provider expects.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub model: String,
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
