use std::fmt;

use crate::form::{AspectRatio, GenerationForm};
use crate::limits::{
    Bounds, DIMENSION_MULTIPLE, GUIDANCE, HEIGHT, INTERVAL, OUTPUT_QUALITY, SAFETY_TOLERANCE,
    SEED_MAX, STEPS, WIDTH,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormField {
    Seed,
    Steps,
    Guidance,
    SafetyTolerance,
    Interval,
    Width,
    Height,
    OutputQuality,
    AspectRatio,
    OutputFormat,
    Raw,
    /// The form as a whole could not be read.
    Form,
}

impl FormField {
    pub fn name(&self) -> &'static str {
        match self {
            FormField::Seed => "seed",
            FormField::Steps => "steps",
            FormField::Guidance => "guidance",
            FormField::SafetyTolerance => "safety_tolerance",
            FormField::Interval => "interval",
            FormField::Width => "width",
            FormField::Height => "height",
            FormField::OutputQuality => "output_quality",
            FormField::AspectRatio => "aspect_ratio",
            FormField::OutputFormat => "output_format",
            FormField::Raw => "raw",
            FormField::Form => "form",
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The first field found outside its domain, with a message fit for display.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: FormField,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: FormField, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Checks every bounded field, stopping at the first violation.
///
/// Order: seed, steps, guidance, safety tolerance, interval, width, height,
/// width and height divisibility, output quality, aspect ratio, raw. Width
/// and height are checked even when the aspect ratio is not `custom`. A
/// non-boolean `raw` is carried in from [`GenerationForm::from_json`].
pub fn validate_form(form: &GenerationForm) -> Result<(), ValidationError> {
    if form.seed < 0 || form.seed > SEED_MAX {
        return Err(ValidationError::new(
            FormField::Seed,
            format!("Seed value must be between 0 and {SEED_MAX}."),
        ));
    }
    check_range(FormField::Steps, "Steps", form.steps, STEPS)?;
    check_range(FormField::Guidance, "Guidance", form.guidance, GUIDANCE)?;
    check_range(
        FormField::SafetyTolerance,
        "Safety Tolerance",
        form.safety_tolerance,
        SAFETY_TOLERANCE,
    )?;
    check_range(FormField::Interval, "Interval", form.interval, INTERVAL)?;
    check_range(FormField::Width, "Width", form.width, WIDTH)?;
    check_range(FormField::Height, "Height", form.height, HEIGHT)?;
    if form.width % DIMENSION_MULTIPLE != 0 {
        return Err(ValidationError::new(
            FormField::Width,
            format!("Width must be a multiple of {DIMENSION_MULTIPLE}."),
        ));
    }
    if form.height % DIMENSION_MULTIPLE != 0 {
        return Err(ValidationError::new(
            FormField::Height,
            format!("Height must be a multiple of {DIMENSION_MULTIPLE}."),
        ));
    }
    check_range(
        FormField::OutputQuality,
        "Output Quality",
        form.output_quality,
        OUTPUT_QUALITY,
    )?;
    if AspectRatio::parse(&form.aspect_ratio).is_none() {
        return Err(ValidationError::new(
            FormField::AspectRatio,
            "Aspect Ratio is not valid.",
        ));
    }
    if form.invalid_raw.is_some() {
        return Err(ValidationError::new(
            FormField::Raw,
            "Raw must be a boolean value.",
        ));
    }
    Ok(())
}

// Written as two comparisons rather than `contains` so NaN falls through to
// conversion, which rejects it.
fn check_range<T>(
    field: FormField,
    label: &str,
    value: T,
    bounds: Bounds<T>,
) -> Result<(), ValidationError>
where
    T: PartialOrd + fmt::Display + Copy,
{
    if value < bounds.min || value > bounds.max {
        return Err(ValidationError::new(
            field,
            format!("{label} must be between {} and {}.", bounds.min, bounds.max),
        ));
    }
    Ok(())
}
