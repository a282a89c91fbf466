use fluxgen_contracts::{AspectRatio, GenerationForm, GenerationParams, OutputFormat};
use serde_json::{json, Map, Value};

use crate::error::GenerationError;

/// Provider input: field name to converted value.
pub type ProviderInput = Map<String, Value>;

/// Converts a validated form into typed parameters.
pub fn convert_form(form: &GenerationForm) -> Result<GenerationParams, GenerationError> {
    let model = form.model.trim();
    if model.is_empty() {
        return Err(GenerationError::Conversion("Model is required.".to_string()));
    }
    let aspect_ratio = AspectRatio::parse(&form.aspect_ratio).ok_or_else(|| {
        GenerationError::Conversion(format!("Unknown aspect ratio '{}'.", form.aspect_ratio))
    })?;
    let output_format = OutputFormat::parse(&form.output_format).ok_or_else(|| {
        GenerationError::Conversion(format!(
            "Unsupported output format '{}'. Expected png, jpg or webp.",
            form.output_format
        ))
    })?;

    Ok(GenerationParams {
        prompt: form.prompt.clone(),
        model: model.to_string(),
        seed: to_integer("Seed", form.seed)?,
        steps: to_integer("Steps", form.steps)?,
        guidance: to_finite("Guidance", form.guidance)?,
        aspect_ratio,
        width: to_integer("Width", form.width)?,
        height: to_integer("Height", form.height)?,
        safety_tolerance: to_integer("Safety Tolerance", form.safety_tolerance)?,
        interval: to_finite("Interval", form.interval)?,
        raw: form.raw,
        output_format,
        output_quality: to_integer("Output Quality", form.output_quality)?,
        prompt_upsampling: form.prompt_upsampling,
    })
}

/// Shapes parameters into the provider's input mapping. Width and height are
/// sent only for the `custom` aspect ratio; otherwise the provider derives
/// the size from the ratio.
pub fn build_provider_input(params: &GenerationParams) -> ProviderInput {
    let mut input = map_object(json!({
        "prompt": params.prompt,
        "seed": params.seed,
        "steps": params.steps,
        "guidance": params.guidance,
        "aspect_ratio": params.aspect_ratio.as_str(),
        "safety_tolerance": params.safety_tolerance,
        "raw": params.raw,
        "interval": params.interval,
        "output_format": params.output_format.as_str(),
        "output_quality": params.output_quality,
        "prompt_upsampling": params.prompt_upsampling,
    }));
    if params.aspect_ratio.is_custom() {
        input.insert("width".to_string(), Value::from(params.width));
        input.insert("height".to_string(), Value::from(params.height));
    }
    input
}

fn to_integer<T: TryFrom<i64>>(label: &str, value: i64) -> Result<T, GenerationError> {
    T::try_from(value)
        .map_err(|_| GenerationError::Conversion(format!("{label} value {value} is out of range.")))
}

fn to_finite(label: &str, value: f64) -> Result<f64, GenerationError> {
    if value.is_finite() {
        return Ok(value);
    }
    Err(GenerationError::Conversion(format!(
        "{label} must be a finite number."
    )))
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use fluxgen_contracts::{AspectRatio, GenerationForm, OutputFormat};
    use serde_json::json;

    use super::{build_provider_input, convert_form};
    use crate::error::GenerationError;

    fn form() -> GenerationForm {
        GenerationForm {
            prompt: "an owl reading by candlelight".to_string(),
            seed: 42,
            steps: 28,
            guidance: 3.5,
            output_format: "JPEG".to_string(),
            output_quality: 90,
            ..GenerationForm::default()
        }
    }

    #[test]
    fn conversion_produces_typed_params() -> anyhow::Result<()> {
        let params = convert_form(&form())?;
        assert_eq!(params.seed, 42u32);
        assert_eq!(params.steps, 28);
        assert_eq!(params.output_format, OutputFormat::Jpg);
        assert_eq!(params.output_quality, 90u8);
        assert_eq!(params.aspect_ratio, AspectRatio::Square);
        Ok(())
    }

    #[test]
    fn non_finite_floats_fail_conversion() {
        let err = convert_form(&GenerationForm {
            guidance: f64::NAN,
            ..form()
        })
        .err();
        match err {
            Some(GenerationError::Conversion(message)) => {
                assert_eq!(message, "Guidance must be a finite number.")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn values_outside_the_target_type_fail_conversion() {
        let err = convert_form(&GenerationForm {
            output_quality: 300,
            ..form()
        })
        .err();
        assert!(matches!(err, Some(GenerationError::Conversion(_))));
    }

    #[test]
    fn unknown_output_format_fails_conversion() {
        let err = convert_form(&GenerationForm {
            output_format: "gif".to_string(),
            ..form()
        })
        .err();
        match err {
            Some(GenerationError::Conversion(message)) => assert!(message.contains("'gif'")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn named_ratio_omits_dimensions() -> anyhow::Result<()> {
        let input = build_provider_input(&convert_form(&form())?);
        assert!(!input.contains_key("width"));
        assert!(!input.contains_key("height"));
        assert_eq!(input["aspect_ratio"], json!("1:1"));
        assert_eq!(input["seed"], json!(42));
        assert_eq!(input["guidance"], json!(3.5));
        assert_eq!(input["output_format"], json!("jpg"));
        assert_eq!(input.len(), 11);
        Ok(())
    }

    #[test]
    fn custom_ratio_sends_dimensions() -> anyhow::Result<()> {
        let params = convert_form(&GenerationForm {
            aspect_ratio: "custom".to_string(),
            width: 768,
            height: 1344,
            ..form()
        })?;
        let input = build_provider_input(&params);
        assert_eq!(input["width"], json!(768));
        assert_eq!(input["height"], json!(1344));
        Ok(())
    }

    #[test]
    fn blank_model_fails_conversion() {
        let err = convert_form(&GenerationForm {
            model: "  ".to_string(),
            ..form()
        })
        .err();
        match err {
            Some(GenerationError::Conversion(message)) => assert_eq!(message, "Model is required."),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
