use std::fmt;

use fluxgen_contracts::ValidationError;

pub const WRONG_API_KEY: &str = "Wrong API-Key";

/// Every way a generation can fail, as reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("API Token is required.")]
    TokenMissing,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    Conversion(String),
    #[error("Wrong API-Key")]
    ProviderAuth,
    #[error("Model did not return any output. Please check the model and input parameters.")]
    ProviderEmptyOutput,
    #[error("{0}")]
    Provider(String),
    #[error("{0}")]
    Download(String),
    #[error("{0}")]
    MetadataEmbed(String),
    #[error("{0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Token,
    Validation,
    Provider,
    Download,
    Metadata,
    Unknown,
}

impl ErrorCategory {
    /// Prefix placed before the error detail in user-facing messages.
    pub fn prefix(&self) -> &'static str {
        match self {
            ErrorCategory::Token => "",
            ErrorCategory::Validation => "Validation Error: ",
            ErrorCategory::Provider => "API Error: ",
            ErrorCategory::Download => "Error downloading image: ",
            ErrorCategory::Metadata => "Error embedding metadata: ",
            ErrorCategory::Unknown => "An unknown error occurred: ",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Token => "token",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Download => "download",
            ErrorCategory::Metadata => "metadata",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl GenerationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            GenerationError::TokenMissing => ErrorCategory::Token,
            GenerationError::Validation(_) | GenerationError::Conversion(_) => {
                ErrorCategory::Validation
            }
            GenerationError::ProviderAuth
            | GenerationError::ProviderEmptyOutput
            | GenerationError::Provider(_) => ErrorCategory::Provider,
            GenerationError::Download(_) => ErrorCategory::Download,
            GenerationError::MetadataEmbed(_) => ErrorCategory::Metadata,
            GenerationError::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Category prefix followed by the detail.
    pub fn user_message(&self) -> String {
        format!("{}{}", self.category().prefix(), self)
    }
}

#[cfg(test)]
mod tests {
    use fluxgen_contracts::{FormField, ValidationError};

    use super::{ErrorCategory, GenerationError};

    #[test]
    fn messages_carry_their_category_prefix() {
        let cases = vec![
            (GenerationError::TokenMissing, "API Token is required."),
            (
                GenerationError::Validation(ValidationError::new(
                    FormField::Steps,
                    "Steps must be between 1 and 50.",
                )),
                "Validation Error: Steps must be between 1 and 50.",
            ),
            (GenerationError::ProviderAuth, "API Error: Wrong API-Key"),
            (
                GenerationError::Download("Failed to download the image. Status code: 404".into()),
                "Error downloading image: Failed to download the image. Status code: 404",
            ),
            (
                GenerationError::Unknown("disk full".into()),
                "An unknown error occurred: disk full",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.user_message(), expected);
        }
    }

    #[test]
    fn conversion_failures_are_reported_as_validation() {
        let err = GenerationError::Conversion("Guidance must be a finite number.".into());
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(
            GenerationError::ProviderEmptyOutput.category(),
            ErrorCategory::Provider
        );
    }
}
