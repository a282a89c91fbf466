pub mod form;
pub mod limits;
pub mod metadata;
pub mod models;
pub mod validation;

pub use form::{AspectRatio, GenerationForm, GenerationParams, OutputFormat};
pub use metadata::{GenerationMetadata, PARAMETERS_KEY};
pub use validation::{validate_form, FormField, ValidationError};
