//! Parameter conversion, provider invocation and artifact finalisation for
//! Flux image generation. [`Generator::generate_image`] is the entry point.

pub mod builder;
pub mod config;
pub mod credentials;
pub mod error;
pub mod finalizer;
pub mod generator;
pub mod provider;
pub mod status;

pub use builder::{build_provider_input, convert_form, ProviderInput};
pub use config::{api_token_from_env, EngineConfig};
pub use credentials::{ApiToken, CredentialGuard, CredentialScope};
pub use error::{ErrorCategory, GenerationError};
pub use finalizer::{
    read_embedded_metadata, ArtifactFinalizer, GeneratedArtifact, ImageFetcher, ReqwestFetcher,
};
pub use generator::{random_seed, GenerationOutcome, GenerationStage, Generator};
pub use provider::{invoke_provider, ImageProvider, ProviderOutput, ReplicateProvider};
pub use status::{StatusKind, StatusMessage};
