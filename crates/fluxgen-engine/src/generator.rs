use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use fluxgen_contracts::limits::SEED_MAX;
use fluxgen_contracts::models::ModelCatalog;
use fluxgen_contracts::{validate_form, GenerationForm, GenerationParams};
use rand::Rng;

use crate::builder::{build_provider_input, convert_form};
use crate::config::EngineConfig;
use crate::credentials::CredentialScope;
use crate::error::GenerationError;
use crate::finalizer::{render_artifact, ArtifactFinalizer, GeneratedArtifact, ReqwestFetcher};
use crate::provider::{invoke_provider, ImageProvider, ReplicateProvider};
use crate::status::StatusMessage;

/// Pipeline position. A failure in any stage ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    ValidatingToken,
    ValidatingParams,
    Converting,
    Building,
    Invoking,
    Downloading,
    EmbeddingMetadata,
    Persisting,
    Done,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GenerationStage::ValidatingToken => "validating_token",
            GenerationStage::ValidatingParams => "validating_params",
            GenerationStage::Converting => "converting",
            GenerationStage::Building => "building",
            GenerationStage::Invoking => "invoking",
            GenerationStage::Downloading => "downloading",
            GenerationStage::EmbeddingMetadata => "embedding_metadata",
            GenerationStage::Persisting => "persisting",
            GenerationStage::Done => "done",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub status: StatusMessage,
    pub artifact: Option<GeneratedArtifact>,
    /// Seed the caller should show for the next run.
    pub next_seed: i64,
    /// Stage that failed, if any.
    pub failed_stage: Option<GenerationStage>,
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(|artifact| artifact.path.as_path())
    }

    pub fn into_parts(self) -> (StatusMessage, Option<PathBuf>, i64) {
        (
            self.status,
            self.artifact.map(|artifact| artifact.path),
            self.next_seed,
        )
    }
}

/// Runs one generation at a time: token, validation, conversion, provider
/// call, download, metadata embedding, write.
pub struct Generator {
    provider: Box<dyn ImageProvider>,
    finalizer: ArtifactFinalizer,
    credentials: CredentialScope,
    catalog: ModelCatalog,
}

impl Generator {
    pub fn new(provider: impl ImageProvider + 'static, finalizer: ArtifactFinalizer) -> Self {
        Self {
            provider: Box::new(provider),
            finalizer,
            credentials: CredentialScope::new(),
            catalog: ModelCatalog::default(),
        }
    }

    /// Replicate provider and HTTP downloads configured from `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let provider = ReplicateProvider::new(config)?;
        let finalizer = ArtifactFinalizer::new(&config.output_dir, ReqwestFetcher::new(config)?);
        Ok(Self::new(provider, finalizer))
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn credentials(&self) -> &CredentialScope {
        &self.credentials
    }

    pub fn output_dir(&self) -> &Path {
        self.finalizer.output_dir()
    }

    /// Never fails: every error, including a panic inside a collaborator,
    /// comes back as an error status with no artifact and the form's seed.
    pub fn generate_image(&self, api_token: &str, form: &GenerationForm) -> GenerationOutcome {
        let started = Instant::now();
        let mut stage = GenerationStage::ValidatingToken;
        tracing::info!(
            provider = self.provider.name(),
            model = %form.model,
            seed = form.seed,
            "generation started"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_stages(api_token, form, &mut stage)
        }))
        .unwrap_or_else(|payload| Err(GenerationError::Unknown(panic_message(payload))));

        match result {
            Ok(artifact) => {
                let next_seed = if form.randomize {
                    random_seed()
                } else {
                    i64::from(artifact.metadata.seed)
                };
                tracing::info!(
                    path = %artifact.path.display(),
                    next_seed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation finished"
                );
                GenerationOutcome {
                    status: StatusMessage::success(&artifact.metadata.model, &artifact.path),
                    artifact: Some(artifact),
                    next_seed,
                    failed_stage: None,
                }
            }
            Err(err) => {
                tracing::warn!(
                    %stage,
                    category = %err.category(),
                    error = %err,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "generation failed"
                );
                GenerationOutcome {
                    status: StatusMessage::error(&err),
                    artifact: None,
                    next_seed: form.seed,
                    failed_stage: Some(stage),
                }
            }
        }
    }

    fn run_stages(
        &self,
        api_token: &str,
        form: &GenerationForm,
        stage: &mut GenerationStage,
    ) -> Result<GeneratedArtifact, GenerationError> {
        let credential = self.credentials.acquire(api_token)?;

        enter(stage, GenerationStage::ValidatingParams);
        validate_form(form)?;

        enter(stage, GenerationStage::Converting);
        let params = convert_form(form)?;
        self.note_model(&params);

        enter(stage, GenerationStage::Building);
        let input = build_provider_input(&params);

        enter(stage, GenerationStage::Invoking);
        let output = invoke_provider(self.provider.as_ref(), &credential, &params.model, &input)?;

        enter(stage, GenerationStage::Downloading);
        let bytes = self.finalizer.download(&output)?;

        enter(stage, GenerationStage::EmbeddingMetadata);
        let rendered = render_artifact(&bytes, &params)?;

        enter(stage, GenerationStage::Persisting);
        let artifact = self.finalizer.persist(rendered)?;

        credential.release();
        enter(stage, GenerationStage::Done);
        Ok(artifact)
    }

    fn note_model(&self, params: &GenerationParams) {
        match self.catalog.get(&params.model) {
            None => tracing::warn!(model = %params.model, "model is not in the catalog"),
            Some(spec) if params.raw && !spec.supports_raw => {
                tracing::debug!(model = %params.model, "raw mode is ignored by this model")
            }
            Some(_) => {}
        }
    }
}

/// Uniform draw from `0..=SEED_MAX`.
pub fn random_seed() -> i64 {
    rand::thread_rng().gen_range(0..=SEED_MAX)
}

fn enter(stage: &mut GenerationStage, next: GenerationStage) {
    tracing::debug!(from = %stage, to = %next, "generation stage");
    *stage = next;
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "internal panic".to_string()
}
