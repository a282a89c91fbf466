use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::builder::ProviderInput;
use crate::config::EngineConfig;
use crate::credentials::{ApiToken, CredentialGuard};
use crate::error::GenerationError;

/// A remote text-to-image backend.
///
/// `run` returns the provider's raw `output` value: a URL string, a list of
/// URLs, or something empty. Normalisation happens in [`invoke_provider`].
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, token: &ApiToken, model: &str, input: &ProviderInput) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutput {
    Url(String),
    UrlList(Vec<String>),
}

impl ProviderOutput {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                if trimmed.is_empty() {
                    return None;
                }
                Some(ProviderOutput::Url(trimmed.to_string()))
            }
            Value::Array(rows) => {
                let urls: Vec<String> = rows
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(str::to_string)
                    .collect();
                if urls.is_empty() {
                    return None;
                }
                Some(ProviderOutput::UrlList(urls))
            }
            _ => None,
        }
    }

    /// The URL that gets downloaded: the value itself, or the first entry.
    pub fn primary_url(&self) -> Option<&str> {
        match self {
            ProviderOutput::Url(url) => Some(url.as_str()),
            ProviderOutput::UrlList(urls) => urls.first().map(String::as_str),
        }
    }
}

/// Non-success HTTP status from a provider endpoint.
#[derive(Debug, thiserror::Error)]
#[error("{provider} request failed ({status}): {body}")]
pub struct ProviderHttpError {
    pub provider: String,
    pub status: u16,
    pub body: String,
}

/// Single provider call with failure classification. No retries.
pub fn invoke_provider(
    provider: &dyn ImageProvider,
    credential: &CredentialGuard<'_>,
    model: &str,
    input: &ProviderInput,
) -> Result<ProviderOutput, GenerationError> {
    let raw = provider
        .run(credential.token(), model, input)
        .map_err(classify_provider_error)?;
    ProviderOutput::from_value(&raw).ok_or(GenerationError::ProviderEmptyOutput)
}

/// Maps a provider failure onto the error taxonomy.
///
/// 401/403 responses are authentication failures. Providers that report a
/// bad token in the message body only are matched on "invalid token"; that
/// text is not a stable contract and may need revisiting.
pub fn classify_provider_error(err: anyhow::Error) -> GenerationError {
    let auth_status = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ProviderHttpError>())
        .any(|http| matches!(http.status, 401 | 403));
    let text = error_chain_text(&err, 1024);
    if auth_status || text.to_ascii_lowercase().contains("invalid token") {
        return GenerationError::ProviderAuth;
    }
    GenerationError::Provider(text)
}

pub struct ReplicateProvider {
    api_base: String,
    http: HttpClient,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ReplicateProvider {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed to build Replicate HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            http,
            poll_interval: config.poll_interval,
            poll_timeout: config.poll_timeout,
        })
    }

    /// `owner/name` runs the model's latest version; `owner/name:version`
    /// pins one.
    fn prediction_request(&self, model: &str, input: &ProviderInput) -> (String, Value) {
        let model = model.trim();
        match model.split_once(':') {
            Some((_, version)) => (
                format!("{}/predictions", self.api_base),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/predictions", self.api_base, model),
                json!({ "input": input }),
            ),
        }
    }

    fn poll_prediction(&self, poll_url: &str, token: &ApiToken) -> Result<Value> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(token.expose())
                .send()
                .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
            let payload = response_json_or_error("Replicate poll", response)?;
            match prediction_status(&payload).as_str() {
                "succeeded" => return Ok(payload),
                "failed" | "canceled" => bail!(prediction_failure(&payload)),
                _ => {}
            }
            if started.elapsed() >= self.poll_timeout {
                bail!(
                    "Replicate polling timed out after {:.1}s",
                    self.poll_timeout.as_secs_f64()
                );
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    fn run(&self, token: &ApiToken, model: &str, input: &ProviderInput) -> Result<Value> {
        let (endpoint, payload) = self.prediction_request(model, input);
        tracing::debug!(%endpoint, "creating Replicate prediction");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(token.expose())
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let mut prediction = response_json_or_error("Replicate", response)?;

        match prediction_status(&prediction).as_str() {
            "succeeded" => {}
            "starting" | "processing" => {
                let poll_url = prediction
                    .get("urls")
                    .and_then(Value::as_object)
                    .and_then(|obj| obj.get("get"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow::anyhow!("Replicate prediction missing poll URL"))?;
                prediction = self.poll_prediction(&poll_url, token)?;
            }
            _ => bail!(prediction_failure(&prediction)),
        }

        Ok(prediction.get("output").cloned().unwrap_or(Value::Null))
    }
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn prediction_failure(prediction: &Value) -> String {
    let status = prediction_status(prediction);
    match prediction.get("error").and_then(Value::as_str) {
        Some(error) if !error.trim().is_empty() => {
            format!("Replicate prediction {status}: {}", error.trim())
        }
        _ => format!(
            "Replicate prediction {status}: {}",
            truncate_text(&prediction.to_string(), 512)
        ),
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        return Err(ProviderHttpError {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate_text(&body, 512),
        }
        .into());
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
