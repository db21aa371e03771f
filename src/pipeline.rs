//! Prompt, generate, parse, validate. Fail fast, no retry.

use std::{future::Future, time::Duration};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::{
    error::AppError,
    generation::{GenerationClient, GenerationError},
};

/// Domain invariants checked after typed deserialization succeeded.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// A typed input that knows how to phrase itself for the model and what it
/// expects back.
pub trait PromptTemplate {
    type Output: DeserializeOwned + Validate;

    /// Must be deterministic for a given input and language.
    fn render(&self, language: &str) -> String;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("generation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    BadOutput(String),

    #[error("{0}")]
    Schema(String),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Generation(_) | PipelineError::Timeout(_) => {
                AppError::UpstreamGeneration(err.to_string())
            }
            PipelineError::BadOutput(msg) => AppError::BadGenerationOutput(msg),
            PipelineError::Schema(msg) => AppError::SchemaViolation(msg),
        }
    }
}

/// Renders the prompt, makes exactly one generation call and returns the
/// validated output.
#[instrument(skip_all, fields(language = %language))]
pub async fn run<P>(
    client: &dyn GenerationClient,
    input: &P,
    language: &str,
) -> Result<P::Output, PipelineError>
where
    P: PromptTemplate,
{
    let prompt = input.render(language);
    debug!(prompt_len = prompt.len(), "calling generation client");
    let raw = client.generate(&prompt).await?;
    parse_output::<P::Output>(&raw)
}

/// Bounds a pipeline run; expiry counts as an upstream failure.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| PipelineError::Timeout(deadline))?
}

/// JSON decode, then typed deserialization, then domain checks. The raw text
/// and the failure reason are only ever logged; both may quote model output.
pub fn parse_output<T>(raw: &str) -> Result<T, PipelineError>
where
    T: DeserializeOwned + Validate,
{
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        error!(error = %e, raw_output = %raw, "generation output is not valid JSON");
        PipelineError::BadOutput(e.to_string())
    })?;

    let output: T = serde_json::from_value(value).map_err(|e| {
        error!(error = %e, raw_output = %raw, "generation output failed schema");
        PipelineError::Schema(e.to_string())
    })?;

    output.validate().map_err(|reason| {
        error!(%reason, raw_output = %raw, "generation output failed validation");
        PipelineError::Schema(reason)
    })?;

    Ok(output)
}

/// Shared check for generated numbers.
pub fn ensure_non_negative(field: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{field} must be a finite non-negative number"));
    }
    Ok(())
}
