//! Risk classification of pull requests through a local Ollama model.
//!
//! # Contract
//!
//! [`InferenceAdapter::predict`] never fails. Every failure (transport error,
//! timeout, unparseable output, invalid output) resolves to
//! [`InferenceResult::fallback`]. Callers that need to tell a real answer from
//! a degraded one use [`InferenceAdapter::assess`], whose [`Outcome`] carries
//! the [`InferenceError`] behind a fallback.
//!
//! # Pipeline
//!
//! ```text
//! files + commit message ─► prompt (few-shot template)
//!     ─► POST {url}/api/generate (bounded timeout)
//!     ─► envelope `response` | `output`
//!     ─► JSON parse (direct, then outermost {...} span)
//!     ─► normalize (clamp, default, truncate)
//! ```
//!
//! # Observability
//!
//! Each call emits one `tracing` event: the clamped scores on success, or the
//! fallback reason on failure.

mod client;
mod error;
mod parse;
mod prompt;

pub use error::InferenceError;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use prism_types::{ChangeSet, InferenceResult};

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
/// Default model tag.
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";
/// Default bound on a single generate call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Where and how to reach the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Whether a result came from the model or from the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Model,
    Fallback(InferenceError),
}

/// A result together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub result: InferenceResult,
    pub outcome: Outcome,
}

impl Assessment {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self.outcome, Outcome::Fallback(_))
    }

    fn fallback(error: InferenceError) -> Self {
        Self {
            result: InferenceResult::fallback(),
            outcome: Outcome::Fallback(error),
        }
    }
}

pub type AssessFut<'a> = Pin<Box<dyn Future<Output = Assessment> + Send + 'a>>;

/// Anything that can score a change. Implemented by [`InferenceAdapter`];
/// the seam lets orchestration code run against a stub.
pub trait RiskModel: Send + Sync {
    fn assess<'a>(&'a self, change: &'a ChangeSet) -> AssessFut<'a>;
}

/// Client for the external risk model.
#[derive(Debug, Clone)]
pub struct InferenceAdapter {
    client: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceAdapter {
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        let client = client::build_http_client(config.timeout)
            .map_err(|e| InferenceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Score a change. Always returns a well-formed result.
    pub async fn predict(&self, changed_files: &[String], commit_message: &str) -> InferenceResult {
        self.assess(changed_files, commit_message).await.result
    }

    /// Score a change and report whether the fallback was used.
    pub async fn assess(&self, changed_files: &[String], commit_message: &str) -> Assessment {
        match self.try_predict(changed_files, commit_message).await {
            Ok(result) => {
                tracing::info!(
                    method = "ollama",
                    model = %self.config.model,
                    files = changed_files.len(),
                    risk = result.risk().value(),
                    confidence = result.confidence().value(),
                    impact = %result.impact(),
                    "Risk prediction completed"
                );
                Assessment {
                    result,
                    outcome: Outcome::Model,
                }
            }
            Err(error) => {
                tracing::warn!(
                    method = "fallback",
                    model = %self.config.model,
                    files = changed_files.len(),
                    reason = error.kind(),
                    %error,
                    "Risk prediction fell back to default"
                );
                Assessment::fallback(error)
            }
        }
    }

    async fn try_predict(
        &self,
        changed_files: &[String],
        commit_message: &str,
    ) -> Result<InferenceResult, InferenceError> {
        let prompt = prompt::build_prompt(changed_files, commit_message);
        let text = client::generate(&self.client, &self.config, &prompt).await?;
        let value = parse::parse_model_json(&text)?;
        parse::normalize(&value)
    }
}

impl RiskModel for InferenceAdapter {
    fn assess<'a>(&'a self, change: &'a ChangeSet) -> AssessFut<'a> {
        Box::pin(InferenceAdapter::assess(
            self,
            &change.changed_files,
            &change.commit_message,
        ))
    }
}
