//! Natural-language explanation generation behind a narrow async seam.
//!
//! The pipeline only depends on [`ExplanationGenerator`]. Concrete clients
//! live behind cargo features: `gemini` (REST via reqwest) and `rig`
//! (OpenRouter via rig-core). [`RetryingGenerator`] wraps any of them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure of the external text-generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("explanation request timed out after {0:?}")]
    Timeout(Duration),

    #[error("explanation service rejected the credentials: {0}")]
    Auth(String),

    #[error("explanation service returned an unusable response: {0}")]
    MalformedResponse(String),

    #[error("explanation service unavailable: {0}")]
    Unavailable(String),

    #[error("explanation request could not be sent: {0}")]
    Transport(String),

    #[error("explanation request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl UpstreamError {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "upstream_timeout",
            UpstreamError::Auth(_) => "upstream_auth",
            UpstreamError::MalformedResponse(_) => "upstream_malformed_response",
            UpstreamError::Unavailable(_) => "upstream_unavailable",
            UpstreamError::Transport(_) => "upstream_transport",
            UpstreamError::Rejected { .. } => "upstream_rejected",
        }
    }

    /// Classifies a non-success HTTP status returned by a provider.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => UpstreamError::Auth(body),
            429 => UpstreamError::Unavailable(body),
            500..=599 => UpstreamError::Unavailable(format!("status {status}: {body}")),
            _ => UpstreamError::Rejected {
                status,
                message: body,
            },
        }
    }

    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Timeout(_) | UpstreamError::Unavailable(_) | UpstreamError::Transport(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRequest {
    /// System instruction selecting the register of the answer.
    pub persona: String,
    pub prompt: String,
    pub sampling: SamplingParams,
}

#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn generate(&self, request: &ExplanationRequest) -> Result<String, UpstreamError>;

    /// Short provider name for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on all attempts and backoff sleeps together.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(9),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Retries transient upstream failures with exponential backoff, giving up
/// with [`UpstreamError::Timeout`] once the policy deadline has passed.
pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<G: ExplanationGenerator> RetryingGenerator<G> {
    async fn attempts(&self, request: &ExplanationRequest) -> Result<String, UpstreamError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.generate(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.policy.backoff(attempt - 1);
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        error = %e,
                        "explanation attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<G: ExplanationGenerator> ExplanationGenerator for RetryingGenerator<G> {
    async fn generate(&self, request: &ExplanationRequest) -> Result<String, UpstreamError> {
        let deadline = self.policy.deadline;
        match tokio::time::timeout(deadline, self.attempts(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(provider = self.inner.name(), "explanation deadline of {:?} exceeded", deadline);
                Err(UpstreamError::Timeout(deadline))
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(feature = "gemini")]
pub use gemini::{GeminiConfig, GeminiGenerator};

#[cfg(feature = "gemini")]
mod gemini {
    use super::*;
    use serde_json::json;

    pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

    #[derive(Debug, Clone)]
    pub struct GeminiConfig {
        pub api_key: String,
        pub model: String,
        pub base_url: String,
        pub timeout: Duration,
    }

    impl GeminiConfig {
        pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
            Self {
                api_key: api_key.into(),
                model: model.into(),
                base_url: DEFAULT_BASE_URL.to_string(),
                timeout: Duration::from_secs(8),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateContentResponse {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }

    #[derive(Debug, Deserialize)]
    struct Candidate {
        content: Option<Content>,
    }

    #[derive(Debug, Deserialize)]
    struct Content {
        #[serde(default)]
        parts: Vec<Part>,
    }

    #[derive(Debug, Deserialize)]
    struct Part {
        text: Option<String>,
    }

    /// Client for the Gemini `generateContent` REST endpoint.
    pub struct GeminiGenerator {
        client: reqwest::Client,
        config: GeminiConfig,
    }

    impl GeminiGenerator {
        pub fn new(config: GeminiConfig) -> Result<Self, UpstreamError> {
            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| UpstreamError::Transport(e.to_string()))?;
            Ok(Self { client, config })
        }

        fn endpoint(&self) -> String {
            format!(
                "{}/v1beta/models/{}:generateContent",
                self.config.base_url.trim_end_matches('/'),
                self.config.model
            )
        }
    }

    #[async_trait]
    impl ExplanationGenerator for GeminiGenerator {
        async fn generate(&self, request: &ExplanationRequest) -> Result<String, UpstreamError> {
            let body = json!({
                "systemInstruction": { "parts": [{ "text": request.persona }] },
                "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
                "generationConfig": {
                    "temperature": request.sampling.temperature,
                    "maxOutputTokens": request.sampling.max_output_tokens,
                },
            });

            let response = self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        UpstreamError::Timeout(self.config.timeout)
                    } else {
                        UpstreamError::Transport(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(UpstreamError::from_status(status.as_u16(), text));
            }

            let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(self.config.timeout)
                } else {
                    UpstreamError::MalformedResponse(e.to_string())
                }
            })?;

            let text: String = parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
                .unwrap_or_default();

            if text.trim().is_empty() {
                return Err(UpstreamError::MalformedResponse(
                    "no text in first candidate".to_string(),
                ));
            }
            Ok(text)
        }

        fn name(&self) -> &str {
            "gemini"
        }
    }
}

#[cfg(feature = "rig")]
pub use openrouter::OpenRouterGenerator;

#[cfg(feature = "rig")]
mod openrouter {
    use super::*;
    use rig::{
        client::CompletionClient,
        completion::{CompletionError, Prompt, PromptError},
        providers::openrouter,
    };

    /// OpenRouter chat completion through a rig agent.
    pub struct OpenRouterGenerator {
        client: openrouter::Client,
        model: String,
        timeout: Duration,
    }

    impl OpenRouterGenerator {
        pub fn new(api_key: &str, model: impl Into<String>, timeout: Duration) -> Self {
            Self {
                client: openrouter::Client::new(api_key),
                model: model.into(),
                timeout,
            }
        }
    }

    /// Error body OpenRouter sends with a failed completion.
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }

    #[derive(Debug, Deserialize)]
    struct ErrorDetail {
        code: u16,
        message: String,
    }

    /// rig forwards non-success bodies as `ProviderError` text; the status
    /// is recovered from the OpenRouter error envelope when present.
    fn classify_provider(body: String) -> UpstreamError {
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { error }) => UpstreamError::from_status(error.code, error.message),
            Err(_) => UpstreamError::Unavailable(body),
        }
    }

    fn classify(error: PromptError) -> UpstreamError {
        match error {
            PromptError::CompletionError(e) => match e {
                CompletionError::HttpError(e) => match e.status() {
                    Some(status) => UpstreamError::from_status(status.as_u16(), e.to_string()),
                    None => UpstreamError::Transport(e.to_string()),
                },
                CompletionError::JsonError(e) => UpstreamError::MalformedResponse(e.to_string()),
                CompletionError::ResponseError(message) => {
                    UpstreamError::MalformedResponse(message)
                }
                CompletionError::ProviderError(body) => classify_provider(body),
                e @ (CompletionError::UrlError(_) | CompletionError::RequestError(_)) => {
                    UpstreamError::Rejected {
                        status: 0,
                        message: e.to_string(),
                    }
                }
            },
            other => UpstreamError::MalformedResponse(other.to_string()),
        }
    }

    #[async_trait]
    impl ExplanationGenerator for OpenRouterGenerator {
        async fn generate(&self, request: &ExplanationRequest) -> Result<String, UpstreamError> {
            let agent = self
                .client
                .agent(&self.model)
                .preamble(&request.persona)
                .temperature(f64::from(request.sampling.temperature))
                .max_tokens(u64::from(request.sampling.max_output_tokens))
                .build();

            let text = match tokio::time::timeout(self.timeout, agent.prompt(request.prompt.as_str())).await {
                Err(_) => return Err(UpstreamError::Timeout(self.timeout)),
                Ok(Err(e)) => return Err(classify(e)),
                Ok(Ok(text)) => text,
            };
            if text.trim().is_empty() {
                return Err(UpstreamError::MalformedResponse("empty completion".to_string()));
            }
            Ok(text)
        }

        fn name(&self) -> &str {
            "openrouter"
        }
    }

}
