//! Reasoning Service seam.
//!
//! Every generation stage talks to the service through [`ReasoningService`]
//! and [`request_json`], which owns the retry/timeout policy and the lenient
//! JSON recovery. Providers live in `anthropic` and `openai`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::anthropic::AnthropicClient;
use crate::config::{Provider, ReasoningConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::logging;
use crate::openai::OpenAIClient;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A role-tagged prompt for one completion.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl ReasoningRequest {
    pub fn new(system: &str, user_prompt: String) -> Self {
        Self {
            system: Some(system.to_string()),
            messages: vec![ChatMessage::user(user_prompt)],
            temperature: 0.4,
            max_tokens: 2048,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("reasoning service is not configured")]
    Unconfigured,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited")]
    RateLimited,
    #[error("API error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("empty response")]
    EmptyResponse,
}

impl ReasoningError {
    /// Transient failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            ReasoningError::Timeout(_) | ReasoningError::RateLimited | ReasoningError::Network(_) => true,
            ReasoningError::Http { status, .. } => *status >= 500,
            ReasoningError::Unconfigured | ReasoningError::EmptyResponse => false,
        }
    }
}

impl From<reqwest::Error> for ReasoningError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ReasoningError::Timeout(Duration::ZERO)
        } else {
            ReasoningError::Network(e.to_string())
        }
    }
}

/// A text-completion endpoint. Implementations return the raw completion text,
/// or the arguments of a function call when the model answers with one.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn name(&self) -> &str;

    /// False when no credential is configured; callers must not attempt calls then.
    fn is_available(&self) -> bool;

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError>;
}

/// Shared retry/timeout policy for every Reasoning Service call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            timeout: Duration::from_secs(45),
        }
    }
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    /// Call the service, retrying transient failures with exponential backoff.
    pub async fn call(
        &self,
        service: &dyn ReasoningService,
        request: &ReasoningRequest,
    ) -> Result<String, ReasoningError> {
        if !service.is_available() {
            return Err(ReasoningError::Unconfigured);
        }

        let attempts = self.max_attempts.max(1);
        let mut last_error = ReasoningError::EmptyResponse;

        for attempt in 1..=attempts {
            let outcome = match tokio::time::timeout(self.timeout, service.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(ReasoningError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(text) if text.trim().is_empty() => return Err(ReasoningError::EmptyResponse),
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        service = service.name(),
                        attempt,
                        error = %e,
                        "reasoning call failed, retrying"
                    );
                    tokio::time::sleep(self.backoff_for(attempt)).await;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}

/// Strip markdown fences and surrounding prose, returning the outermost JSON
/// object or array in `text`.
pub fn extract_json(text: &str) -> Option<&str> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = cleaned.find(|c| c == '{' || c == '[')?;
    let open = cleaned[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in cleaned[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&cleaned[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse a completion into `T`: strict first, then one lenient pass.
pub fn parse_completion<T: DeserializeOwned>(text: &str) -> PipelineResult<T> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Ok(value);
    }

    let candidate = extract_json(text).ok_or_else(|| {
        PipelineError::MalformedGenerationResult(format!(
            "no JSON found in response: {}",
            text.chars().take(120).collect::<String>()
        ))
    })?;

    serde_json::from_str::<T>(candidate)
        .map_err(|e| PipelineError::MalformedGenerationResult(e.to_string()))
}

/// Availability check, policy-governed call, typed parse.
pub async fn request_json<T: DeserializeOwned>(
    service: &dyn ReasoningService,
    policy: &RetryPolicy,
    request: &ReasoningRequest,
    user_id: Option<&str>,
) -> PipelineResult<T> {
    let text = policy.call(service, request).await?;

    logging::log_generation(user_id, &format!(
        "{} responded, length: {}", service.name(), text.len()
    ));

    parse_completion(&text)
}

/// Build the configured provider. A missing key yields an unavailable client.
pub fn from_config(config: &ReasoningConfig) -> Arc<dyn ReasoningService> {
    let key = config.api_key();
    let model = config.model.as_deref();
    match config.provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(key, model, config.timeout_secs)),
        Provider::OpenAI => Arc::new(OpenAIClient::new(key, model, config.timeout_secs)),
    }
}
