use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::reasoning::{ChatMessage, ReasoningError, ReasoningRequest, ReasoningService};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Model constants
pub const CLAUDE_HAIKU: &str = "claude-3-5-haiku-20241022";
pub const CLAUDE_SONNET: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<&'a ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
    input: Option<serde_json::Value>, // present on tool_use blocks
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

pub struct AnthropicClient {
    client: Client,
    api_key: Option<String>,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: Option<&str>, model: Option<&str>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.map(|k| k.to_string()),
            model: model.unwrap_or(CLAUDE_SONNET).to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Pick the completion out of the content blocks: a tool call's input wins,
/// otherwise the last text block.
fn completion_text(content: &[ContentBlock]) -> Option<String> {
    if let Some(input) = content
        .iter()
        .find(|c| c.content_type == "tool_use")
        .and_then(|c| c.input.as_ref())
    {
        return Some(input.to_string());
    }

    content
        .iter()
        .filter(|c| c.content_type == "text")
        .last()
        .and_then(|c| c.text.clone())
}

#[async_trait]
impl ReasoningService for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let api_key = self.api_key.as_deref().ok_or(ReasoningError::Unconfigured)?;

        // System prompts travel separately; only user/assistant turns go in messages
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: request.messages.iter().filter(|m| m.role != "system").collect(),
            temperature: request.temperature,
        };

        let response = self.client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();

            if status == 429 {
                return Err(ReasoningError::RateLimited);
            }

            // Try to parse structured error
            let message = match serde_json::from_str::<AnthropicError>(&error_text) {
                Ok(parsed) => format!("{} - {}", parsed.error.error_type, parsed.error.message),
                Err(_) => error_text,
            };
            return Err(ReasoningError::Http { status, message });
        }

        let completion: MessagesResponse = response.json().await?;

        completion_text(&completion.content).ok_or(ReasoningError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: &str, text: Option<&str>, input: Option<serde_json::Value>) -> ContentBlock {
        ContentBlock {
            content_type: kind.to_string(),
            text: text.map(|t| t.to_string()),
            input,
        }
    }

    #[test]
    fn test_last_text_block_wins() {
        let content = vec![
            block("thinking", None, None),
            block("text", Some("draft"), None),
            block("text", Some("{\"ok\":true}"), None),
        ];
        assert_eq!(completion_text(&content).as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn test_tool_use_input_is_returned_as_json() {
        let content = vec![
            block("text", Some("Calling tool"), None),
            block("tool_use", None, Some(serde_json::json!({"goals": []}))),
        ];
        assert_eq!(completion_text(&content).as_deref(), Some("{\"goals\":[]}"));
    }

    #[test]
    fn test_unconfigured_client() {
        let client = AnthropicClient::new(None, None, 30);
        assert!(!client.is_available());
        assert_eq!(client.model(), CLAUDE_SONNET);

        let client = AnthropicClient::new(Some("key"), Some(CLAUDE_HAIKU), 30);
        assert!(client.is_available());
        assert_eq!(client.model(), CLAUDE_HAIKU);
    }
}
