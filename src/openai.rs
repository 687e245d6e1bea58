use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::reasoning::{ChatMessage, ReasoningError, ReasoningRequest, ReasoningService};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    arguments: String,
}

pub struct OpenAIClient {
    client: Client,
    api_key: Option<String>,
    model: String,
}

impl OpenAIClient {
    pub fn new(api_key: Option<&str>, model: Option<&str>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            api_key: api_key.map(|k| k.to_string()),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

/// Prompt in OpenAI form: the system prompt becomes the leading message.
fn build_messages(request: &ReasoningRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    messages.extend(request.messages.iter().cloned());
    messages
}

impl ResponseMessage {
    fn into_completion(self) -> Option<String> {
        if let Some(call) = self.tool_calls.into_iter().next() {
            return Some(call.function.arguments);
        }
        self.content
    }
}

#[async_trait]
impl ReasoningService for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let api_key = self.api_key.as_deref().ok_or(ReasoningError::Unconfigured)?;

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat { format_type: "json_object" },
        };

        let response = self.client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
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
            return Err(ReasoningError::Http { status, message: error_text });
        }

        let completion: ChatCompletionResponse = response.json().await?;

        completion.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.into_completion())
            .ok_or(ReasoningError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_prepends_system() {
        let request = ReasoningRequest::new("You plan days.", "Plan Monday".to_string());
        let messages = build_messages(&request);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, "You plan days.");
        assert_eq!(messages[1].role, "user");
    }

    #[test]
    fn test_function_call_arguments_preferred() {
        let message: ResponseMessage = serde_json::from_str(
            r#"{"content": null, "tool_calls": [{"function": {"name": "plan", "arguments": "{\"blocks\":[]}"}}]}"#,
        )
        .unwrap();
        assert_eq!(message.into_completion().as_deref(), Some("{\"blocks\":[]}"));

        let message: ResponseMessage = serde_json::from_str(r#"{"content": "{}"}"#).unwrap();
        assert_eq!(message.into_completion().as_deref(), Some("{}"));
    }
}
