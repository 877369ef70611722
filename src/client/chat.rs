//! Message-style protocol adapter (`/chat/completions`).

use crate::client::{
    HealthCheckResult, HttpTransport, ModelCapabilities, ModelClient, ModelRequest, ModelResponse,
};
use crate::models::{RankError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Adapter for message-style generation.
pub struct ChatAdapter {
    transport: Arc<HttpTransport>,
}

impl ChatAdapter {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }

    fn build_request(request: &ModelRequest) -> ChatCompletionRequest {
        let caps = ModelCapabilities::resolve(&request.model);

        let mut messages = Vec::with_capacity(2);
        if !request.system.is_empty() {
            messages.push(Message::system(&request.system));
        }
        messages.push(Message::user(&request.prompt));

        ChatCompletionRequest {
            model: request.model.clone(),
            messages,
            max_tokens: caps.effective_max_tokens(request.max_output_tokens).value(),
            max_completion_tokens: caps
                .effective_max_completion_tokens(request.max_output_tokens)
                .value(),
            temperature: caps.effective_temperature(request.temperature).value(),
            reasoning_effort: caps
                .effective_effort(request.reasoning_effort.as_deref())
                .value(),
            response_format: (request.json_output && !caps.is_reasoning())
                .then_some(ResponseFormat { kind: "json_object" }),
        }
    }
}

#[async_trait]
impl ModelClient for ChatAdapter {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let start = Instant::now();
        let payload = Self::build_request(request);

        let body: ChatCompletionResponse = self
            .transport
            .post_json("chat/completions", &payload, &request.model)
            .await?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RankError::Parse("No choices in response".to_string()))?;

        let usage = body.usage.unwrap_or_default();

        Ok(ModelResponse {
            content,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            duration: start.elapsed(),
        })
    }

    async fn health_check(&self) -> HealthCheckResult {
        self.transport.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_standard_model_payload() {
        let request = ModelRequest::new("gpt-4o-mini", "sys", "hello")
            .with_temperature(Some(0.2))
            .with_max_output_tokens(Some(500));
        let payload = serde_json::to_value(ChatAdapter::build_request(&request)).unwrap();

        assert_eq!(payload["max_tokens"], 500);
        assert_eq!(payload["temperature"], 0.2);
        assert!(payload.get("max_completion_tokens").is_none());
        assert!(payload.get("reasoning_effort").is_none());
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(payload["messages"][0]["role"], "system");
    }

    #[test]
    fn test_reasoning_model_payload_drops_sampling_params() {
        let request = ModelRequest::new("o3-mini", "sys", "hello")
            .with_temperature(Some(0.2))
            .with_max_output_tokens(Some(500));
        let payload = serde_json::to_value(ChatAdapter::build_request(&request)).unwrap();

        assert!(payload.get("temperature").is_none());
        assert!(payload.get("max_tokens").is_none());
        assert_eq!(payload["max_completion_tokens"], 500);
        assert_eq!(payload["reasoning_effort"], "medium");
    }

    #[tokio::test]
    async fn test_generate_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o-2024-08-06",
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\": true}"}}],
                "usage": {"prompt_tokens": 120, "completion_tokens": 30, "total_tokens": 150}
            })))
            .mount(&server)
            .await;

        let transport =
            Arc::new(HttpTransport::new("test", None, server.uri(), HashMap::new(), 5).unwrap());
        let adapter = ChatAdapter::new(transport);
        let response = adapter
            .generate(&ModelRequest::new("gpt-4o", "sys", "prompt"))
            .await
            .unwrap();

        assert_eq!(response.content, "{\"ok\": true}");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.input_tokens, 120);
        assert_eq!(response.output_tokens, 30);
    }

    #[tokio::test]
    async fn test_generate_without_choices_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let transport =
            Arc::new(HttpTransport::new("test", None, server.uri(), HashMap::new(), 5).unwrap());
        let err = ChatAdapter::new(transport)
            .generate(&ModelRequest::new("gpt-4o", "", "prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Parse(_)));
    }
}
