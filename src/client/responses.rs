//! Single-shot protocol adapter (`/responses`).
//!
//! Reasoning models are reached through this protocol: one instruction
//! string, one input string, and an output budget that covers hidden
//! reasoning tokens.

use crate::client::{
    HealthCheckResult, HttpTransport, ModelCapabilities, ModelClient, ModelRequest, ModelResponse,
};
use crate::models::{RankError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize)]
struct ReasoningOptions {
    effort: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningOptions>,
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
    /// Convenience field some servers populate directly
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl ResponsesBody {
    /// Concatenate every `output_text` part of every message item.
    fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text.as_deref())
            .collect();

        if !parts.is_empty() {
            return Some(parts.join(""));
        }
        self.output_text.clone().filter(|t| !t.is_empty())
    }
}

/// Adapter for single-shot generation.
pub struct ResponsesAdapter {
    transport: Arc<HttpTransport>,
}

impl ResponsesAdapter {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self { transport }
    }

    fn build_request(request: &ModelRequest) -> ResponsesRequest {
        let caps = ModelCapabilities::resolve(&request.model);

        let max_output_tokens = caps
            .effective_max_completion_tokens(request.max_output_tokens)
            .value()
            .or_else(|| caps.effective_max_tokens(request.max_output_tokens).value());

        ResponsesRequest {
            model: request.model.clone(),
            instructions: (!request.system.is_empty()).then(|| request.system.clone()),
            input: request.prompt.clone(),
            max_output_tokens,
            temperature: caps.effective_temperature(request.temperature).value(),
            reasoning: caps
                .effective_effort(request.reasoning_effort.as_deref())
                .value()
                .map(|effort| ReasoningOptions { effort }),
        }
    }
}

#[async_trait]
impl ModelClient for ResponsesAdapter {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let start = Instant::now();
        let payload = Self::build_request(request);

        let body: ResponsesBody = self
            .transport
            .post_json("responses", &payload, &request.model)
            .await?;

        let content = body
            .text()
            .ok_or_else(|| RankError::Parse("No output text in response".to_string()))?;
        let usage = body.usage.unwrap_or_default();

        Ok(ModelResponse {
            content,
            model: body.model.unwrap_or_else(|| request.model.clone()),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
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
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_reasoning_payload() {
        let request = ModelRequest::new("o3", "be strict", "score this")
            .with_temperature(Some(0.5))
            .with_effort(Some("high".to_string()));
        let payload = serde_json::to_value(ResponsesAdapter::build_request(&request)).unwrap();

        assert_eq!(payload["instructions"], "be strict");
        assert_eq!(payload["input"], "score this");
        assert_eq!(payload["reasoning"]["effort"], "high");
        assert!(payload.get("temperature").is_none());
        assert_eq!(payload["max_output_tokens"], 16_000);
    }

    #[tokio::test]
    async fn test_generate_skips_reasoning_items() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/responses"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "o3-2025-04-16",
                "output": [
                    {"type": "reasoning", "content": []},
                    {"type": "message", "content": [
                        {"type": "output_text", "text": "{\"results\": "},
                        {"type": "output_text", "text": "[]}"}
                    ]}
                ],
                "usage": {"input_tokens": 900, "output_tokens": 2100}
            })))
            .mount(&server)
            .await;

        let transport =
            Arc::new(HttpTransport::new("test", None, server.uri(), HashMap::new(), 5).unwrap());
        let response = ResponsesAdapter::new(transport)
            .generate(&ModelRequest::new("o3", "", "prompt"))
            .await
            .unwrap();

        assert_eq!(response.content, "{\"results\": []}");
        assert_eq!(response.input_tokens, 900);
        assert_eq!(response.output_tokens, 2100);
    }

    #[tokio::test]
    async fn test_generate_empty_output_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": [{"type": "reasoning", "content": []}]
            })))
            .mount(&server)
            .await;

        let transport =
            Arc::new(HttpTransport::new("test", None, server.uri(), HashMap::new(), 5).unwrap());
        let err = ResponsesAdapter::new(transport)
            .generate(&ModelRequest::new("o4-mini", "", "prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, RankError::Parse(_)));
    }
}
