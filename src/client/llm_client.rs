//! Uniform model client interface and the shared HTTP transport.
//!
//! Epistemic foundation:
//! - K_i: Both wire protocols are served by OpenAI-compatible endpoints
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → one attempt here, retries are
//!   decided per document by the pipeline

use crate::models::{ApiError, RankError, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// One generation request, independent of wire protocol.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub model: String,
    /// System / instruction text
    pub system: String,
    /// User prompt
    pub prompt: String,
    /// Requested temperature (dropped for reasoning models)
    pub temperature: Option<f64>,
    /// Requested output budget
    pub max_output_tokens: Option<u32>,
    /// Effort hint (reasoning models only)
    pub reasoning_effort: Option<String>,
    /// Ask the endpoint for a JSON object response when supported
    pub json_output: bool,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            prompt: prompt.into(),
            json_output: true,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn with_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }
}

/// Response from a generation request.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Generated text
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Request duration
    pub duration: Duration,
}

/// Uniform interface over the message-style and single-shot protocols.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run one generation call.
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse>;

    /// Probe the service before a run.
    async fn health_check(&self) -> HealthCheckResult;
}

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Endpoint name
    pub endpoint: String,
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(endpoint: impl Into<String>, latency_ms: Option<u64>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: HealthStatus::Healthy,
            latency_ms,
            error: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Convert an unhealthy result into the fatal run error.
    pub fn into_result(self) -> Result<Self> {
        if self.is_healthy() {
            Ok(self)
        } else {
            Err(RankError::ServiceUnavailable {
                endpoint: self.endpoint.clone(),
                reason: format!(
                    "{} ({})",
                    self.status,
                    self.error.as_deref().unwrap_or("no details")
                ),
            })
        }
    }
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Endpoint is responding normally
    Healthy,
    /// Endpoint is responding but with errors
    Unhealthy,
    /// Endpoint is not reachable
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP plumbing shared by both protocol adapters.
pub struct HttpTransport {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    base_url: String,
    /// Custom headers to include in requests
    custom_headers: HashMap<String, String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport.
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RankError::Network)?;

        Ok(Self {
            client,
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            custom_headers,
            timeout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, value) in &self.custom_headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        headers
    }

    /// POST a JSON body and decode a JSON response. Exactly one attempt.
    pub async fn post_json<B, R>(&self, path: &str, body: &B, model: &str) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RankError::Timeout(self.timeout)
                } else {
                    RankError::Network(e)
                }
            })?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);

            debug!(endpoint = %self.name, model, status, "Model call rejected");

            let error = match status {
                401 => ApiError::AuthenticationFailed,
                404 => ApiError::ModelNotFound(model.to_string()),
                429 => ApiError::RateLimited(message),
                _ => ApiError::Status { status, message },
            };
            return Err(RankError::Api(error));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| RankError::Parse(format!("Failed to parse response body: {e}")))
    }

    /// Health check: ping the /models endpoint.
    ///
    /// K_i: endpoint is reachable and responding
    /// B_i: endpoint is healthy if /models returns 200
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let url = format!("{}/models", self.base_url);

        match self
            .client
            .get(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                if response.status().is_success() {
                    HealthCheckResult::healthy(self.name.clone(), Some(latency_ms))
                } else {
                    HealthCheckResult {
                        endpoint: self.name.clone(),
                        status: HealthStatus::Unhealthy,
                        latency_ms: Some(latency_ms),
                        error: Some(format!("HTTP {}", response.status().as_u16())),
                    }
                }
            }
            Err(e) => HealthCheckResult {
                endpoint: self.name.clone(),
                status: HealthStatus::Unreachable,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}
