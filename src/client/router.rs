//! Protocol routing over one configured endpoint.
//!
//! Epistemic foundation:
//! - K_i: Every model is reachable through exactly one of the two protocols
//! - B_i: Endpoint is reachable (verified via health check)
//! - I^R: User configures base URL, key and extra headers

use crate::client::{
    ChatAdapter, HealthCheckResult, HealthStatus, HttpTransport, ModelCapabilities, ModelClient,
    ModelRequest, ModelResponse, Protocol, ResponsesAdapter,
};
use crate::models::{Config, ConfigError, Result, expand_headers};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Model client that picks the wire protocol per request.
///
/// Both adapters share a single [`HttpTransport`], so connection pooling and
/// headers are common to every call of a run.
///
/// # Example
///
/// ```ignore
/// use rankwise::{Config, RoutedModelClient};
///
/// let config = Config::from_file("rankwise.toml")?;
/// let client = RoutedModelClient::from_config(&config)?;
///
/// client.health_check().await.into_result()?;
/// ```
pub struct RoutedModelClient {
    transport: Arc<HttpTransport>,
    chat: ChatAdapter,
    responses: ResponsesAdapter,
}

impl RoutedModelClient {
    pub fn new(transport: HttpTransport) -> Self {
        let transport = Arc::new(transport);
        Self {
            chat: ChatAdapter::new(Arc::clone(&transport)),
            responses: ResponsesAdapter::new(Arc::clone(&transport)),
            transport,
        }
    }

    /// Build the client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiKey` if no key is configured and the
    /// key environment variable is unset.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        let headers = expand_headers(&config.endpoint.headers);

        let transport = HttpTransport::new(
            "default",
            Some(api_key),
            config.endpoint.base_url.clone(),
            headers,
            config.endpoint.timeout_secs,
        )
        .map_err(|e| ConfigError::Invalid(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::new(transport))
    }

    pub fn endpoint(&self) -> &str {
        self.transport.base_url()
    }

    fn adapter_for(&self, model: &str) -> &dyn ModelClient {
        match ModelCapabilities::resolve(model).protocol() {
            Protocol::Messages => &self.chat,
            Protocol::SingleShot => &self.responses,
        }
    }
}

#[async_trait]
impl ModelClient for RoutedModelClient {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        debug!(
            model = %request.model,
            protocol = ?ModelCapabilities::resolve(&request.model).protocol(),
            "Routing model call"
        );
        self.adapter_for(&request.model).generate(request).await
    }

    async fn health_check(&self) -> HealthCheckResult {
        let result = self.transport.health_check().await;
        let name = self.transport.name();

        match result.status {
            HealthStatus::Healthy => {
                if let Some(latency) = result.latency_ms {
                    info!(endpoint = %name, latency_ms = latency, "Endpoint healthy");
                }
            }
            HealthStatus::Unhealthy => {
                warn!(
                    endpoint = %name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Endpoint unhealthy"
                );
            }
            HealthStatus::Unreachable => {
                warn!(
                    endpoint = %name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Endpoint unreachable"
                );
            }
        }

        result
    }
}
