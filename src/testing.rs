//! Scripted model client for unit tests.

use crate::client::{HealthCheckResult, HealthStatus, ModelClient, ModelRequest, ModelResponse};
use crate::models::{ApiError, RankError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    /// Transport-level failure (HTTP 500)
    Fail,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }
}

type Handler = Box<dyn Fn(&ModelRequest) -> Reply + Send + Sync>;

/// Model client answering from a queue or a closure over the request.
pub struct ScriptedClient {
    queue: Mutex<VecDeque<Reply>>,
    handler: Option<Handler>,
    usage: (u32, u32),
    delay: Option<Duration>,
    healthy: bool,
    requests: Mutex<Vec<ModelRequest>>,
    call_count: AtomicUsize,
}

impl ScriptedClient {
    fn empty() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            handler: None,
            usage: (100, 50),
            delay: None,
            healthy: true,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Reply with each text in turn, then fail.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_script(replies.into_iter().map(Reply::text))
    }

    pub fn with_script(replies: impl IntoIterator<Item = Reply>) -> Self {
        let client = Self::empty();
        client
            .queue
            .lock()
            .unwrap()
            .extend(replies);
        client
    }

    /// Compute every reply from the request.
    pub fn from_fn(f: impl Fn(&ModelRequest) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            handler: Some(Box::new(f)),
            ..Self::empty()
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = (input_tokens, output_tokens);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = match &self.handler {
            Some(handler) => handler(request),
            None => self.queue.lock().unwrap().pop_front().unwrap_or(Reply::Fail),
        };

        match reply {
            Reply::Text(content) => Ok(ModelResponse {
                content,
                model: request.model.clone(),
                input_tokens: self.usage.0,
                output_tokens: self.usage.1,
                duration: self.delay.unwrap_or_default(),
            }),
            Reply::Fail => Err(RankError::Api(ApiError::Status {
                status: 500,
                message: "scripted failure".to_string(),
            })),
        }
    }

    async fn health_check(&self) -> HealthCheckResult {
        if self.healthy {
            HealthCheckResult::healthy("scripted", Some(1))
        } else {
            HealthCheckResult {
                endpoint: "scripted".to_string(),
                status: HealthStatus::Unreachable,
                latency_ms: None,
                error: Some("connection refused".to_string()),
            }
        }
    }
}
