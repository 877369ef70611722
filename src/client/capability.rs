//! Model capability resolution.
//!
//! Epistemic foundation:
//! - K_i: Reasoning models reject sampling parameters and take an alternate
//!   token-limit parameter
//! - B_i: The model id prefix identifies the model class (unknown ids are
//!   assumed standard)
//!
//! Callers never set parameters unconditionally: every effective-parameter
//! getter answers `NotApplicable` when the model class forbids it.

/// Class of a model with respect to call parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Reasoning,
    Standard,
}

/// Wire protocol used to reach a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Message-style generation (`/chat/completions`)
    Messages,
    /// Single-shot generation (`/responses`)
    SingleShot,
}

/// Effective value of a call parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelParam<T> {
    Value(T),
    /// The parameter must not be sent to this model
    NotApplicable,
}

impl<T> ModelParam<T> {
    pub fn value(self) -> Option<T> {
        match self {
            ModelParam::Value(v) => Some(v),
            ModelParam::NotApplicable => None,
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, ModelParam::Value(_))
    }
}

/// Temperature used when a standard model has no override.
pub const DEFAULT_TEMPERATURE: f64 = 0.3;

/// Output budget used when a standard model has no override.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Output budget (including hidden reasoning) for reasoning models.
pub const DEFAULT_MAX_COMPLETION_TOKENS: u32 = 16_000;

/// Effort hint used when a reasoning model has no override.
pub const DEFAULT_EFFORT: &str = "medium";

// Checked first: these are more specific than the reasoning prefixes
// (e.g. "gpt-5-chat" vs "gpt-5").
const STANDARD_PREFIXES: &[&str] = &[
    "gpt-5-chat",
    "gpt-4o",
    "gpt-4.1",
    "gpt-4",
    "gpt-3.5",
    "chatgpt-",
    "deepseek-chat",
    "claude-",
    "llama",
    "mistral",
    "gemini",
    "qwen",
];

const REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5", "deepseek-reasoner", "deepseek-r1"];

/// Resolved capabilities of one model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub class: ModelClass,
}

impl ModelCapabilities {
    /// Classify a model identifier.
    ///
    /// Provider-qualified ids (`openai/o3-mini`) are classified by their last
    /// path segment.
    pub fn resolve(model: &str) -> Self {
        let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();

        let class = if STANDARD_PREFIXES.iter().any(|p| name.starts_with(p)) {
            ModelClass::Standard
        } else if REASONING_PREFIXES.iter().any(|p| name.starts_with(p)) {
            ModelClass::Reasoning
        } else {
            ModelClass::Standard
        };

        Self { class }
    }

    pub fn is_reasoning(&self) -> bool {
        self.class == ModelClass::Reasoning
    }

    pub fn supports_temperature(&self) -> bool {
        !self.is_reasoning()
    }

    /// Whether the classic `max_tokens` parameter is legal.
    pub fn supports_max_tokens(&self) -> bool {
        !self.is_reasoning()
    }

    /// Whether the model takes an effort hint.
    pub fn supports_effort(&self) -> bool {
        self.is_reasoning()
    }

    pub fn protocol(&self) -> Protocol {
        match self.class {
            ModelClass::Reasoning => Protocol::SingleShot,
            ModelClass::Standard => Protocol::Messages,
        }
    }

    pub fn effective_temperature(&self, requested: Option<f64>) -> ModelParam<f64> {
        if self.supports_temperature() {
            ModelParam::Value(requested.unwrap_or(DEFAULT_TEMPERATURE))
        } else {
            ModelParam::NotApplicable
        }
    }

    pub fn effective_max_tokens(&self, requested: Option<u32>) -> ModelParam<u32> {
        if self.supports_max_tokens() {
            ModelParam::Value(requested.unwrap_or(DEFAULT_MAX_TOKENS))
        } else {
            ModelParam::NotApplicable
        }
    }

    /// The alternate token-limit parameter reasoning models require.
    pub fn effective_max_completion_tokens(&self, requested: Option<u32>) -> ModelParam<u32> {
        if self.is_reasoning() {
            ModelParam::Value(requested.unwrap_or(DEFAULT_MAX_COMPLETION_TOKENS))
        } else {
            ModelParam::NotApplicable
        }
    }

    pub fn effective_effort(&self, requested: Option<&str>) -> ModelParam<String> {
        if self.supports_effort() {
            ModelParam::Value(requested.unwrap_or(DEFAULT_EFFORT).to_string())
        } else {
            ModelParam::NotApplicable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_prefixes_win_over_reasoning() {
        assert_eq!(
            ModelCapabilities::resolve("gpt-5-chat-latest").class,
            ModelClass::Standard
        );
        assert_eq!(ModelCapabilities::resolve("gpt-5-mini").class, ModelClass::Reasoning);
        assert_eq!(ModelCapabilities::resolve("gpt-4o-mini").class, ModelClass::Standard);
    }

    #[test]
    fn test_reasoning_models() {
        for model in ["o1", "o3-mini", "o4-mini", "openai/o3", "DeepSeek-R1"] {
            let caps = ModelCapabilities::resolve(model);
            assert!(caps.is_reasoning(), "{model} should be reasoning");
            assert_eq!(caps.protocol(), Protocol::SingleShot);
        }
    }

    #[test]
    fn test_unknown_defaults_to_standard() {
        let caps = ModelCapabilities::resolve("my-finetune-v2");
        assert_eq!(caps.class, ModelClass::Standard);
        assert_eq!(caps.protocol(), Protocol::Messages);
    }

    #[test]
    fn test_reasoning_params_not_applicable() {
        let caps = ModelCapabilities::resolve("o3-mini");
        assert_eq!(caps.effective_temperature(Some(0.9)), ModelParam::NotApplicable);
        assert_eq!(caps.effective_max_tokens(Some(100)), ModelParam::NotApplicable);
        assert_eq!(
            caps.effective_max_completion_tokens(None),
            ModelParam::Value(DEFAULT_MAX_COMPLETION_TOKENS)
        );
        assert_eq!(
            caps.effective_effort(Some("high")),
            ModelParam::Value("high".to_string())
        );
    }

    #[test]
    fn test_standard_params_use_override_or_default() {
        let caps = ModelCapabilities::resolve("gpt-4o");
        assert_eq!(caps.effective_temperature(Some(0.7)), ModelParam::Value(0.7));
        assert_eq!(
            caps.effective_temperature(None),
            ModelParam::Value(DEFAULT_TEMPERATURE)
        );
        assert_eq!(
            caps.effective_max_tokens(None),
            ModelParam::Value(DEFAULT_MAX_TOKENS)
        );
        assert_eq!(
            caps.effective_max_completion_tokens(Some(10)),
            ModelParam::NotApplicable
        );
        assert_eq!(caps.effective_effort(Some("high")), ModelParam::NotApplicable);
    }
}
