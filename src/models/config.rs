//! Configuration models for rankwise.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The operator resolves these unknowns at runtime via config file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// Top-level configuration for rankwise.
///
/// I^R resolved: every knob of the evaluation pipeline is explicit and
/// has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model endpoint (OpenAI-compatible)
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Stage 1: cheap batched relevance triage
    #[serde(default)]
    pub relevance: RelevanceConfig,

    /// Stage 2: quality evaluation
    #[serde(default)]
    pub quality: QualityConfig,

    /// Multi-judge settings (used when `quality.mode = "ensemble"`)
    #[serde(default)]
    pub ensemble: EnsembleConfig,

    /// Token-rate overrides for cost estimation
    #[serde(default)]
    pub pricing: Vec<PricingOverride>,
}

/// Model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// API key (may contain ${ENV_VAR} placeholders)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is not set
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Transport-level request timeout in seconds
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_endpoint_timeout() -> u64 {
    180
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_endpoint_timeout(),
            headers: HashMap::new(),
        }
    }
}

/// Named relevance cutoff for Stage 1 (0-10 scale).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdPreset {
    /// Keep almost everything that mentions the topic
    Lenient,
    /// Default cutoff
    #[default]
    Balanced,
    /// Only clearly on-topic articles survive
    Strict,
    /// Explicit numeric cutoff
    Custom(f64),
}

impl ThresholdPreset {
    /// Numeric cutoff on the 0-10 Stage 1 scale.
    pub fn value(&self) -> f64 {
        match self {
            Self::Lenient => 2.0,
            Self::Balanced => 3.0,
            Self::Strict => 5.0,
            Self::Custom(v) => *v,
        }
    }
}

/// Stage 1 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// Cheap model used for triage
    #[serde(default = "default_relevance_model")]
    pub model: String,

    /// Documents per request
    #[serde(default = "default_relevance_batch")]
    pub batch_size: usize,

    /// Named cutoff
    #[serde(default)]
    pub threshold: ThresholdPreset,

    /// Score assigned when a document fails open
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,

    /// Output budget per batch request
    #[serde(default = "default_relevance_max_output")]
    pub max_output_tokens: u32,
}

fn default_relevance_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_relevance_batch() -> usize {
    10
}

fn default_neutral_score() -> f64 {
    5.0
}

fn default_relevance_max_output() -> u32 {
    2000
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            model: default_relevance_model(),
            batch_size: default_relevance_batch(),
            threshold: ThresholdPreset::default(),
            neutral_score: default_neutral_score(),
            max_output_tokens: default_relevance_max_output(),
        }
    }
}

/// Stage 2 strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// One model scores batches of documents
    #[default]
    Unified,
    /// N judges per document, reconciled by a meta-judge
    Ensemble,
}

/// What to persist for documents that stay unscored after all retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscoredPolicy {
    /// Leave quality fields empty
    #[default]
    LeaveBlank,
    /// Write midpoint axis scores and compute a total
    Neutral,
}

/// Stage 2 configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Unified model or judge ensemble
    #[serde(default)]
    pub mode: QualityMode,

    /// Model used by the unified strategy
    #[serde(default = "default_quality_model")]
    pub model: String,

    /// Documents per request (unified strategy)
    #[serde(default = "default_quality_batch")]
    pub batch_size: usize,

    /// Individual attempts per document after a batch miss
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Pause between batches (pacing only)
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Run batches/documents concurrently instead of sequentially
    #[serde(default)]
    pub fast: bool,

    /// Maximum concurrent calls in fast mode
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Stage 2 relevance (0-20) below which a document is excluded
    #[serde(default = "default_exclusion_threshold")]
    pub exclusion_threshold: f64,

    /// Language of generated summaries
    #[serde(default = "default_summary_language")]
    pub summary_language: String,

    /// Persistence policy for unscored documents
    #[serde(default)]
    pub unscored: UnscoredPolicy,

    /// Timeout of a single model call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Sampling temperature (ignored for reasoning models)
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Output budget per call
    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    /// Effort hint (reasoning models only)
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

fn default_quality_model() -> String {
    "gpt-4o".to_string()
}

fn default_quality_batch() -> usize {
    5
}

fn default_retry_budget() -> u32 {
    2
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_exclusion_threshold() -> f64 {
    8.0
}

fn default_summary_language() -> String {
    "English".to_string()
}

fn default_call_timeout() -> u64 {
    120
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mode: QualityMode::default(),
            model: default_quality_model(),
            batch_size: default_quality_batch(),
            retry_budget: default_retry_budget(),
            batch_delay_ms: default_batch_delay_ms(),
            fast: false,
            max_concurrency: default_max_concurrency(),
            exclusion_threshold: default_exclusion_threshold(),
            summary_language: default_summary_language(),
            unscored: UnscoredPolicy::default(),
            call_timeout_secs: default_call_timeout(),
            temperature: None,
            max_output_tokens: None,
            reasoning_effort: None,
        }
    }
}

/// Evaluation focus of a judge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Specialty {
    #[default]
    General,
    Technical,
    Reasoning,
}

impl std::fmt::Display for Specialty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Specialty::General => write!(f, "general"),
            Specialty::Technical => write!(f, "technical"),
            Specialty::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// One judge of the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    /// Stable identifier
    pub id: String,

    /// Human-readable label
    #[serde(default)]
    pub name: Option<String>,

    /// Model identifier
    pub model: String,

    /// Aggregation weight (> 0)
    #[serde(default = "default_judge_weight")]
    pub weight: f64,

    /// Prompt variant
    #[serde(default)]
    pub specialty: Specialty,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time box for this judge's call
    #[serde(default = "default_judge_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_judge_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_judge_timeout() -> u64 {
    60
}

impl JudgeConfig {
    /// Label used in prompts and logs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Arbitration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaJudgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Arbitration model
    #[serde(default = "default_quality_model")]
    pub model: String,

    /// Per-axis delta above which two judges contradict each other
    #[serde(default = "default_contradiction_threshold")]
    pub contradiction_threshold: f64,

    #[serde(default = "default_meta_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_contradiction_threshold() -> f64 {
    5.0
}

fn default_meta_timeout() -> u64 {
    90
}

impl Default for MetaJudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_quality_model(),
            contradiction_threshold: default_contradiction_threshold(),
            timeout_secs: default_meta_timeout(),
            max_output_tokens: None,
        }
    }
}

/// Ensemble judging configuration.
///
/// Epistemic foundation:
/// - B_i(single judge) → B_i(HIGH) via reconciliation of several judges
/// - I_i(judge bias) → K_i(disagreement) via explicit contradictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    #[serde(default)]
    pub judges: Vec<JudgeConfig>,

    /// Concurrent judge calls per document
    #[serde(default = "default_max_parallel_judges")]
    pub max_parallel_judges: usize,

    /// Confidence below which a result is flagged as low consensus
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    #[serde(default)]
    pub meta_judge: MetaJudgeConfig,
}

fn default_max_parallel_judges() -> usize {
    3
}

fn default_consensus_threshold() -> f64 {
    0.6
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            judges: Vec::new(),
            max_parallel_judges: default_max_parallel_judges(),
            consensus_threshold: default_consensus_threshold(),
            meta_judge: MetaJudgeConfig::default(),
        }
    }
}

impl EnsembleConfig {
    /// Judges that take part in evaluation.
    pub fn enabled_judges(&self) -> Vec<JudgeConfig> {
        self.judges.iter().filter(|j| j.enabled).cloned().collect()
    }
}

/// Token-rate override for models whose id starts with `prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingOverride {
    pub prefix: String,
    pub input_price_per_1m: f64,
    pub output_price_per_1m: f64,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.endpoint.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.endpoint.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            env_var: self.endpoint.api_key_env.clone(),
        })
    }

    /// Check semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relevance.batch_size == 0 {
            return Err(ConfigError::Invalid("relevance.batch_size must be > 0".into()));
        }
        if self.quality.batch_size == 0 {
            return Err(ConfigError::Invalid("quality.batch_size must be > 0".into()));
        }
        let cutoff = self.relevance.threshold.value();
        if !(0.0..=10.0).contains(&cutoff) {
            return Err(ConfigError::Invalid(format!(
                "relevance.threshold {cutoff} is outside 0-10"
            )));
        }
        if !(0.0..=20.0).contains(&self.quality.exclusion_threshold) {
            return Err(ConfigError::Invalid(format!(
                "quality.exclusion_threshold {} is outside 0-20",
                self.quality.exclusion_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.ensemble.consensus_threshold) {
            return Err(ConfigError::Invalid(
                "ensemble.consensus_threshold must be within 0-1".into(),
            ));
        }
        let timeouts = [
            ("endpoint.timeout_secs", self.endpoint.timeout_secs),
            ("quality.call_timeout_secs", self.quality.call_timeout_secs),
            (
                "ensemble.meta_judge.timeout_secs",
                self.ensemble.meta_judge.timeout_secs,
            ),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be > 0")));
        }
        for judge in &self.ensemble.judges {
            if !(judge.weight.is_finite() && judge.weight > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "judge '{}' has invalid weight {}",
                    judge.id, judge.weight
                )));
            }
            if judge.timeout_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "judge '{}' timeout_secs must be > 0",
                    judge.id
                )));
            }
        }
        if self.quality.mode == QualityMode::Ensemble && self.ensemble.enabled_judges().is_empty()
        {
            return Err(ConfigError::Invalid(
                "ensemble mode requires at least one enabled judge".into(),
            ));
        }
        Ok(())
    }
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: set {env_var} env var or endpoint.api_key in config")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.relevance.batch_size, 10);
        assert_eq!(config.relevance.threshold, ThresholdPreset::Balanced);
        assert_eq!(config.quality.mode, QualityMode::Unified);
        assert_eq!(config.quality.retry_budget, 2);
        assert!(config.ensemble.meta_judge.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_presets() {
        assert_eq!(ThresholdPreset::Lenient.value(), 2.0);
        assert_eq!(ThresholdPreset::Balanced.value(), 3.0);
        assert_eq!(ThresholdPreset::Strict.value(), 5.0);

        let config: Config = toml::from_str(
            r#"
[relevance]
threshold = { custom = 4.5 }
"#,
        )
        .unwrap();
        assert_eq!(config.relevance.threshold.value(), 4.5);
    }

    #[test]
    fn test_parse_ensemble_judges() {
        let config: Config = toml::from_str(
            r#"
[quality]
mode = "ensemble"

[ensemble]
max_parallel_judges = 2

[[ensemble.judges]]
id = "generalist"
model = "gpt-4o"
weight = 1.5

[[ensemble.judges]]
id = "engineer"
name = "Engineer"
model = "o3-mini"
specialty = "technical"
timeout_secs = 30

[[ensemble.judges]]
id = "retired"
model = "gpt-3.5-turbo"
enabled = false

[ensemble.meta_judge]
model = "o3"
contradiction_threshold = 6.0
"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        let judges = config.ensemble.enabled_judges();
        assert_eq!(judges.len(), 2);
        assert_eq!(judges[0].display_name(), "generalist");
        assert_eq!(judges[1].display_name(), "Engineer");
        assert_eq!(judges[1].specialty, Specialty::Technical);
        assert_eq!(judges[1].timeout_secs, 30);
        assert_eq!(config.ensemble.meta_judge.contradiction_threshold, 6.0);
    }

    #[test]
    fn test_validate_rejects_ensemble_without_judges() {
        let config: Config = toml::from_str("[quality]\nmode = \"ensemble\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_zero_weight() {
        let config: Config = toml::from_str(
            r#"
[[ensemble.judges]]
id = "a"
model = "gpt-4o"
weight = 0.0
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_nan_weight_and_zero_timeouts() {
        let judged = || -> Config {
            toml::from_str(
                r#"
[[ensemble.judges]]
id = "a"
model = "gpt-4o"
"#,
            )
            .unwrap()
        };
        assert!(judged().validate().is_ok());

        let mut config = judged();
        config.ensemble.judges[0].weight = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = judged();
        config.ensemble.judges[0].timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = judged();
        config.endpoint.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = judged();
        config.quality.call_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown_placeholders() {
        assert_eq!(
            expand_env_vars("Bearer ${RANKWISE_SURELY_UNSET_VAR}"),
            "Bearer ${RANKWISE_SURELY_UNSET_VAR}"
        );
    }
}
