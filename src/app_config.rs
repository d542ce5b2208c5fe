/*!
 * Application configuration.
 *
 * Loading, validating and saving the pipeline settings: languages, model
 * names, chunking, concurrency caps per model tier, retry policy, batch
 * editing and quality-control criteria.
 */

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::glossary::GlossaryItem;
use crate::pipeline::concurrency::TierLimits;
use crate::pipeline::retry::RetryPolicy;

/// Pipeline configuration, stored as JSON
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO), or "auto" to let the transcriber decide
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Target language code (ISO)
    #[serde(default = "default_target_language")]
    pub target_language: String,

    /// Model selection
    #[serde(default)]
    pub models: ModelConfig,

    /// Generation pipeline settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Batch edit settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Quality-control settings
    #[serde(default)]
    pub quality: QualityControlConfig,

    /// Provider retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Model names per role
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelConfig {
    /// Transcription engine model id
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    /// Fast-tier generative model
    #[serde(default = "default_fast_model")]
    pub fast_model: String,

    /// High-quality-tier generative model
    #[serde(default = "default_pro_model")]
    pub pro_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            transcription_model: default_transcription_model(),
            fast_model: default_fast_model(),
            pro_model: default_pro_model(),
        }
    }
}

/// Settings for the generation pipeline
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Nominal chunk length in seconds
    #[serde(default = "default_chunk_duration_secs")]
    pub chunk_duration_secs: f64,

    /// Move chunk boundaries into nearby silences
    #[serde(default = "default_true")]
    pub smart_split: bool,

    /// Concurrent requests for the fast model tier
    #[serde(default = "default_fast_concurrency")]
    pub fast_concurrency: usize,

    /// Concurrent requests for the high-quality model tier
    #[serde(default = "default_pro_concurrency")]
    pub pro_concurrency: usize,

    /// Segments per translation request
    #[serde(default = "default_translation_batch_size")]
    pub translation_batch_size: usize,

    /// Concurrent translation requests within a chunk (defaults to the fast tier cap)
    #[serde(default)]
    pub translation_concurrency: Option<usize>,

    /// Extract a glossary before translating
    #[serde(default = "default_true")]
    pub enable_glossary: bool,

    /// Number of chunks sampled for glossary extraction (0 = all)
    #[serde(default)]
    pub glossary_sample_size: usize,

    /// User glossary merged over extracted terms
    #[serde(default)]
    pub glossary: Vec<GlossaryItem>,

    /// Content genre hint (e.g. "anime", "documentary")
    #[serde(default)]
    pub genre: Option<String>,

    /// Extra instructions for the refinement pass
    #[serde(default)]
    pub custom_refinement_prompt: Option<String>,

    /// Extra instructions for the translation pass
    #[serde(default)]
    pub custom_translation_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: default_chunk_duration_secs(),
            smart_split: true,
            fast_concurrency: default_fast_concurrency(),
            pro_concurrency: default_pro_concurrency(),
            translation_batch_size: default_translation_batch_size(),
            translation_concurrency: None,
            enable_glossary: true,
            glossary_sample_size: 0,
            glossary: Vec::new(),
            genre: None,
            custom_refinement_prompt: None,
            custom_translation_prompt: None,
        }
    }
}

impl GenerationConfig {
    /// Per-tier concurrency caps
    pub fn tier_limits(&self) -> TierLimits {
        TierLimits { fast: self.fast_concurrency, high_quality: self.pro_concurrency }
    }

    /// Effective translation concurrency, never below 1
    pub fn effective_translation_concurrency(&self) -> usize {
        self.translation_concurrency.unwrap_or(self.fast_concurrency).max(1)
    }
}

/// Settings for post-hoc batch edits
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchConfig {
    /// Subtitles per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Audio context added on both sides of a request, in seconds
    #[serde(default = "default_context_padding_secs")]
    pub context_padding_secs: f64,

    /// Extra instructions for every batch request
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            context_padding_secs: default_context_padding_secs(),
            custom_prompt: None,
        }
    }
}

/// Acceptance thresholds for a quality-control round
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct AcceptanceCriteria {
    /// Maximum unresolved high-severity issues
    #[serde(default)]
    pub max_high_severity: usize,

    /// Maximum medium/low issues per minute of audio
    #[serde(default = "default_max_issues_per_minute")]
    pub max_issues_per_minute: f64,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self { max_high_severity: 0, max_issues_per_minute: default_max_issues_per_minute() }
    }
}

/// Quality-control configuration supplied per run
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QualityControlConfig {
    /// Model for the review stage (empty = high-quality tier model)
    #[serde(default)]
    pub review_model: String,

    /// Model for the fix stage (empty = high-quality tier model)
    #[serde(default)]
    pub fix_model: String,

    /// Model for the validate stage (empty = high-quality tier model)
    #[serde(default)]
    pub validate_model: String,

    /// Maximum Review -> Fix -> Validate rounds
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Acceptance thresholds
    #[serde(default)]
    pub acceptance: AcceptanceCriteria,

    /// Run the AI semantic consistency pass during review
    #[serde(default = "default_true")]
    pub semantic_consistency: bool,

    /// Audio context added around the reviewed range, in seconds
    #[serde(default = "default_context_padding_secs")]
    pub context_padding_secs: f64,
}

impl Default for QualityControlConfig {
    fn default() -> Self {
        Self {
            review_model: String::new(),
            fix_model: String::new(),
            validate_model: String::new(),
            max_iterations: default_max_iterations(),
            acceptance: AcceptanceCriteria::default(),
            semantic_consistency: true,
            context_padding_secs: default_context_padding_secs(),
        }
    }
}

impl QualityControlConfig {
    /// Resolve per-stage model names against a fallback
    pub fn with_fallback_model(mut self, fallback: &str) -> Self {
        for model in [&mut self.review_model, &mut self.fix_model, &mut self.validate_model] {
            if model.trim().is_empty() {
                *model = fallback.to_string();
            }
        }
        self
    }
}

/// Retry schedule for provider calls
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    /// Attempts including the first call
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum random jitter in milliseconds
    #[serde(default = "default_retry_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_jitter_ms: default_retry_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// Build the runtime policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a `log` filter
    pub fn to_level_filter(&self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

fn default_source_language() -> String {
    "auto".to_string()
}

fn default_target_language() -> String {
    "zh".to_string()
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}

fn default_fast_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_pro_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_chunk_duration_secs() -> f64 {
    300.0
}

fn default_fast_concurrency() -> usize {
    5
}

fn default_pro_concurrency() -> usize {
    2
}

fn default_translation_batch_size() -> usize {
    20
}

fn default_batch_size() -> usize {
    20
}

fn default_context_padding_secs() -> f64 {
    5.0
}

fn default_max_iterations() -> usize {
    2
}

fn default_max_issues_per_minute() -> f64 {
    1.0
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000 // doubled on each retry
}

fn default_retry_jitter_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load a configuration file (JSON)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.source_language != "auto" {
            crate::language_utils::validate_language_code(&self.source_language)?;
        }
        crate::language_utils::validate_language_code(&self.target_language)?;

        if !(self.generation.chunk_duration_secs > 0.0) {
            return Err(anyhow!("chunk_duration_secs must be positive"));
        }
        if self.generation.fast_concurrency == 0 || self.generation.pro_concurrency == 0 {
            return Err(anyhow!("Concurrency limits must be at least 1"));
        }
        if self.generation.translation_batch_size == 0 || self.batch.batch_size == 0 {
            return Err(anyhow!("Batch sizes must be at least 1"));
        }
        if self.quality.max_iterations == 0 {
            return Err(anyhow!("quality.max_iterations must be at least 1"));
        }
        if self.batch.context_padding_secs < 0.0 || self.quality.context_padding_secs < 0.0 {
            return Err(anyhow!("Context padding cannot be negative"));
        }

        Ok(())
    }

    /// Quality-control configuration with stage models resolved
    pub fn quality_control(&self) -> QualityControlConfig {
        self.quality.clone().with_fallback_model(&self.models.pro_model)
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            target_language: default_target_language(),
            models: ModelConfig::default(),
            generation: GenerationConfig::default(),
            batch: BatchConfig::default(),
            quality: QualityControlConfig::default(),
            retry: RetryConfig::default(),
            log_level: LogLevel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_shouldValidate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.tier_limits(), TierLimits { fast: 5, high_quality: 2 });
        assert_eq!(config.generation.effective_translation_concurrency(), 5);
    }

    #[test]
    fn test_config_fromPartialJson_shouldFillDefaults() {
        let config: Config = serde_json::from_str(r#"{"target_language": "fr", "generation": {"chunk_duration_secs": 120}}"#).unwrap();

        assert_eq!(config.target_language, "fr");
        assert_eq!(config.generation.chunk_duration_secs, 120.0);
        assert!(config.generation.smart_split);
        assert_eq!(config.quality.max_iterations, 2);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn test_config_validate_shouldRejectZeroConcurrency() {
        let mut config = Config::default();
        config.generation.fast_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_qualityControl_shouldFallBackToProModel() {
        let mut config = Config::default();
        config.quality.fix_model = "custom".into();
        let qc = config.quality_control();
        assert_eq!(qc.review_model, config.models.pro_model);
        assert_eq!(qc.fix_model, "custom");
    }
}
