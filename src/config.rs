//! Configuration types for exam-question extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`] or loaded from a TOML file with
//! [`ExtractionConfig::from_toml`]. Runtime hooks (transport, progress
//! callback, cancel flag) live on the same struct but are never serialised.

use crate::cancel::CancelFlag;
use crate::error::HarvestError;
use crate::pipeline::llm::CompletionTransport;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Environment variable consulted for the extraction endpoint when the
/// config carries none.
pub const ENV_API_URL: &str = "EXAM_HARVEST_API_URL";

/// Environment variable consulted for the bearer credential.
pub const ENV_API_KEY: &str = "EXAM_HARVEST_API_KEY";

/// Configuration for one extraction run.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use exam_harvest::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .window_size(2000)
///     .overlap(300)
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.window_size, 2000);
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Window length in characters. Default: 3000.
    ///
    /// Large enough to hold several complete questions with their options,
    /// small enough that the model's answer fits in `max_tokens`.
    pub window_size: usize,

    /// Characters shared by consecutive windows. Default: 500.
    ///
    /// Must be at least as long as the longest question you expect to be cut
    /// by a window boundary; otherwise that question is never seen whole.
    pub overlap: usize,

    /// Model identifier sent in the request body. Default: "gemini-2.0-flash-exp".
    pub model: String,

    /// Sampling temperature for the first attempt. Default: 0.3.
    pub temperature: f32,

    /// Temperature for retries and the retry sweep. Default: 0.2.
    ///
    /// Retries use `min(temperature, retry_temperature)` so a retry is never
    /// less deterministic than the attempt it replaces.
    pub retry_temperature: f32,

    /// Maximum tokens the model may generate per window. Default: 4000.
    pub max_tokens: usize,

    /// Retries after the first attempt. Default: 3 (four attempts total).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds. Default: 1000.
    ///
    /// Doubles after each attempt: 1 s → 2 s → 4 s.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 100.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Extraction endpoint URL. Falls back to `EXAM_HARVEST_API_URL`.
    pub api_url: Option<String>,

    /// Bearer credential. Falls back to `EXAM_HARVEST_API_KEY`.
    /// Never written out by [`ExtractionConfig::to_toml`].
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// How duplicate candidates are recognised. Default: [`IdentityStrategy::Numbering`].
    pub identity_strategy: IdentityStrategy,

    /// What happens to the later copy of a duplicate. Default: [`MergePolicy::FirstWins`].
    pub merge_policy: MergePolicy,

    /// Keep content-less records that carry an answer and an id. Default: false.
    pub keep_answer_only: bool,

    /// Run text normalisation before windowing. Default: true.
    pub normalize_text: bool,

    /// Re-run failed or empty windows after the primary pass. Default: true.
    pub retry_sweep: bool,

    /// Instruction prompt override. If None, uses [`crate::prompts::DEFAULT_EXTRACTION_PROMPT`].
    pub prompt: Option<String>,

    /// PDF user password for encrypted documents.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Pre-built transport. Takes precedence over `api_url`/`api_key`.
    #[serde(skip)]
    pub transport: Option<Arc<dyn CompletionTransport>>,

    /// Optional per-window progress callback.
    #[serde(skip)]
    pub progress_callback: Option<ProgressCallback>,

    /// Cooperative cancellation, checked before every window call.
    #[serde(skip)]
    pub cancel_flag: CancelFlag,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            window_size: 3000,
            overlap: 500,
            model: "gemini-2.0-flash-exp".to_string(),
            temperature: 0.3,
            retry_temperature: 0.2,
            max_tokens: 4000,
            max_retries: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 100,
            download_timeout_secs: 120,
            api_url: None,
            api_key: None,
            identity_strategy: IdentityStrategy::default(),
            merge_policy: MergePolicy::default(),
            keep_answer_only: false,
            normalize_text: true,
            retry_sweep: true,
            prompt: None,
            password: None,
            transport: None,
            progress_callback: None,
            cancel_flag: CancelFlag::default(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("window_size", &self.window_size)
            .field("overlap", &self.overlap)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("retry_temperature", &self.retry_temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("identity_strategy", &self.identity_strategy)
            .field("merge_policy", &self.merge_policy)
            .field("keep_answer_only", &self.keep_answer_only)
            .field("normalize_text", &self.normalize_text)
            .field("retry_sweep", &self.retry_sweep)
            .field(
                "transport",
                &self.transport.as_ref().map(|_| "<dyn CompletionTransport>"),
            )
            .field("cancelled", &self.cancel_flag.is_cancelled())
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml(s: &str) -> Result<Self, HarvestError> {
        let config: Self = toml::from_str(s)
            .map_err(|e| HarvestError::InvalidConfig(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialise the tunable part of the config. Secrets are omitted.
    pub fn to_toml(&self) -> Result<String, HarvestError> {
        toml::to_string_pretty(self)
            .map_err(|e| HarvestError::InvalidConfig(format!("TOML serialise error: {e}")))
    }

    /// Check the cross-field constraints.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.overlap == 0 {
            return Err(HarvestError::InvalidConfig("overlap must be ≥ 1".into()));
        }
        if self.window_size <= self.overlap {
            return Err(HarvestError::InvalidConfig(format!(
                "window_size ({}) must be greater than overlap ({})",
                self.window_size, self.overlap
            )));
        }
        for (name, t) in [
            ("temperature", self.temperature),
            ("retry_temperature", self.retry_temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                return Err(HarvestError::InvalidConfig(format!(
                    "{name} must be 0.0–2.0, got {t}"
                )));
            }
        }
        if self.max_tokens == 0 {
            return Err(HarvestError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if self.api_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ExtractionConfig`].
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl fmt::Debug for ExtractionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ExtractionConfigBuilder {
    /// Start from an existing config (e.g. one loaded from TOML).
    pub fn from_config(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn window_size(mut self, chars: usize) -> Self {
        self.config.window_size = chars.max(2);
        self
    }

    pub fn overlap(mut self, chars: usize) -> Self {
        self.config.overlap = chars.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn retry_temperature(mut self, t: f32) -> Self {
        self.config.retry_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn identity_strategy(mut self, strategy: IdentityStrategy) -> Self {
        self.config.identity_strategy = strategy;
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.config.merge_policy = policy;
        self
    }

    pub fn keep_answer_only(mut self, v: bool) -> Self {
        self.config.keep_answer_only = v;
        self
    }

    pub fn normalize_text(mut self, v: bool) -> Self {
        self.config.normalize_text = v;
        self
    }

    pub fn retry_sweep(mut self, v: bool) -> Self {
        self.config.retry_sweep = v;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.config.cancel_flag = flag;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, HarvestError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How a candidate's identity signature is derived.
///
/// | Strategy | Signature |
/// |----------|-----------|
/// | `Numbering` | numbering prefix, else `ID…`, else first 10 chars (default) |
/// | `ContentType` | full content + type |
/// | `ContentTypeOption` | full content + type + first option |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Layered numbering → id → content-prefix → random rule. (default)
    #[default]
    Numbering,
    /// Content and type together.
    ContentType,
    /// Content, type and the first option.
    ContentTypeOption,
}

/// What the reconciler does with the later copy of a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Drop the later copy entirely. (default)
    #[default]
    FirstWins,
    /// Keep the first copy but fill its empty fields from later copies.
    FillMissing,
}
