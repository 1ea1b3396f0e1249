//! Configuration types for an OCR pipeline run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The optional second stage is described by an
//! [`AnalysisConfig`]; when it is `None` the run stops after persistence.
//!
//! The choices an operator used to make interactively ("upload a new file or
//! reuse a saved signed URL?") are plain fields here: [`ReferenceStrategy`],
//! `prior_url`, and `fallback_to_upload`.

use crate::error::OcrPipelineError;
use crate::progress::ProgressCallback;
use crate::transport::TrustPolicy;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default OCR provider base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Default OCR model identifier.
pub const DEFAULT_OCR_MODEL: &str = "mistral-ocr-latest";

/// Default chat-completion base URL for the analysis stage.
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default chat model for the analysis stage.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use mistral_ocr_pipeline::{PipelineConfig, ReferenceStrategy};
///
/// let config = PipelineConfig::builder()
///     .api_key("sk-test")
///     .strategy(ReferenceStrategy::Inline)
///     .output_dir("out")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Bearer token for the OCR provider. Required by the upload and OCR calls.
    pub api_key: Option<String>,

    /// OCR provider base URL, without trailing slash. Default: [`DEFAULT_API_BASE_URL`].
    pub api_base_url: String,

    /// OCR model identifier. Default: [`DEFAULT_OCR_MODEL`].
    pub ocr_model: String,

    /// Ask the provider to embed extracted images as base64. Default: true.
    pub include_image_base64: bool,

    /// Timeout for the OCR call. Default: 2 minutes.
    ///
    /// The only timeout in the system: uploads, signed-URL fetches and the
    /// chat call run without one.
    pub ocr_timeout: Duration,

    /// How the PDF is turned into a document reference. Default: [`ReferenceStrategy::Upload`].
    pub strategy: ReferenceStrategy,

    /// Previously obtained signed URL, used by [`ReferenceStrategy::Reuse`].
    pub prior_url: Option<String>,

    /// When `Reuse` has no usable URL, upload instead of failing. Default: true.
    pub fallback_to_upload: bool,

    /// Lifetime requested for signed URLs, in hours. Default: 24.
    pub signed_url_expiry_hours: u32,

    /// Largest PDF the inline strategy will encode. Default: 50 MiB.
    pub max_inline_bytes: usize,

    /// Directory receiving every artifact. Default: `output`.
    pub output_dir: PathBuf,

    /// Decode embedded page images into `<output_dir>/images/`. Default: false.
    pub save_images: bool,

    /// Certificate trust applied to every outbound HTTPS call.
    pub trust: TrustPolicy,

    /// Optional second stage. `None` stops the run after persistence.
    pub analysis: Option<AnalysisConfig>,

    /// Receives stage transitions as the run progresses.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ocr_model: DEFAULT_OCR_MODEL.to_string(),
            include_image_base64: true,
            ocr_timeout: Duration::from_secs(120),
            strategy: ReferenceStrategy::default(),
            prior_url: None,
            fallback_to_upload: true,
            signed_url_expiry_hours: 24,
            max_inline_bytes: 50 * 1024 * 1024,
            output_dir: PathBuf::from("output"),
            save_images: false,
            trust: TrustPolicy::default(),
            analysis: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("ocr_model", &self.ocr_model)
            .field("include_image_base64", &self.include_image_base64)
            .field("ocr_timeout", &self.ocr_timeout)
            .field("strategy", &self.strategy)
            .field("prior_url", &self.prior_url.as_ref().map(|_| "<set>"))
            .field("fallback_to_upload", &self.fallback_to_upload)
            .field("signed_url_expiry_hours", &self.signed_url_expiry_hours)
            .field("max_inline_bytes", &self.max_inline_bytes)
            .field("output_dir", &self.output_dir)
            .field("save_images", &self.save_images)
            .field("trust", &self.trust)
            .field("analysis", &self.analysis)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Path of the raw OCR JSON artifact.
    pub fn ocr_json_path(&self) -> PathBuf {
        self.output_dir.join(crate::pipeline::persist::OCR_JSON_FILE)
    }

    /// The OCR API key, or a configuration error naming the variable to set.
    pub(crate) fn require_api_key(&self) -> Result<&str, OcrPipelineError> {
        match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => Ok(k),
            _ => Err(OcrPipelineError::Configuration(
                "MISTRAL_API_KEY is not set.\nSet it with: export MISTRAL_API_KEY=your_api_key_here"
                    .into(),
            )),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn ocr_model(mut self, model: impl Into<String>) -> Self {
        self.config.ocr_model = model.into();
        self
    }

    pub fn include_image_base64(mut self, v: bool) -> Self {
        self.config.include_image_base64 = v;
        self
    }

    pub fn ocr_timeout(mut self, timeout: Duration) -> Self {
        self.config.ocr_timeout = timeout;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout = Duration::from_secs(secs);
        self
    }

    pub fn strategy(mut self, strategy: ReferenceStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn prior_url(mut self, url: impl Into<String>) -> Self {
        self.config.prior_url = Some(url.into());
        self
    }

    pub fn fallback_to_upload(mut self, v: bool) -> Self {
        self.config.fallback_to_upload = v;
        self
    }

    pub fn signed_url_expiry_hours(mut self, hours: u32) -> Self {
        self.config.signed_url_expiry_hours = hours;
        self
    }

    pub fn max_inline_bytes(mut self, n: usize) -> Self {
        self.config.max_inline_bytes = n;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn save_images(mut self, v: bool) -> Self {
        self.config.save_images = v;
        self
    }

    pub fn trust(mut self, policy: TrustPolicy) -> Self {
        self.config.trust = policy;
        self
    }

    pub fn analysis(mut self, analysis: AnalysisConfig) -> Self {
        self.config.analysis = Some(analysis);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrPipelineError> {
        let c = &self.config;
        if !(c.api_base_url.starts_with("http://") || c.api_base_url.starts_with("https://")) {
            return Err(OcrPipelineError::Configuration(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        if c.ocr_timeout.is_zero() {
            return Err(OcrPipelineError::Configuration(
                "OCR timeout must be greater than zero".into(),
            ));
        }
        if c.signed_url_expiry_hours == 0 {
            return Err(OcrPipelineError::Configuration(
                "Signed URL expiry must be at least 1 hour".into(),
            ));
        }
        let has_prior = c.prior_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        if c.strategy == ReferenceStrategy::Reuse && !has_prior && !c.fallback_to_upload {
            return Err(OcrPipelineError::Configuration(
                "Reuse strategy needs a signed URL (or enable fallback to upload)".into(),
            ));
        }
        if let Some(ref a) = c.analysis {
            if a.model.trim().is_empty() {
                return Err(OcrPipelineError::Configuration(
                    "Analysis model must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Analysis stage ───────────────────────────────────────────────────────

/// Settings for the optional chat-completion stage.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Where chat requests are sent.
    pub backend: ChatBackend,

    /// Chat model identifier. Default: [`DEFAULT_CHAT_MODEL`].
    pub model: String,

    /// Sample output document that shapes the model's response.
    pub template_path: PathBuf,

    /// Sampling temperature. `None` leaves the provider default.
    pub temperature: Option<f32>,

    /// Output token cap. `None` leaves the provider default.
    pub max_tokens: Option<usize>,

    /// Remove an outer ```` ```json ```` fence from the reply before saving. Default: true.
    pub strip_code_fences: bool,
}

impl AnalysisConfig {
    /// Analysis against an OpenAI-compatible endpoint with the default model.
    pub fn new(backend: ChatBackend, template_path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            model: DEFAULT_CHAT_MODEL.to_string(),
            template_path: template_path.into(),
            temperature: None,
            max_tokens: None,
            strip_code_fences: true,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t.clamp(0.0, 2.0));
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn with_strip_code_fences(mut self, v: bool) -> Self {
        self.strip_code_fences = v;
        self
    }
}

/// The chat-completion endpoint used by the analysis stage.
#[derive(Clone)]
pub enum ChatBackend {
    /// Any OpenAI-compatible `/chat/completions` endpoint at a custom base URL.
    /// No `Authorization` header is sent when `api_key` is `None`.
    Compatible {
        base_url: String,
        api_key: Option<String>,
    },
    /// A pre-constructed edgequake-llm provider.
    Provider(Arc<dyn LLMProvider>),
}

impl ChatBackend {
    /// OpenAI-compatible backend, trailing slash removed from `base_url`.
    pub fn compatible(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        ChatBackend::Compatible {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

impl fmt::Debug for ChatBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatBackend::Compatible { base_url, api_key } => f
                .debug_struct("Compatible")
                .field("base_url", base_url)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
            ChatBackend::Provider(_) => f
                .debug_tuple("Provider")
                .field(&"<dyn LLMProvider>")
                .finish(),
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the local PDF is made reachable by the OCR provider.
///
/// | Strategy | Network | Trade-off |
/// |----------|---------|-----------|
/// | `Upload` | upload + signed-URL fetch | Works for any size; URL reusable for `expiry` hours |
/// | `Inline` | none | Whole file base64-encoded into the request body |
/// | `Reuse`  | none | Needs a signed URL from an earlier `Upload` run |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceStrategy {
    /// Upload the bytes, then request a time-limited signed URL. (default)
    #[default]
    Upload,
    /// Embed the bytes as a `data:application/pdf;base64,` URL.
    Inline,
    /// Pass a previously obtained signed URL through unchanged.
    Reuse,
}

impl fmt::Display for ReferenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceStrategy::Upload => f.write_str("upload"),
            ReferenceStrategy::Inline => f.write_str("inline"),
            ReferenceStrategy::Reuse => f.write_str("reuse"),
        }
    }
}
