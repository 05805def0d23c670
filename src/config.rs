//! Configuration types for nutrition/allergen analysis.
//!
//! All pipeline behaviour is controlled through [`AnalysisConfig`], built via
//! its [`AnalysisConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share a config across requests and to log it alongside a run.
//!
//! Word lists the pipeline matches against (nutrition section markers, OCR
//! confusion tokens) live in [`ExtractionVocabulary`] and are injected into
//! the components that use them rather than hard-coded at call sites.

use crate::error::NutritionError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for analysing one food-product PDF.
///
/// Built via [`AnalysisConfig::builder()`] or using [`AnalysisConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_nutrition::AnalysisConfig;
///
/// let config = AnalysisConfig::builder()
///     .dpi(300)
///     .request_timeout_secs(90)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct AnalysisConfig {
    /// Rendering DPI for the OCR stage and visual escalation. Range: 72–600. Default: 300.
    ///
    /// Tesseract accuracy drops sharply below ~250 DPI on the small print
    /// used for nutrition tables.
    pub dpi: u32,

    /// Minimum characters a stage must return to be accepted. Default: 100.
    pub min_viable_chars: usize,

    /// Tesseract language string. Default: `hun+eng+deu+fra`.
    ///
    /// All languages are loaded at once so recognition does not depend on
    /// language detection, which only runs once text exists.
    pub ocr_languages: String,

    /// Directory holding `*.traineddata`. `None` uses Tesseract's default lookup.
    pub tessdata_dir: Option<PathBuf>,

    /// Maximum pages sent to the vision model on escalation. Default: 3.
    pub max_vision_pages: usize,

    /// Length of the nutrition-table excerpt, in characters. Default: 400.
    pub excerpt_chars: usize,

    /// End-to-end budget for one request, in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Per-LLM-call timeout in seconds. Default: 45.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Largest accepted upload, in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// LLM model identifier, e.g. "gemini-2.0-flash", "gpt-4.1-mini".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Extraction wants the model to copy numbers, not invent them.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 2048.
    pub max_tokens: usize,

    /// Retries on a failed LLM call. Default: 2.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses the built-in extraction prompt.
    pub system_prompt: Option<String>,

    /// Marker and confusion word lists.
    pub vocabulary: ExtractionVocabulary,

    /// Receives state transitions and stage attempts.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            min_viable_chars: 100,
            ocr_languages: "hun+eng+deu+fra".to_string(),
            tessdata_dir: None,
            max_vision_pages: 3,
            excerpt_chars: 400,
            request_timeout_secs: 60,
            api_timeout_secs: 45,
            download_timeout_secs: 120,
            max_upload_bytes: 10 * 1024 * 1024,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 2048,
            max_retries: 2,
            retry_backoff_ms: 500,
            password: None,
            system_prompt: None,
            vocabulary: ExtractionVocabulary::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("dpi", &self.dpi)
            .field("min_viable_chars", &self.min_viable_chars)
            .field("ocr_languages", &self.ocr_languages)
            .field("tessdata_dir", &self.tessdata_dir)
            .field("max_vision_pages", &self.max_vision_pages)
            .field("excerpt_chars", &self.excerpt_chars)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("vocabulary", &self.vocabulary)
            .finish()
    }
}

impl AnalysisConfig {
    /// Create a new builder for `AnalysisConfig`.
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn min_viable_chars(mut self, n: usize) -> Self {
        self.config.min_viable_chars = n;
        self
    }

    pub fn ocr_languages(mut self, langs: impl Into<String>) -> Self {
        self.config.ocr_languages = langs.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn max_vision_pages(mut self, n: usize) -> Self {
        self.config.max_vision_pages = n.clamp(1, 3);
        self
    }

    pub fn excerpt_chars(mut self, n: usize) -> Self {
        self.config.excerpt_chars = n.max(50);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
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

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
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

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn vocabulary(mut self, vocabulary: ExtractionVocabulary) -> Self {
        self.config.vocabulary = vocabulary;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<AnalysisConfig, NutritionError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(NutritionError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.request_timeout_secs == 0 {
            return Err(NutritionError::InvalidConfig(
                "Request timeout must be ≥ 1s".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(NutritionError::InvalidConfig(
                "Upload limit must be > 0 bytes".into(),
            ));
        }
        if c.ocr_languages.trim().is_empty() {
            return Err(NutritionError::InvalidConfig(
                "OCR language list is empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Vocabulary ───────────────────────────────────────────────────────────

/// Word lists the pipeline matches against.
///
/// The OCR confusion list is a heuristic: tokens Tesseract tends to emit in
/// place of digits on small nutrition-table print (`LL` for `1.1`, `II` for
/// `11`, `Sig` for `5 g`). Tune it per deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionVocabulary {
    /// Nutrition-table headers, in priority order. The excerpt starts at the marker.
    pub section_markers: Vec<String>,
    /// Row labels used when no header is found; the excerpt is centred on them.
    pub fallback_markers: Vec<String>,
    /// Substrings that indicate silent OCR corruption in a model response.
    pub ocr_confusions: Vec<String>,
}

impl Default for ExtractionVocabulary {
    fn default() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            section_markers: owned(&[
                "Nutritional information",
                "Nutrition information",
                "Nutrition facts",
                "Nutrition declaration",
                "Tápérték adatok",
                "Tápérték információ",
                "Átlagos tápérték",
                "Nährwertangaben",
                "Nährwertinformationen",
                "Durchschnittliche Nährwerte",
                "Valeurs nutritionnelles",
                "Déclaration nutritionnelle",
                "Energy/Energia",
            ]),
            fallback_markers: owned(&["Energy", "Energia", "Energie", "Énergie"]),
            ocr_confusions: owned(&["LL", "II", "Sig"]),
        }
    }
}
