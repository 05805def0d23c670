//! Structured extraction: turn document text or page images into the
//! model's JSON answer.
//!
//! This module owns everything between "we have text" and "we have an
//! untyped JSON object": locating the nutrition table excerpt, assembling the
//! prompt, calling the provider with retry, and recovering JSON from chatty
//! responses. Prompt wording lives in [`crate::prompts`].
//!
//! ## Retry Strategy
//!
//! Provider errors (HTTP 429 / 503, timeouts) are retried with exponential
//! backoff (`retry_backoff_ms * 2^(attempt-1)`). A response that arrives but
//! holds no JSON object is *not* retried: the model answered, and asking
//! again at temperature 0.1 rarely changes the answer.

use crate::config::{AnalysisConfig, ExtractionVocabulary};
use crate::error::NutritionError;
use crate::output::RawExtraction;
use crate::pipeline::encode::encode_page;
use crate::pipeline::language::language_name;
use crate::prompts::{build_text_prompt, DEFAULT_SYSTEM_PROMPT, VISION_INSTRUCTIONS};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Most page images sent in one vision request.
pub const MAX_VISION_IMAGES: usize = 3;

/// Characters kept before a fallback marker such as "Energy".
const FALLBACK_LEAD_CHARS: usize = 50;

static RE_OUTER_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// What the text path knows about the document.
#[derive(Debug, Clone)]
pub struct TextAnalysisRequest {
    /// Cleaned document text.
    pub text: String,
    /// Two-letter language code.
    pub language: String,
    pub page_count: usize,
    pub ocr_used: bool,
}

/// The outbound AI seam: text path and image path.
#[async_trait]
pub trait StructuredAnalyzer: Send + Sync {
    async fn analyze_text(&self, request: &TextAnalysisRequest) -> Result<RawExtraction, NutritionError>;

    /// At most [`MAX_VISION_IMAGES`] pages are considered.
    async fn analyze_images(&self, pages: &[DynamicImage]) -> Result<RawExtraction, NutritionError>;
}

/// [`StructuredAnalyzer`] over any `edgequake-llm` provider.
pub struct LlmStructuredClient {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    vocabulary: ExtractionVocabulary,
    excerpt_chars: usize,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout: Duration,
}

impl LlmStructuredClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            vocabulary: config.vocabulary.clone(),
            excerpt_chars: config.excerpt_chars,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        }
    }

    /// Call the provider with retry, returning the raw response text.
    async fn complete(&self, messages: &[ChatMessage], label: &str) -> Result<String, NutritionError> {
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(self.api_timeout, self.provider.chat(messages, Some(&self.options))).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        label,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    let err_msg = format!("no response within {}s", self.api_timeout.as_secs());
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(NutritionError::LlmApiError {
            message: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

#[async_trait]
impl StructuredAnalyzer for LlmStructuredClient {
    async fn analyze_text(&self, request: &TextAnalysisRequest) -> Result<RawExtraction, NutritionError> {
        let excerpt = locate_excerpt(&request.text, &self.vocabulary, self.excerpt_chars);
        match &excerpt {
            Some(e) => debug!("Nutrition excerpt located ({} chars)", e.chars().count()),
            None => debug!("No nutrition marker found; sending full text only"),
        }

        let user = build_text_prompt(
            &request.text,
            excerpt,
            language_name(&request.language),
            request.page_count,
            request.ocr_used,
        );
        let messages = vec![ChatMessage::system(&self.system_prompt), ChatMessage::user(&user)];

        let content = self.complete(&messages, "text analysis").await?;
        let parsed = parse_structured_response(&content)?;
        info!(fields = parsed.fields().len(), "Text analysis complete");
        Ok(parsed)
    }

    async fn analyze_images(&self, pages: &[DynamicImage]) -> Result<RawExtraction, NutritionError> {
        if pages.is_empty() {
            return Err(NutritionError::Internal("no page images to analyse".into()));
        }

        let images = pages
            .iter()
            .take(MAX_VISION_IMAGES)
            .map(encode_page)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| NutritionError::Internal(format!("Failed to encode page image: {e}")))?;
        let count = images.len();

        let messages = vec![
            ChatMessage::system(&self.system_prompt),
            ChatMessage::user_with_images(VISION_INSTRUCTIONS, images),
        ];

        let content = self.complete(&messages, "vision analysis").await?;
        let parsed = parse_structured_response(&content)?;
        info!(pages = count, "Vision analysis complete");
        Ok(parsed)
    }
}

/// Build `CompletionOptions` from the analysis config.
fn build_options(config: &AnalysisConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

/// Slice of `text` most likely to hold the nutrition table.
///
/// Section markers are tried in order; the excerpt starts at the first hit
/// and runs for `len` characters. Failing that, fallback markers ("Energy")
/// yield a window from a few characters before the hit. Matching ignores case.
pub fn locate_excerpt<'a>(text: &'a str, vocabulary: &ExtractionVocabulary, len: usize) -> Option<&'a str> {
    for marker in &vocabulary.section_markers {
        if let Some(start) = find_ignore_case(text, marker) {
            return Some(slice_chars(text, start, len));
        }
    }

    for marker in &vocabulary.fallback_markers {
        if let Some(hit) = find_ignore_case(text, marker) {
            let start = text[..hit]
                .char_indices()
                .rev()
                .take(FALLBACK_LEAD_CHARS)
                .last()
                .map_or(hit, |(i, _)| i);
            let end = char_offset(text, hit, len.saturating_sub(FALLBACK_LEAD_CHARS));
            return Some(&text[start..end]);
        }
    }

    None
}

fn find_ignore_case(text: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()?
        .find(text)
        .map(|m| m.start())
}

/// Byte offset `n` characters after `from`, clamped to the end.
fn char_offset(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| from + i)
}

fn slice_chars(text: &str, start: usize, n: usize) -> &str {
    &text[start..char_offset(text, start, n)]
}

/// Recover a JSON object from a model response.
///
/// Strips a Markdown code fence, then parses. If that fails, the outermost
/// `{…}` span is parsed instead.
pub fn parse_structured_response(content: &str) -> Result<RawExtraction, NutritionError> {
    let body = strip_code_fence(content);

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return RawExtraction::from_value(value).ok_or_else(|| NutritionError::AiResponse {
            detail: "response is JSON but not an object".to_string(),
        });
    }

    RE_OUTER_OBJECT
        .find(body)
        .and_then(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .and_then(RawExtraction::from_value)
        .ok_or_else(|| NutritionError::AiResponse {
            detail: format!("unparseable response: {}", preview(body)),
        })
}

fn strip_code_fence(content: &str) -> &str {
    let s = content.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```JSON"))
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

fn preview(s: &str) -> String {
    let head: String = s.chars().take(120).collect();
    if head.len() < s.len() {
        format!("{head}…")
    } else {
        head
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

/// Default model when only a provider name is given.
fn default_model(provider_name: &str) -> &'static str {
    match provider_name {
        "gemini" => "gemini-2.0-flash",
        _ => "gpt-4.1-nano",
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, NutritionError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        NutritionError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`, `config.model`).
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **Gemini** when `GEMINI_API_KEY` is set (default `gemini-2.0-flash`).
/// 5. **Auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, NutritionError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or_else(|| default_model(name));
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("GEMINI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or("gemini-2.0-flash");
        return create_provider("gemini", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| NutritionError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set GEMINI_API_KEY, OPENAI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> ExtractionVocabulary {
        ExtractionVocabulary::default()
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&AnalysisConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(2048));
    }

    #[test]
    fn excerpt_starts_at_section_marker() {
        let text = format!("{}Tápérték adatok 100 g: Energia 1520 kJ{}", "x".repeat(500), "y".repeat(800));
        let ex = locate_excerpt(&text, &vocab(), 400).unwrap();
        assert!(ex.starts_with("Tápérték adatok"));
        assert_eq!(ex.chars().count(), 400);
    }

    #[test]
    fn excerpt_marker_is_case_insensitive() {
        let text = "intro NUTRITION FACTS fat 3 g";
        let ex = locate_excerpt(text, &vocab(), 400).unwrap();
        assert_eq!(ex, "NUTRITION FACTS fat 3 g");
    }

    #[test]
    fn fallback_marker_includes_leading_context() {
        let text = format!("{}per 100g Energie 1520 kJ{}", "a".repeat(100), "b".repeat(600));
        let ex = locate_excerpt(&text, &vocab(), 400).unwrap();
        let hit = ex.find("Energie").unwrap();
        assert_eq!(ex[..hit].chars().count(), 50);
        assert_eq!(ex[hit..].chars().count(), 350);
    }

    #[test]
    fn no_marker_no_excerpt() {
        assert_eq!(locate_excerpt("ingredients: flour, sugar", &vocab(), 400), None);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = parse_structured_response("```json\n{\"nutrition\": {}}\n```").unwrap();
        assert!(raw.nutrition().is_some());
    }

    #[test]
    fn recovers_object_from_chatter() {
        let raw = parse_structured_response(
            "Sure! Here is the data: {\"nutrition\": {\"fat\": {\"per_100g\": \"3\"}}} Hope it helps.",
        )
        .unwrap();
        assert!(raw.nutrition().unwrap().contains_key("fat"));
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            parse_structured_response("[1, 2, 3]"),
            Err(NutritionError::AiResponse { .. })
        ));
        assert!(matches!(
            parse_structured_response("I could not read the document."),
            Err(NutritionError::AiResponse { .. })
        ));
    }

    #[test]
    fn default_models() {
        assert_eq!(default_model("gemini"), "gemini-2.0-flash");
        assert_eq!(default_model("openai"), "gpt-4.1-nano");
    }
}
