//! Request orchestration: the pipeline controller and its entry points.
//!
//! A request moves through a fixed sequence of states:
//!
//! ```text
//! Received → Extracted → Cleaned → LanguageDetected → AiAnalyzed → QualityChecked
//!                                                                      │
//!                                              ┌── VisuallyReanalyzed ◀┤ (gate fired)
//!                                              ▼                       │
//!                                          Validated ◀─────────────────┘
//!                                              │
//!                                             Done
//! ```
//!
//! `Failed(kind)` is reachable from every non-terminal state. A failed visual
//! retry is not a failure of the request: the text-path answer is validated
//! instead and the error is kept in [`Diagnostics::vision_error`].
//!
//! The whole request runs under one `tokio::time::timeout`; on expiry the
//! in-flight future is dropped, taking the document and its page images
//! with it, and [`NutritionError::Timeout`] is returned.

use crate::config::AnalysisConfig;
use crate::error::{FailureKind, NutritionError};
use crate::output::{AnalysisReport, Diagnostics, ResultMetadata, ValidatedResult};
use crate::pipeline::cascade::{CascadeOrchestrator, Document};
use crate::pipeline::input::{self, Submission};
use crate::pipeline::llm::{self, LlmStructuredClient, StructuredAnalyzer, TextAnalysisRequest};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::pdf::{PdfEngine, PdfiumEngine};
use crate::pipeline::quality::QualityGate;
use crate::pipeline::validate::ResultValidator;
use crate::pipeline::{language, normalize};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

// ── State machine ────────────────────────────────────────────────────────

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Extracted,
    Cleaned,
    LanguageDetected,
    AiAnalyzed,
    QualityChecked,
    VisuallyReanalyzed,
    Validated,
    Done,
    Failed(FailureKind),
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed(_))
    }

    /// Whether `next` may directly follow `self`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed(_)) => true,
            (Received, Extracted)
            | (Extracted, Cleaned)
            | (Cleaned, LanguageDetected)
            | (LanguageDetected, AiAnalyzed)
            | (AiAnalyzed, QualityChecked)
            | (QualityChecked, VisuallyReanalyzed)
            | (QualityChecked, Validated)
            | (VisuallyReanalyzed, Validated)
            | (Validated, Done) => true,
            _ => false,
        }
    }
}

/// Current state plus the trace of every state visited.
struct StateTracker {
    current: PipelineState,
    trace: Vec<PipelineState>,
    callback: Option<ProgressCallback>,
}

impl StateTracker {
    fn new(callback: Option<ProgressCallback>) -> Self {
        let start = PipelineState::Received;
        if let Some(ref cb) = callback {
            cb.on_state_change(&start);
        }
        Self {
            current: start,
            trace: vec![start],
            callback,
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<(), NutritionError> {
        if !self.current.can_transition_to(next) {
            return Err(NutritionError::Internal(format!(
                "illegal state transition {:?} → {:?}",
                self.current, next
            )));
        }
        debug!(from = ?self.current, to = ?next, "State transition");
        self.current = next;
        self.trace.push(next);
        if let Some(ref cb) = self.callback {
            cb.on_state_change(&next);
        }
        Ok(())
    }

    fn fail(&mut self, kind: FailureKind) {
        if !self.current.is_terminal() {
            // Failed is reachable from every non-terminal state.
            let _ = self.advance(PipelineState::Failed(kind));
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────

/// The pipeline controller. Build once, analyse many documents.
///
/// Engines default to pdfium, Tesseract (with the `tesseract` feature) and
/// the configured LLM provider; each can be replaced through the builder.
pub struct NutritionPipeline {
    config: AnalysisConfig,
    pdf: Arc<dyn PdfEngine>,
    cascade: CascadeOrchestrator,
    analyzer: Arc<dyn StructuredAnalyzer>,
    gate: QualityGate,
    validator: ResultValidator,
}

/// Builder for [`NutritionPipeline`].
pub struct NutritionPipelineBuilder {
    config: AnalysisConfig,
    pdf: Option<Arc<dyn PdfEngine>>,
    ocr: Option<Arc<dyn OcrEngine>>,
    analyzer: Option<Arc<dyn StructuredAnalyzer>>,
}

impl NutritionPipelineBuilder {
    pub fn pdf_engine(mut self, pdf: Arc<dyn PdfEngine>) -> Self {
        self.pdf = Some(pdf);
        self
    }

    pub fn ocr_engine(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn analyzer(mut self, analyzer: Arc<dyn StructuredAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Fill in default engines and assemble the pipeline.
    ///
    /// Fails when pdfium cannot be bound or no LLM provider is configured.
    pub fn build(self) -> Result<NutritionPipeline, NutritionError> {
        let config = self.config;

        let pdf = match self.pdf {
            Some(p) => p,
            None => Arc::new(PdfiumEngine::new(config.password.clone())?),
        };
        let ocr = self.ocr.unwrap_or_else(|| default_ocr_engine(&config));
        let analyzer = match self.analyzer {
            Some(a) => a,
            None => {
                let provider = llm::resolve_provider(&config)?;
                Arc::new(LlmStructuredClient::new(provider, &config))
            }
        };

        let cascade = CascadeOrchestrator::new(
            Arc::clone(&pdf),
            ocr,
            config.min_viable_chars,
            config.dpi,
            config.ocr_languages.clone(),
        );
        let gate = QualityGate::new(config.vocabulary.ocr_confusions.clone());

        Ok(NutritionPipeline {
            config,
            pdf,
            cascade,
            analyzer,
            gate,
            validator: ResultValidator::new(),
        })
    }
}

#[cfg(feature = "tesseract")]
fn default_ocr_engine(config: &AnalysisConfig) -> Arc<dyn OcrEngine> {
    Arc::new(crate::pipeline::ocr::TesseractEngine::new(
        config.tessdata_dir.clone(),
        config.dpi,
    ))
}

#[cfg(not(feature = "tesseract"))]
fn default_ocr_engine(_config: &AnalysisConfig) -> Arc<dyn OcrEngine> {
    warn!("Built without the `tesseract` feature; scanned documents cannot be read");
    Arc::new(crate::pipeline::ocr::UnavailableOcrEngine)
}

impl NutritionPipeline {
    pub fn builder(config: AnalysisConfig) -> NutritionPipelineBuilder {
        NutritionPipelineBuilder {
            config,
            pdf: None,
            ocr: None,
            analyzer: None,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse raw PDF bytes.
    pub async fn analyze(&self, bytes: Vec<u8>) -> Result<ValidatedResult, NutritionError> {
        self.analyze_with_report(bytes).await.map(|r| r.result)
    }

    /// Analyse an upload, checking its declared MIME type too.
    pub async fn analyze_submission(&self, submission: Submission) -> Result<ValidatedResult, NutritionError> {
        self.analyze_submission_with_report(submission)
            .await
            .map(|r| r.result)
    }

    /// Analyse raw PDF bytes and keep the diagnostics.
    pub async fn analyze_with_report(&self, bytes: Vec<u8>) -> Result<AnalysisReport, NutritionError> {
        self.analyze_submission_with_report(Submission::new(bytes, None))
            .await
    }

    pub async fn analyze_submission_with_report(
        &self,
        submission: Submission,
    ) -> Result<AnalysisReport, NutritionError> {
        let start = Instant::now();
        let mut tracker = StateTracker::new(self.config.progress_callback.clone());
        let secs = self.config.request_timeout_secs;

        let outcome = match timeout(Duration::from_secs(secs), self.run(submission, &mut tracker)).await {
            Ok(result) => result,
            Err(_) => Err(NutritionError::Timeout { secs }),
        };

        let finished = outcome.and_then(|mut report| {
            tracker.advance(PipelineState::Done)?;
            report.diagnostics.duration_ms = start.elapsed().as_millis() as u64;
            Ok(report)
        });

        match finished {
            Ok(mut report) => {
                report.diagnostics.states = tracker.trace;
                info!(
                    duration_ms = report.diagnostics.duration_ms,
                    language = %report.result.metadata.language,
                    ocr_used = report.result.metadata.ocr_used,
                    vision_used = report.diagnostics.vision_used,
                    "Analysis complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracker.fail(e.kind());
                warn!(kind = ?e.kind(), "Analysis failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        submission: Submission,
        tracker: &mut StateTracker,
    ) -> Result<AnalysisReport, NutritionError> {
        let cb = self.config.progress_callback.as_ref();

        // ── Step 1: Validate input ───────────────────────────────────────
        input::validate_submission(&submission, self.config.max_upload_bytes)?;

        // ── Step 2: Open document ────────────────────────────────────────
        let mut doc = Document::load(submission.bytes, Arc::clone(&self.pdf)).await?;
        let page_count = doc.page_count();

        // ── Step 3: Extraction cascade ───────────────────────────────────
        let outcome = self.cascade.extract(&mut doc).await?;
        if let Some(cb) = cb {
            outcome.attempts.iter().for_each(|a| cb.on_stage_attempt(a));
        }
        tracker.advance(PipelineState::Extracted)?;

        // ── Step 4: Clean text ───────────────────────────────────────────
        let text = normalize::clean_text(&outcome.text);
        if text.is_empty() {
            return Err(NutritionError::ExtractionFailed {
                stages_tried: outcome
                    .attempts
                    .iter()
                    .map(|a| a.stage.name().to_string())
                    .collect(),
            });
        }
        let char_count = text.chars().count();
        tracker.advance(PipelineState::Cleaned)?;

        // ── Step 5: Detect language ──────────────────────────────────────
        let language = language::detect_language(&text);
        info!(language = %language, chars = char_count, "Text ready for analysis");
        tracker.advance(PipelineState::LanguageDetected)?;

        // ── Step 6: Text-path AI analysis ────────────────────────────────
        let excerpt_found =
            llm::locate_excerpt(&text, &self.config.vocabulary, self.config.excerpt_chars).is_some();
        let request = TextAnalysisRequest {
            text,
            language,
            page_count,
            ocr_used: outcome.provenance.ocr_used,
        };
        let mut raw = self.analyzer.analyze_text(&request).await?;
        tracker.advance(PipelineState::AiAnalyzed)?;

        // ── Step 7: Quality gate ─────────────────────────────────────────
        let escalation = self.gate.evaluate(&raw, &outcome.provenance);
        tracker.advance(PipelineState::QualityChecked)?;

        // ── Step 8: Visual re-analysis (optional) ────────────────────────
        let mut vision_used = false;
        let mut vision_error = None;
        if let Some(reason) = &escalation {
            info!(reason = %reason, "Escalating to visual analysis");
            if let Some(cb) = cb {
                cb.on_escalation(reason);
            }
            match self.visual_reanalysis(&mut doc).await {
                Ok(visual) => {
                    raw = visual;
                    vision_used = true;
                    tracker.advance(PipelineState::VisuallyReanalyzed)?;
                }
                Err(e) => {
                    warn!("Visual analysis failed, keeping text result: {}", e);
                    vision_error = Some(e.to_string());
                }
            }
        }
        drop(doc);

        // ── Step 9: Validate ─────────────────────────────────────────────
        let normalized = self.validator.validate(&raw);
        if !normalized.defaulted_fields.is_empty() {
            debug!(fields = ?normalized.defaulted_fields, "Fields defaulted during validation");
        }
        tracker.advance(PipelineState::Validated)?;

        let result = ValidatedResult {
            nutrition: normalized.nutrition,
            allergens: normalized.allergens,
            metadata: ResultMetadata {
                language: request.language,
                ocr_used: outcome.provenance.ocr_used,
                char_count,
            },
        };
        let diagnostics = Diagnostics {
            page_count,
            attempts: outcome.attempts,
            provenance: Some(outcome.provenance),
            excerpt_found,
            escalation,
            vision_used,
            vision_error,
            defaulted_fields: normalized.defaulted_fields,
            states: Vec::new(),
            duration_ms: 0,
        };

        Ok(AnalysisReport { result, diagnostics })
    }

    async fn visual_reanalysis(&self, doc: &mut Document) -> Result<crate::output::RawExtraction, NutritionError> {
        let pages = self
            .cascade
            .visual_pages(doc, self.config.max_vision_pages)
            .await
            .map_err(|e| NutritionError::Internal(format!("Page rendering for vision failed: {e}")))?;
        self.analyzer.analyze_images(&pages).await
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Analyse PDF bytes and return validated nutrition and allergen data.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Input errors (wrong type, too large, not a PDF, no pages) are reported
/// before any extraction work. Processing errors cover unreadable documents,
/// model failures and the request timeout.
pub async fn analyze(bytes: Vec<u8>, config: &AnalysisConfig) -> Result<ValidatedResult, NutritionError> {
    NutritionPipeline::builder(config.clone())
        .build()?
        .analyze(bytes)
        .await
}

/// Analyse an upload whose MIME type is known.
pub async fn analyze_submission(
    submission: Submission,
    config: &AnalysisConfig,
) -> Result<ValidatedResult, NutritionError> {
    NutritionPipeline::builder(config.clone())
        .build()?
        .analyze_submission(submission)
        .await
}

/// Analyse a local PDF file or an HTTP/HTTPS URL.
pub async fn analyze_file(
    input_str: impl AsRef<str>,
    config: &AnalysisConfig,
) -> Result<ValidatedResult, NutritionError> {
    let input_str = input_str.as_ref();
    info!("Starting analysis: {}", input_str);
    let submission =
        input::resolve_input(input_str, config.download_timeout_secs, config.max_upload_bytes).await?;
    analyze_submission(submission, config).await
}

/// Synchronous wrapper around [`analyze`].
///
/// Creates a Tokio runtime internally; do not call from an async context.
pub fn analyze_sync(bytes: Vec<u8>, config: &AnalysisConfig) -> Result<ValidatedResult, NutritionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| NutritionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(analyze(bytes, config))
}
