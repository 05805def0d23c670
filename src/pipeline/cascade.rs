//! Extraction cascade: cheapest text source first, OCR last.
//!
//! ```text
//! DigitalText ──(< min chars)──▶ LayoutAware ──(< min chars)──▶ OpticalCharacter
//!      │                              │                              │
//!      └────────── accepted ──────────┴────────── accepted ──────────┘
//! ```
//!
//! A stage is accepted once its trimmed output reaches `min_viable_chars`.
//! A failing stage is recorded as a zero-length attempt; the cascade only
//! errors when no stage produced a single character. When every stage falls
//! short the longest output wins and the result is flagged `ocr_used` so the
//! quality gate treats it with suspicion.
//!
//! Page images rendered for OCR are kept on the [`Document`] and reused by
//! the visual escalation path, so a scanned page is rasterised once per
//! request.

use crate::error::{NutritionError, StageError};
use crate::output::{ExtractionAttempt, ExtractionProvenance};
use crate::pipeline::ocr::{preprocess, OcrEngine};
use crate::pipeline::pdf::PdfEngine;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One way of obtaining text from a PDF, in cost order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStage {
    /// The embedded text layer.
    DigitalText,
    /// Text rebuilt from character positions.
    LayoutAware,
    /// Tesseract over rendered pages.
    OpticalCharacter,
}

impl ExtractionStage {
    /// Fixed cascade order.
    pub const CASCADE: [ExtractionStage; 3] = [
        ExtractionStage::DigitalText,
        ExtractionStage::LayoutAware,
        ExtractionStage::OpticalCharacter,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExtractionStage::DigitalText => "digital_text",
            ExtractionStage::LayoutAware => "layout_aware",
            ExtractionStage::OpticalCharacter => "optical_character",
        }
    }

    pub fn is_ocr(self) -> bool {
        self == ExtractionStage::OpticalCharacter
    }
}

/// A validated PDF for the lifetime of one request.
#[derive(Debug, Clone)]
pub struct Document {
    bytes: Arc<Vec<u8>>,
    page_count: usize,
    page_images: Option<Arc<Vec<DynamicImage>>>,
}

impl Document {
    pub fn new(bytes: Vec<u8>, page_count: usize) -> Self {
        Self {
            bytes: Arc::new(bytes),
            page_count,
            page_images: None,
        }
    }

    /// Open `bytes` with `pdf` and count pages.
    ///
    /// A document pdfium cannot open is [`NutritionError::CorruptPdf`]; one
    /// with no pages is [`NutritionError::EmptyDocument`].
    pub async fn load(bytes: Vec<u8>, pdf: Arc<dyn PdfEngine>) -> Result<Self, NutritionError> {
        let bytes = Arc::new(bytes);
        let shared = Arc::clone(&bytes);
        let page_count = tokio::task::spawn_blocking(move || pdf.page_count(&shared))
            .await
            .map_err(|e| NutritionError::Internal(format!("Page-count task panicked: {e}")))?
            .map_err(|e| NutritionError::CorruptPdf {
                detail: e.to_string(),
            })?;

        if page_count == 0 {
            return Err(NutritionError::EmptyDocument);
        }
        debug!("PDF loaded: {} pages", page_count);

        Ok(Self {
            bytes,
            page_count,
            page_images: None,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn has_page_images(&self) -> bool {
        self.page_images.is_some()
    }
}

/// Text chosen by the cascade plus how it was obtained.
#[derive(Debug, Clone)]
pub struct CascadeOutcome {
    pub text: String,
    pub provenance: ExtractionProvenance,
    pub attempts: Vec<ExtractionAttempt>,
}

/// Runs the stages in order against a [`Document`].
pub struct CascadeOrchestrator {
    pdf: Arc<dyn PdfEngine>,
    ocr: Arc<dyn OcrEngine>,
    min_viable_chars: usize,
    dpi: u32,
    ocr_languages: String,
}

impl CascadeOrchestrator {
    pub fn new(
        pdf: Arc<dyn PdfEngine>,
        ocr: Arc<dyn OcrEngine>,
        min_viable_chars: usize,
        dpi: u32,
        ocr_languages: impl Into<String>,
    ) -> Self {
        Self {
            pdf,
            ocr,
            min_viable_chars,
            dpi,
            ocr_languages: ocr_languages.into(),
        }
    }

    /// Obtain text with the cheapest stage that clears the threshold.
    pub async fn extract(&self, doc: &mut Document) -> Result<CascadeOutcome, NutritionError> {
        let mut attempts: Vec<ExtractionAttempt> = Vec::with_capacity(3);

        for stage in ExtractionStage::CASCADE {
            let attempt = match self.run_stage(stage, doc).await {
                Ok(raw) => {
                    let text = raw.trim().to_string();
                    let char_count = text.chars().count();
                    ExtractionAttempt {
                        stage,
                        text,
                        char_count,
                        succeeded: char_count >= self.min_viable_chars,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(stage = stage.name(), "Stage failed: {}", e);
                    ExtractionAttempt {
                        stage,
                        text: String::new(),
                        char_count: 0,
                        succeeded: false,
                        error: Some(e.to_string()),
                    }
                }
            };
            info!(
                stage = stage.name(),
                chars = attempt.char_count,
                accepted = attempt.succeeded,
                "Extraction stage finished"
            );

            if attempt.succeeded {
                let text = attempt.text.clone();
                attempts.push(attempt);
                return Ok(CascadeOutcome {
                    text,
                    provenance: ExtractionProvenance {
                        final_stage: stage,
                        ocr_used: stage.is_ocr(),
                    },
                    attempts,
                });
            }
            attempts.push(attempt);
        }

        // Nothing cleared the bar: keep the longest output, earliest on ties.
        let best = attempts
            .iter()
            .filter(|a| a.char_count > 0)
            .fold(None::<&ExtractionAttempt>, |best, a| match best {
                Some(b) if b.char_count >= a.char_count => Some(b),
                _ => Some(a),
            });

        match best {
            Some(best) => {
                warn!(
                    stage = best.stage.name(),
                    chars = best.char_count,
                    "No stage reached {} chars; using longest output",
                    self.min_viable_chars
                );
                let text = best.text.clone();
                let final_stage = best.stage;
                Ok(CascadeOutcome {
                    text,
                    provenance: ExtractionProvenance {
                        final_stage,
                        ocr_used: true,
                    },
                    attempts,
                })
            }
            None => Err(NutritionError::ExtractionFailed {
                stages_tried: attempts.iter().map(|a| a.stage.name().to_string()).collect(),
            }),
        }
    }

    /// Up to `limit` page images for visual analysis.
    ///
    /// Reuses the OCR renders when present, otherwise rasterises once and
    /// caches the result on `doc`.
    pub async fn visual_pages(
        &self,
        doc: &mut Document,
        limit: usize,
    ) -> Result<Vec<DynamicImage>, StageError> {
        let images = self.ensure_rendered(doc).await?;
        Ok(images.iter().take(limit).cloned().collect())
    }

    async fn run_stage(&self, stage: ExtractionStage, doc: &mut Document) -> Result<String, StageError> {
        match stage {
            ExtractionStage::DigitalText => {
                let pdf = Arc::clone(&self.pdf);
                let bytes = Arc::clone(&doc.bytes);
                blocking(move || pdf.extract_text(&bytes)).await
            }
            ExtractionStage::LayoutAware => {
                let pdf = Arc::clone(&self.pdf);
                let bytes = Arc::clone(&doc.bytes);
                blocking(move || pdf.extract_layout_text(&bytes)).await
            }
            ExtractionStage::OpticalCharacter => {
                let images = self.ensure_rendered(doc).await?;
                let ocr = Arc::clone(&self.ocr);
                let languages = self.ocr_languages.clone();
                blocking(move || recognize_pages(ocr.as_ref(), &images, &languages)).await
            }
        }
    }

    async fn ensure_rendered(&self, doc: &mut Document) -> Result<Arc<Vec<DynamicImage>>, StageError> {
        if let Some(images) = &doc.page_images {
            return Ok(Arc::clone(images));
        }
        let pdf = Arc::clone(&self.pdf);
        let bytes = Arc::clone(&doc.bytes);
        let dpi = self.dpi;
        let images = Arc::new(blocking(move || pdf.render_pages(&bytes, dpi)).await?);
        debug!("Rendered {} pages at {} DPI", images.len(), dpi);
        doc.page_images = Some(Arc::clone(&images));
        Ok(images)
    }
}

/// OCR every page, skipping pages the engine rejects.
///
/// Fails only when every page failed, with the first page's error.
fn recognize_pages(
    ocr: &dyn OcrEngine,
    images: &[DynamicImage],
    languages: &str,
) -> Result<String, StageError> {
    let mut pages = Vec::with_capacity(images.len());
    let mut first_err = None;

    for (idx, image) in images.iter().enumerate() {
        let gray = preprocess(image);
        match ocr.recognize(&gray, languages) {
            Ok(text) => pages.push(text),
            Err(StageError::Ocr { detail, .. }) => {
                warn!(page = idx + 1, "OCR failed: {}", detail);
                first_err.get_or_insert(StageError::Ocr {
                    page: idx + 1,
                    detail,
                });
            }
            Err(e) => return Err(e),
        }
    }

    match (pages.is_empty(), first_err) {
        (true, Some(e)) => Err(e),
        _ => Ok(pages.join("\n\n")),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StageError>
where
    F: FnOnce() -> Result<T, StageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StageError::Aborted {
            detail: e.to_string(),
        })?
}
