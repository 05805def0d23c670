//! Pipeline integration tests with in-process engines.
//!
//! pdfium, Tesseract and the LLM are replaced by fakes that count their
//! calls, so these run without native libraries or API keys:
//!
//!   cargo test --test pipeline

use async_trait::async_trait;
use edgequake_nutrition::{
    AllergenKey, AnalysisConfig, AnalysisProgressCallback, EscalationReason, ExtractionAttempt,
    ExtractionStage, FailureKind, NutrientKey, NutrientValue, NutritionError, NutritionPipeline,
    OcrEngine, PdfEngine, PipelineState, RawExtraction, StageError, StructuredAnalyzer, Submission,
    TextAnalysisRequest,
};
use image::{DynamicImage, GrayImage, Luma};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LABEL: &str = "Nutrition declaration per 100 g. Energy 1250 kJ / 299 kcal. \
Fat 12,5 g of which saturates 3,1 g. Carbohydrate 40 g of which sugars 5,2 g. \
Protein 8 g. Salt 1,25 g. Ingredients: wheat flour, whole milk powder, sugar.";

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakePdf {
    pages: usize,
    digital: String,
    layout: String,
    calls: AtomicUsize,
    renders: AtomicUsize,
}

impl FakePdf {
    fn digital(text: &str) -> Arc<Self> {
        Arc::new(Self {
            pages: 2,
            digital: text.to_string(),
            ..Default::default()
        })
    }

    fn scanned(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            ..Default::default()
        })
    }
}

impl PdfEngine for FakePdf {
    fn page_count(&self, _pdf: &[u8]) -> Result<usize, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages)
    }

    fn extract_text(&self, _pdf: &[u8]) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.digital.clone())
    }

    fn extract_layout_text(&self, _pdf: &[u8]) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.layout.clone())
    }

    fn render_pages(&self, _pdf: &[u8], _dpi: u32) -> Result<Vec<DynamicImage>, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.pages)
            .map(|_| DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([255]))))
            .collect())
    }
}

struct FakeOcr {
    text: String,
    calls: AtomicUsize,
}

impl FakeOcr {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl OcrEngine for FakeOcr {
    fn recognize(&self, _page: &DynamicImage, _languages: &str) -> Result<String, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.clone())
    }
}

struct FakeAnalyzer {
    text_answer: Value,
    image_answer: Option<Value>,
    delay: Option<Duration>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
    images_seen: AtomicUsize,
    last_language: Mutex<Option<String>>,
}

impl FakeAnalyzer {
    fn new(text_answer: Value, image_answer: Option<Value>) -> Arc<Self> {
        Self::with_delay(text_answer, image_answer, None)
    }

    fn with_delay(text_answer: Value, image_answer: Option<Value>, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            text_answer,
            image_answer,
            delay,
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            images_seen: AtomicUsize::new(0),
            last_language: Mutex::new(None),
        })
    }
}

#[async_trait]
impl StructuredAnalyzer for FakeAnalyzer {
    async fn analyze_text(&self, request: &TextAnalysisRequest) -> Result<RawExtraction, NutritionError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_language.lock().unwrap() = Some(request.language.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(RawExtraction::from_value(self.text_answer.clone()).expect("object answer"))
    }

    async fn analyze_images(&self, pages: &[DynamicImage]) -> Result<RawExtraction, NutritionError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.images_seen.store(pages.len(), Ordering::SeqCst);
        match &self.image_answer {
            Some(v) => Ok(RawExtraction::from_value(v.clone()).expect("object answer")),
            None => Err(NutritionError::LlmApiError {
                message: "vision model unavailable".into(),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingCallback {
    states: Mutex<Vec<PipelineState>>,
    attempts: Mutex<Vec<ExtractionStage>>,
    escalations: Mutex<Vec<EscalationReason>>,
}

impl AnalysisProgressCallback for RecordingCallback {
    fn on_state_change(&self, state: &PipelineState) {
        self.states.lock().unwrap().push(*state);
    }

    fn on_stage_attempt(&self, attempt: &ExtractionAttempt) {
        self.attempts.lock().unwrap().push(attempt.stage);
    }

    fn on_escalation(&self, reason: &EscalationReason) {
        self.escalations.lock().unwrap().push(reason.clone());
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn complete_answer() -> Value {
    json!({
        "nutrition": {
            "energy": {"per_100g": "1250", "unit": "kJ"},
            "fat": {"per_100g": "12.5", "unit": "g"},
            "carbohydrate": {"per_100g": "40", "unit": "g"},
            "sugar": {"per_100g": "5.2", "unit": "g"},
            "protein": {"per_100g": "8", "unit": "g"},
            "sodium": {"per_100g": "0.5", "unit": "g"}
        },
        "allergens": {"gluten": true, "milk": true, "egg": false}
    })
}

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.7\n%fake body".to_vec()
}

fn pipeline(
    config: AnalysisConfig,
    pdf: Arc<FakePdf>,
    ocr: Arc<FakeOcr>,
    analyzer: Arc<FakeAnalyzer>,
) -> NutritionPipeline {
    NutritionPipeline::builder(config)
        .pdf_engine(pdf)
        .ocr_engine(ocr)
        .analyzer(analyzer)
        .build()
        .expect("pipeline with injected engines")
}

/// Route pipeline logs through the test harness; `RUST_LOG=debug` shows them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn default_config() -> AnalysisConfig {
    AnalysisConfig::builder().build().expect("default config is valid")
}

// ── Born-digital documents ──────────────────────────────────────────────────

#[tokio::test]
async fn born_digital_makes_one_ai_call_and_no_ocr() {
    init_tracing();
    let pdf = FakePdf::digital(LABEL);
    let ocr = FakeOcr::new("should not be used");
    let analyzer = FakeAnalyzer::new(complete_answer(), None);
    let p = pipeline(default_config(), pdf.clone(), ocr.clone(), analyzer.clone());

    let report = p.analyze_with_report(pdf_bytes()).await.expect("analysis succeeds");

    assert_eq!(analyzer.text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(analyzer.image_calls.load(Ordering::SeqCst), 0);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    assert_eq!(pdf.renders.load(Ordering::SeqCst), 0);

    let result = &report.result;
    assert!(!result.metadata.ocr_used);
    assert_eq!(result.metadata.language, "en");
    assert_eq!(analyzer.last_language.lock().unwrap().as_deref(), Some("en"));
    assert!(result.metadata.char_count >= 100);
    assert_eq!(result.nutrition.get(NutrientKey::Fat), &NutrientValue::new("12.5", "g"));
    assert_eq!(result.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("0.5", "g"));
    assert!(result.allergens.get(AllergenKey::Gluten));
    assert!(result.allergens.get(AllergenKey::Milk));
    assert!(!result.allergens.get(AllergenKey::Peanut));

    let d = &report.diagnostics;
    assert_eq!(d.page_count, 2);
    assert_eq!(d.attempts.len(), 1);
    assert!(d.excerpt_found);
    assert!(d.escalation.is_none());
    assert!(!d.vision_used);

    use PipelineState::*;
    assert_eq!(
        d.states,
        vec![
            Received,
            Extracted,
            Cleaned,
            LanguageDetected,
            AiAnalyzed,
            QualityChecked,
            Validated,
            Done
        ]
    );
}

#[tokio::test]
async fn progress_callback_sees_every_event() {
    let cb = Arc::new(RecordingCallback::default());
    let config = AnalysisConfig::builder()
        .progress_callback(cb.clone() as Arc<dyn AnalysisProgressCallback>)
        .build()
        .unwrap();
    let answer = json!({"nutrition": {"fat": "3 g"}, "allergens": {}});
    let p = pipeline(
        config,
        FakePdf::digital(LABEL),
        FakeOcr::new(""),
        FakeAnalyzer::new(answer, Some(complete_answer())),
    );

    p.analyze(pdf_bytes()).await.unwrap();

    let states = cb.states.lock().unwrap().clone();
    assert_eq!(states.first(), Some(&PipelineState::Received));
    assert!(states.contains(&PipelineState::VisuallyReanalyzed));
    assert_eq!(states.last(), Some(&PipelineState::Done));
    assert_eq!(*cb.attempts.lock().unwrap(), vec![ExtractionStage::DigitalText]);
    assert_eq!(*cb.escalations.lock().unwrap(), vec![EscalationReason::SodiumMissing]);
}

// ── Scanned documents and escalation ────────────────────────────────────────

#[tokio::test]
async fn scanned_confusion_token_escalates_to_vision() {
    init_tracing();
    let pdf = FakePdf::scanned(5);
    let ocr = FakeOcr::new(LABEL);
    let misread = json!({
        "nutrition": {
            "energy": {"per_100g": "1250", "unit": "kJ"},
            "fat": {"per_100g": "LL", "unit": "g"},
            "sodium": {"per_100g": "0.5", "unit": "g"}
        },
        "allergens": {}
    });
    let mut fixed = complete_answer();
    fixed["nutrition"]["fat"] = json!({"per_100g": "1.1", "unit": "g"});
    let analyzer = FakeAnalyzer::new(misread, Some(fixed));
    let p = pipeline(default_config(), pdf.clone(), ocr.clone(), analyzer.clone());

    let report = p.analyze_with_report(pdf_bytes()).await.unwrap();

    assert!(report.result.metadata.ocr_used);
    assert_eq!(ocr.calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        report.diagnostics.escalation,
        Some(EscalationReason::OcrConfusion { token: "LL".into() })
    );
    assert!(report.diagnostics.vision_used);
    assert_eq!(analyzer.image_calls.load(Ordering::SeqCst), 1);
    assert_eq!(analyzer.images_seen.load(Ordering::SeqCst), 3);
    // OCR and vision share one rendering pass.
    assert_eq!(pdf.renders.load(Ordering::SeqCst), 1);
    assert_eq!(
        report.result.nutrition.get(NutrientKey::Fat),
        &NutrientValue::new("1.1", "g")
    );
    assert_eq!(
        report.diagnostics.provenance.map(|p| p.final_stage),
        Some(ExtractionStage::OpticalCharacter)
    );
    assert!(report.diagnostics.states.contains(&PipelineState::VisuallyReanalyzed));
}

#[tokio::test]
async fn confusion_token_ignored_for_digital_text() {
    let mut answer = complete_answer();
    answer["nutrition"]["fat"] = json!({"per_100g": "LL", "unit": "g"});
    let analyzer = FakeAnalyzer::new(answer, Some(complete_answer()));
    let p = pipeline(
        default_config(),
        FakePdf::digital(LABEL),
        FakeOcr::new(""),
        analyzer.clone(),
    );

    let report = p.analyze_with_report(pdf_bytes()).await.unwrap();
    assert!(report.diagnostics.escalation.is_none());
    assert_eq!(analyzer.image_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn vision_failure_keeps_text_result() {
    init_tracing();
    let partial = json!({
        "nutrition": {"fat": {"per_100g": "12.5", "unit": "g"}},
        "allergens": {"milk": true}
    });
    let analyzer = FakeAnalyzer::new(partial, None);
    let p = pipeline(
        default_config(),
        FakePdf::digital(LABEL),
        FakeOcr::new(""),
        analyzer.clone(),
    );

    let report = p.analyze_with_report(pdf_bytes()).await.expect("degrades, not fails");

    assert_eq!(analyzer.image_calls.load(Ordering::SeqCst), 1);
    assert!(!report.diagnostics.vision_used);
    assert!(report.diagnostics.vision_error.is_some());
    assert!(!report.diagnostics.states.contains(&PipelineState::VisuallyReanalyzed));
    assert_eq!(
        report.result.nutrition.get(NutrientKey::Fat),
        &NutrientValue::new("12.5", "g")
    );
    assert!(report.result.nutrition.get(NutrientKey::Sodium).is_empty());
    assert!(report.result.allergens.get(AllergenKey::Milk));
}

#[tokio::test]
async fn salt_in_vision_answer_becomes_sodium() {
    let text_answer = json!({"nutrition": {}, "allergens": {}});
    let vision_answer = json!({
        "nutrition": {
            "fat": {"per_100g": "12,5", "unit": "g"},
            "salt": {"per_100g": "2,5", "unit": "g"}
        },
        "allergens": ["gluten"]
    });
    let p = pipeline(
        default_config(),
        FakePdf::digital(LABEL),
        FakeOcr::new(""),
        FakeAnalyzer::new(text_answer, Some(vision_answer)),
    );

    let report = p.analyze_with_report(pdf_bytes()).await.unwrap();

    assert_eq!(report.diagnostics.escalation, Some(EscalationReason::MissingNutrition));
    let n = &report.result.nutrition;
    assert_eq!(n.get(NutrientKey::Fat), &NutrientValue::new("12.5", "g"));
    assert_eq!(n.get(NutrientKey::Sodium), &NutrientValue::new("1.0", "g"));
    assert!(n.get(NutrientKey::Protein).is_empty());
    assert!(report.result.allergens.get(AllergenKey::Gluten));
}

// ── Cascade fallbacks ───────────────────────────────────────────────────────

#[tokio::test]
async fn short_text_everywhere_uses_longest_output() {
    let pdf = Arc::new(FakePdf {
        pages: 1,
        digital: "Energy 900 kJ".into(),
        layout: "Energy 900 kJ Fat 2 g Salt 0,1 g".into(),
        ..Default::default()
    });
    let analyzer = FakeAnalyzer::new(complete_answer(), None);
    let p = pipeline(default_config(), pdf, FakeOcr::new("En"), analyzer);

    let report = p.analyze_with_report(pdf_bytes()).await.unwrap();

    assert_eq!(report.diagnostics.attempts.len(), 3);
    assert!(report.diagnostics.attempts.iter().all(|a| !a.succeeded));
    assert_eq!(
        report.diagnostics.provenance.map(|p| p.final_stage),
        Some(ExtractionStage::LayoutAware)
    );
    assert!(report.result.metadata.ocr_used);
}

#[tokio::test]
async fn no_text_anywhere_is_extraction_failure() {
    let cb = Arc::new(RecordingCallback::default());
    let config = AnalysisConfig::builder()
        .progress_callback(cb.clone() as Arc<dyn AnalysisProgressCallback>)
        .build()
        .unwrap();
    let analyzer = FakeAnalyzer::new(complete_answer(), None);
    let p = pipeline(config, FakePdf::scanned(1), FakeOcr::new("  \n "), analyzer.clone());

    let err = p.analyze(pdf_bytes()).await.unwrap_err();

    assert!(matches!(err, NutritionError::ExtractionFailed { .. }));
    assert_eq!(analyzer.text_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        cb.states.lock().unwrap().last(),
        Some(&PipelineState::Failed(FailureKind::Extraction))
    );
}

// ── Input rejection ─────────────────────────────────────────────────────────

#[tokio::test]
async fn wrong_mime_rejected_before_cascade() {
    let pdf = FakePdf::digital(LABEL);
    let analyzer = FakeAnalyzer::new(complete_answer(), None);
    let p = pipeline(default_config(), pdf.clone(), FakeOcr::new(""), analyzer.clone());

    let err = p
        .analyze_submission(Submission::new(pdf_bytes(), Some("image/jpeg".into())))
        .await
        .unwrap_err();

    assert!(matches!(err, NutritionError::UnsupportedMediaType { .. }));
    assert_eq!(err.to_response().status, "client_error");
    assert_eq!(pdf.calls.load(Ordering::SeqCst), 0);
    assert_eq!(analyzer.text_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn oversize_rejected_before_cascade() {
    let pdf = FakePdf::digital(LABEL);
    let config = AnalysisConfig::builder().max_upload_bytes(8).build().unwrap();
    let p = pipeline(config, pdf.clone(), FakeOcr::new(""), FakeAnalyzer::new(complete_answer(), None));

    let err = tokio_test::block_on(p.analyze(pdf_bytes())).unwrap_err();

    assert!(matches!(err, NutritionError::FileTooLarge { .. }));
    assert_eq!(pdf.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn non_pdf_bytes_rejected() {
    let pdf = FakePdf::digital(LABEL);
    let p = pipeline(default_config(), pdf.clone(), FakeOcr::new(""), FakeAnalyzer::new(complete_answer(), None));

    let err = tokio_test::block_on(p.analyze(b"GIF89a....".to_vec())).unwrap_err();

    assert!(matches!(err, NutritionError::NotAPdf { .. }));
    assert_eq!(pdf.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_pages_is_empty_document() {
    let pdf = FakePdf::scanned(0);
    let p = pipeline(default_config(), pdf, FakeOcr::new(LABEL), FakeAnalyzer::new(complete_answer(), None));

    let err = p.analyze(pdf_bytes()).await.unwrap_err();

    assert!(matches!(err, NutritionError::EmptyDocument));
    assert_eq!(err.to_response().status, "client_error");
}

// ── Timeout ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn slow_analysis_times_out() {
    init_tracing();
    let analyzer = FakeAnalyzer::with_delay(complete_answer(), None, Some(Duration::from_secs(5)));
    let config = AnalysisConfig::builder().request_timeout_secs(1).build().unwrap();
    let p = pipeline(config, FakePdf::digital(LABEL), FakeOcr::new(""), analyzer);

    let err = p.analyze(pdf_bytes()).await.unwrap_err();

    assert!(matches!(err, NutritionError::Timeout { secs: 1 }));
    assert_eq!(err.to_response().status, "server_error");
}
