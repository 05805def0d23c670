//! # edgequake-nutrition
//!
//! Extract nutrition facts and allergens from food-product PDFs.
//!
//! ## Why this crate?
//!
//! Product specification sheets arrive in every shape: born-digital exports,
//! scans of printed labels, multi-language layouts. Running OCR and a vision
//! model on every file is slow and expensive; trusting the text layer alone
//! silently misses scanned tables. This crate takes the cheapest text source
//! that works, asks a language model for structured data, and only falls
//! back to showing the model the page images when the answer looks wrong.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     MIME / size / %PDF checks
//!  ├─ 2. Cascade   text layer → layout-aware → Tesseract OCR (spawn_blocking)
//!  ├─ 3. Clean     decimal commas, whitespace, noise
//!  ├─ 4. Language  whatlang, two-letter code
//!  ├─ 5. LLM       nutrition excerpt + full text → JSON
//!  ├─ 6. Gate      missing / null / sodium / OCR-confusion checks
//!  ├─ 7. Vision    (only if the gate fired) up to 3 page images → JSON
//!  └─ 8. Validate  aliases, units, salt → sodium, strict booleans
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_nutrition::{analyze_file, AnalysisConfig, AnalysisResponse};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let config = AnalysisConfig::default();
//!     let result = analyze_file("spec-sheet.pdf", &config).await?;
//!     let response = AnalysisResponse::from(result);
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature     | Default | Description |
//! |-------------|---------|-------------|
//! | `cli`       | on      | Enables the `pdf2nutrition` binary (clap + anyhow + tracing-subscriber) |
//! | `tesseract` | off     | Links libtesseract for the OCR stage |
//!
//! Without `tesseract` the OCR stage reports itself unavailable and scanned
//! documents fail with an extraction error.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{
    analyze, analyze_file, analyze_submission, analyze_sync, NutritionPipeline,
    NutritionPipelineBuilder, PipelineState,
};
pub use config::{AnalysisConfig, AnalysisConfigBuilder, ExtractionVocabulary};
pub use error::{ErrorCategory, FailureKind, NutritionError, StageError};
pub use output::{
    AllergenFlags, AnalysisReport, AnalysisResponse, Diagnostics, ErrorResponse, ExtractionAttempt,
    ExtractionProvenance, NutrientValue, NutritionTable, RawExtraction, ResultMetadata,
    ValidatedResult,
};
pub use pipeline::cascade::ExtractionStage;
pub use pipeline::input::{resolve_input, validate_submission, Submission};
pub use pipeline::llm::{StructuredAnalyzer, TextAnalysisRequest};
pub use pipeline::ocr::OcrEngine;
pub use pipeline::pdf::PdfEngine;
pub use pipeline::quality::{EscalationReason, QualityGate};
pub use pipeline::validate::{NormalizedExtraction, ResultValidator};
pub use progress::{AnalysisProgressCallback, NoopProgressCallback, ProgressCallback};
pub use schema::{AllergenKey, NutrientKey};
