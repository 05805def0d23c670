//! Error types for the edgequake-nutrition library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`NutritionError`]: **Fatal**: the request cannot produce a result
//!   (bad upload, no readable text, unparseable model response, timeout).
//!   Returned as `Err(NutritionError)` from the top-level `analyze*` functions.
//!
//! * [`StageError`]: **Non-fatal**: one extraction stage or engine call
//!   failed (corrupt page, OCR engine missing). The cascade records it on the
//!   [`crate::output::ExtractionAttempt`] and moves on to the next stage.
//!
//! Fatal errors are further split by [`ErrorCategory`] so the boundary can
//! tell "fix your file" apart from "we failed to process it".

use crate::output::ErrorResponse;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-nutrition library.
#[derive(Debug, Error)]
pub enum NutritionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Submission declared a MIME type other than `application/pdf`.
    #[error("Unsupported file type '{mime}': only application/pdf is accepted")]
    UnsupportedMediaType { mime: String },

    /// Submission exceeds the configured upload limit.
    #[error("File is {size} bytes, larger than the {limit}-byte limit")]
    FileTooLarge { size: usize, limit: usize },

    /// The bytes do not start with the `%PDF` magic.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The PDF opened but contains no pages.
    #[error("PDF has no pages")]
    EmptyDocument,

    /// pdfium could not open the document at all.
    #[error("PDF is corrupt or encrypted: {detail}")]
    CorruptPdf { detail: String },

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a file path or an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Processing errors ─────────────────────────────────────────────────
    /// No extraction stage produced any text.
    #[error("No text could be extracted; stages tried: {}", stages_tried.join(", "))]
    ExtractionFailed { stages_tried: Vec<String> },

    /// The model answered, but no JSON object could be recovered from it.
    #[error("AI response contained no parseable JSON object: {detail}")]
    AiResponse { detail: String },

    /// The LLM API failed after all retries.
    #[error("LLM API error: {message}")]
    LlmApiError { message: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The whole request exceeded its time budget.
    #[error("Analysis timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which side of the boundary is at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The caller can fix it (wrong file type, too big, empty).
    Input,
    /// Processing failed on our side or at an upstream service.
    Processing,
}

/// Coarse failure kind carried by the pipeline's terminal `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Input,
    Extraction,
    AiResponse,
    AiService,
    Timeout,
    Internal,
}

impl NutritionError {
    /// Input errors are rejected before the cascade runs.
    pub fn category(&self) -> ErrorCategory {
        match self {
            NutritionError::UnsupportedMediaType { .. }
            | NutritionError::FileTooLarge { .. }
            | NutritionError::NotAPdf { .. }
            | NutritionError::EmptyDocument
            | NutritionError::CorruptPdf { .. }
            | NutritionError::FileNotFound { .. }
            | NutritionError::PermissionDenied { .. }
            | NutritionError::InvalidInput { .. }
            | NutritionError::DownloadFailed { .. }
            | NutritionError::DownloadTimeout { .. } => ErrorCategory::Input,
            _ => ErrorCategory::Processing,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            NutritionError::ExtractionFailed { .. } => FailureKind::Extraction,
            NutritionError::AiResponse { .. } => FailureKind::AiResponse,
            NutritionError::LlmApiError { .. } | NutritionError::ProviderNotConfigured { .. } => {
                FailureKind::AiService
            }
            NutritionError::Timeout { .. } => FailureKind::Timeout,
            NutritionError::PdfiumBindingFailed(_)
            | NutritionError::InvalidConfig(_)
            | NutritionError::Internal(_) => FailureKind::Internal,
            _ => FailureKind::Input,
        }
    }

    /// Human-readable message safe to show an end user.
    ///
    /// Input errors are passed through verbatim. Processing errors are
    /// summarised without stage lists, provider hints or raw model output.
    pub fn public_detail(&self) -> String {
        match self {
            e if e.category() == ErrorCategory::Input => e.to_string(),
            NutritionError::ExtractionFailed { .. } => {
                "No readable text could be extracted from the PDF. The file may be empty or damaged."
                    .to_string()
            }
            NutritionError::AiResponse { .. } => {
                "The analysis service returned an unreadable response.".to_string()
            }
            NutritionError::LlmApiError { .. } | NutritionError::ProviderNotConfigured { .. } => {
                "The analysis service is unavailable.".to_string()
            }
            NutritionError::Timeout { secs } => format!("Analysis did not finish within {secs}s."),
            _ => "PDF analysis failed.".to_string(),
        }
    }

    /// Map to the boundary error payload.
    pub fn to_response(&self) -> ErrorResponse {
        match self.category() {
            ErrorCategory::Input => ErrorResponse::client_error(self.public_detail()),
            ErrorCategory::Processing => ErrorResponse::server_error(self.public_detail()),
        }
    }
}

/// A non-fatal error from a single extraction stage or engine call.
///
/// Stored on [`crate::output::ExtractionAttempt`]; the cascade treats the
/// stage as having produced zero characters and continues.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum StageError {
    /// pdfium failed to open the document or read a page's text layer.
    #[error("PDF text extraction failed: {detail}")]
    Pdf { detail: String },

    /// Rasterisation failed for a page.
    #[error("Page {page}: rendering failed: {detail}")]
    Render { page: usize, detail: String },

    /// The OCR engine rejected a page.
    #[error("Page {page}: OCR failed: {detail}")]
    Ocr { page: usize, detail: String },

    /// The engine backing this stage is not available in this build/host.
    #[error("{engine} engine unavailable: {detail}")]
    EngineUnavailable { engine: String, detail: String },

    /// The blocking worker running the stage panicked or was cancelled.
    #[error("Stage worker aborted: {detail}")]
    Aborted { detail: String },
}
